use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::{
    errors::AppError,
    structs::{AccountType, LookupName, LookupType, PaymentDay},
};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PayrollTaxRate {
    pub id: i64,
    pub irpf: Option<String>,
}

/// Tax rates offered for a contact type. Sales-side contacts carry an
/// equivalence surcharge, purchase-side contacts a retention.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ContactTaxRate {
    Sales {
        id: i64,
        vat: Option<String>,
        equiv: Option<String>,
    },
    Purchase {
        id: i64,
        vat: Option<String>,
        ret: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Sales,
    Purchase,
    Other,
}

fn side_of(contact_type: &str) -> Side {
    match contact_type.to_lowercase().as_str() {
        "client" | "debitor" => Side::Sales,
        "provider" | "creditor" => Side::Purchase,
        _ => Side::Other,
    }
}

async fn lookup_name(pool: &SqlitePool, id: i64) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT lookup_name FROM lookup_names WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_lookup_types(pool: &SqlitePool) -> Result<Vec<LookupType>, sqlx::Error> {
    sqlx::query_as::<_, LookupType>("SELECT * FROM lookup_types ORDER BY id")
        .fetch_all(pool)
        .await
}

pub async fn list_lookup_names(
    pool: &SqlitePool,
    lookup_type: &str,
) -> Result<Vec<LookupName>, sqlx::Error> {
    sqlx::query_as::<_, LookupName>(
        "SELECT ln.* FROM lookup_names ln JOIN lookup_types lt ON lt.id = ln.lookup_type_id \
         WHERE lt.lookup_type = ? ORDER BY ln.id",
    )
    .bind(lookup_type)
    .fetch_all(pool)
    .await
}

pub async fn list_payroll_taxes(pool: &SqlitePool) -> Result<Vec<PayrollTaxRate>, sqlx::Error> {
    sqlx::query_as::<_, PayrollTaxRate>(
        "SELECT t.id, t.irpf FROM taxes t JOIN lookup_names ln ON ln.id = t.lookup_name_id \
         WHERE ln.lookup_name = 'PayrollTax' ORDER BY t.id",
    )
    .fetch_all(pool)
    .await
}

pub async fn list_contact_taxes(
    pool: &SqlitePool,
    lookup_id: i64,
) -> Result<Vec<ContactTaxRate>, sqlx::Error> {
    let side = match lookup_name(pool, lookup_id).await? {
        Some(name) => side_of(&name),
        None => Side::Other,
    };
    if side == Side::Other {
        return Ok(Vec::new());
    }

    let rows: Vec<(i64, Option<String>, Option<String>, Option<String>)> =
        sqlx::query_as("SELECT id, vat, ret, equiv FROM taxes WHERE lookup_name_id = ? ORDER BY id")
            .bind(lookup_id)
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(id, vat, ret, equiv)| match side {
            Side::Sales => ContactTaxRate::Sales { id, vat, equiv },
            _ => ContactTaxRate::Purchase { id, vat, ret },
        })
        .collect())
}

/// Chart-of-account entries for a contact type: income accounts for clients
/// and debitors, expense accounts for providers and creditors.
pub async fn list_account_types(
    pool: &SqlitePool,
    lookup_id: i64,
) -> Result<Vec<AccountType>, AppError> {
    let name = lookup_name(pool, lookup_id)
        .await?
        .ok_or_else(|| AppError::not_found("Lookup"))?;
    let category = match side_of(&name) {
        Side::Sales => "Income",
        Side::Purchase => "Expense",
        Side::Other => return Ok(Vec::new()),
    };
    Ok(sqlx::query_as::<_, AccountType>(
        "SELECT a.* FROM account_types a JOIN lookup_names ln ON ln.id = a.category_id \
         WHERE ln.lookup_name = ? ORDER BY a.id",
    )
    .bind(category)
    .fetch_all(pool)
    .await?)
}

pub async fn list_payment_days(pool: &SqlitePool) -> Result<Vec<PaymentDay>, sqlx::Error> {
    sqlx::query_as::<_, PaymentDay>("SELECT * FROM payment_days ORDER BY day")
        .fetch_all(pool)
        .await
}
