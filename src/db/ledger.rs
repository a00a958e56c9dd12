//! Expenses, purchases and assets.
//!
//! The three record families share one shape: a company-scoped header and a
//! list of taxed line items. [`LedgerKind`] selects the tables.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::{
    db::{begin_write, delete_scoped, exists, exists_in_company, invalid_pk},
    errors::AppError,
    structs::{Company, LedgerEntry, LedgerItem, Tax},
    utils::{
        contains_pattern, parse_rate, percentage_of, require_non_empty, validate_amount, Page,
        Pagination,
    },
};

const ACCOUNTING_SEAT_MAX: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Expense,
    Purchase,
    Asset,
}

impl LedgerKind {
    /// Resolves the plural path segment used by the HTTP routes.
    pub fn from_segment(segment: &str) -> Option<LedgerKind> {
        match segment {
            "expenses" => Some(LedgerKind::Expense),
            "purchases" => Some(LedgerKind::Purchase),
            "assets" => Some(LedgerKind::Asset),
            _ => None,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            LedgerKind::Expense => "expenses",
            LedgerKind::Purchase => "purchases",
            LedgerKind::Asset => "assets",
        }
    }

    pub fn item_table(self) -> &'static str {
        match self {
            LedgerKind::Expense => "expense_items",
            LedgerKind::Purchase => "purchase_items",
            LedgerKind::Asset => "asset_items",
        }
    }

    fn parent_column(self) -> &'static str {
        match self {
            LedgerKind::Expense => "expense_id",
            LedgerKind::Purchase => "purchase_id",
            LedgerKind::Asset => "asset_id",
        }
    }

    /// Body key carrying ids for bulk deletion.
    pub fn list_key(self) -> &'static str {
        match self {
            LedgerKind::Expense => "expenses_list",
            LedgerKind::Purchase => "purchases_list",
            LedgerKind::Asset => "assets_list",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LedgerKind::Expense => "Expense",
            LedgerKind::Purchase => "Purchase",
            LedgerKind::Asset => "Asset",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLedgerItem {
    pub base_amount: Decimal,
    pub vat: Option<i64>,
    pub ret: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLedgerEntry {
    pub accounting_seat: String,
    pub contact: i64,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub description: String,
    pub chart_of_account: i64,
    pub items: Vec<NewLedgerItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerPatch {
    pub accounting_seat: Option<String>,
    pub contact: Option<i64>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub chart_of_account: Option<i64>,
    pub items: Option<Vec<NewLedgerItem>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerFilter {
    pub contact: Option<i64>,
    pub invoice_date_after: Option<NaiveDate>,
    pub invoice_date_before: Option<NaiveDate>,
    pub search: Option<String>,
}

/// A header with its items, as returned by retrieve, create and update.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerDetail {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub items: Vec<LedgerItem>,
}

fn validate_header(accounting_seat: &str, description: &str) -> Result<(), AppError> {
    require_non_empty("accounting_seat", accounting_seat)?;
    if accounting_seat.trim().chars().count() > ACCOUNTING_SEAT_MAX {
        return Err(AppError::validation(
            "accounting_seat",
            format!("Ensure this field has no more than {ACCOUNTING_SEAT_MAX} characters."),
        ));
    }
    require_non_empty("description", description)
}

async fn check_header_references(
    conn: &mut SqliteConnection,
    company_id: i64,
    contact: i64,
    chart_of_account: i64,
) -> Result<(), AppError> {
    if !exists_in_company(conn, "contacts", company_id, contact).await? {
        return Err(invalid_pk("contact", contact));
    }
    if !exists(conn, "account_types", chart_of_account).await? {
        return Err(invalid_pk("chart_of_account", chart_of_account));
    }
    Ok(())
}

async fn fetch_tax(
    conn: &mut SqliteConnection,
    field: &str,
    id: Option<i64>,
) -> Result<Option<Tax>, AppError> {
    let Some(id) = id else {
        return Ok(None);
    };
    sqlx::query_as::<_, Tax>("SELECT * FROM taxes WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(Some)
        .ok_or_else(|| invalid_pk(field, id))
}

/// Inserts items for `entry_id`, computing VAT and retention from their taxes.
async fn insert_items(
    conn: &mut SqliteConnection,
    kind: LedgerKind,
    entry_id: i64,
    items: &[NewLedgerItem],
) -> Result<Vec<LedgerItem>, AppError> {
    if items.is_empty() {
        return Err(AppError::validation("items", "At least one item is required."));
    }
    let sql = format!(
        "INSERT INTO {} ({}, base_amount, vat_id, calculated_vat, ret_id, calculated_ret) \
         VALUES (?, ?, ?, ?, ?, ?) \
         RETURNING id, base_amount, vat_id, calculated_vat, ret_id, calculated_ret",
        kind.item_table(),
        kind.parent_column()
    );

    let mut saved = Vec::with_capacity(items.len());
    for item in items {
        let base_amount = validate_amount("base_amount", item.base_amount)?;
        let vat = fetch_tax(conn, "vat", item.vat).await?;
        let ret = fetch_tax(conn, "ret", item.ret).await?;
        let vat_rate = match vat {
            Some(tax) => parse_rate("vat", tax.vat.as_deref())?,
            None => Decimal::ZERO,
        };
        let ret_rate = match ret {
            Some(tax) => parse_rate("ret", tax.ret.as_deref())?,
            None => Decimal::ZERO,
        };
        let calculated_vat = percentage_of("base_amount", base_amount, vat_rate)?;
        let calculated_ret = percentage_of("base_amount", base_amount, ret_rate)?;

        let row = sqlx::query_as::<_, LedgerItem>(&sql)
            .bind(entry_id)
            .bind(base_amount.to_string())
            .bind(item.vat)
            .bind(calculated_vat.to_string())
            .bind(item.ret)
            .bind(calculated_ret.to_string())
            .fetch_one(&mut *conn)
            .await?;
        saved.push(row);
    }
    Ok(saved)
}

async fn fetch_items(
    conn: &mut SqliteConnection,
    kind: LedgerKind,
    entry_id: i64,
) -> Result<Vec<LedgerItem>, sqlx::Error> {
    sqlx::query_as::<_, LedgerItem>(&format!(
        "SELECT id, base_amount, vat_id, calculated_vat, ret_id, calculated_ret \
         FROM {} WHERE {} = ? ORDER BY id",
        kind.item_table(),
        kind.parent_column()
    ))
    .bind(entry_id)
    .fetch_all(&mut *conn)
    .await
}

async fn fetch_entry(
    conn: &mut SqliteConnection,
    kind: LedgerKind,
    company_id: i64,
    id: i64,
) -> Result<Option<LedgerEntry>, sqlx::Error> {
    sqlx::query_as::<_, LedgerEntry>(&format!(
        "SELECT * FROM {} WHERE id = ? AND company_id = ?",
        kind.table()
    ))
    .bind(id)
    .bind(company_id)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn create_entry(
    pool: &SqlitePool,
    kind: LedgerKind,
    company: &Company,
    input: NewLedgerEntry,
) -> Result<LedgerDetail, AppError> {
    validate_header(&input.accounting_seat, &input.description)?;

    let mut tx = begin_write(pool).await?;
    check_header_references(&mut tx, company.id, input.contact, input.chart_of_account).await?;

    let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
        "INSERT INTO {} (company_id, accounting_seat, contact_id, invoice_date, due_date, description, \
         chart_of_account_id, creation_date) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        kind.table()
    ))
    .bind(company.id)
    .bind(input.accounting_seat.trim())
    .bind(input.contact)
    .bind(input.invoice_date)
    .bind(input.due_date)
    .bind(input.description.trim())
    .bind(input.chart_of_account)
    .bind(chrono::Utc::now().date_naive())
    .fetch_one(&mut *tx)
    .await?;
    let items = insert_items(&mut tx, kind, entry.id, &input.items).await?;
    tx.commit().await?;

    log::info!(
        "{} {} created in company {} with {} items",
        kind.label(),
        entry.id,
        company.id,
        items.len()
    );
    Ok(LedgerDetail { entry, items })
}

/// Partial update. A present `items` list replaces every existing item.
pub async fn update_entry(
    pool: &SqlitePool,
    kind: LedgerKind,
    company: &Company,
    id: i64,
    patch: LedgerPatch,
) -> Result<LedgerDetail, AppError> {
    let mut tx = begin_write(pool).await?;
    let old = fetch_entry(&mut tx, kind, company.id, id)
        .await?
        .ok_or_else(|| AppError::not_found(kind.label()))?;

    let accounting_seat = patch.accounting_seat.unwrap_or(old.accounting_seat);
    let description = patch.description.unwrap_or(old.description);
    validate_header(&accounting_seat, &description)?;
    let contact = patch.contact.unwrap_or(old.contact_id);
    let chart_of_account = patch.chart_of_account.unwrap_or(old.chart_of_account_id);
    check_header_references(&mut tx, company.id, contact, chart_of_account).await?;

    let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
        "UPDATE {} SET accounting_seat = ?, contact_id = ?, invoice_date = ?, due_date = ?, \
         description = ?, chart_of_account_id = ? WHERE id = ? AND company_id = ? RETURNING *",
        kind.table()
    ))
    .bind(accounting_seat.trim())
    .bind(contact)
    .bind(patch.invoice_date.unwrap_or(old.invoice_date))
    .bind(patch.due_date.unwrap_or(old.due_date))
    .bind(description.trim())
    .bind(chart_of_account)
    .bind(old.id)
    .bind(company.id)
    .fetch_one(&mut *tx)
    .await?;

    let items = match patch.items {
        Some(items) => {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE {} = ?",
                kind.item_table(),
                kind.parent_column()
            ))
            .bind(entry.id)
            .execute(&mut *tx)
            .await?;
            insert_items(&mut tx, kind, entry.id, &items).await?
        }
        None => fetch_items(&mut tx, kind, entry.id).await?,
    };
    tx.commit().await?;

    log::info!("{} {} updated in company {}", kind.label(), entry.id, company.id);
    Ok(LedgerDetail { entry, items })
}

pub async fn get_entry(
    pool: &SqlitePool,
    kind: LedgerKind,
    company_id: i64,
    id: i64,
) -> Result<LedgerDetail, AppError> {
    let mut conn = pool.acquire().await?;
    let entry = fetch_entry(&mut conn, kind, company_id, id)
        .await?
        .ok_or_else(|| AppError::not_found(kind.label()))?;
    let items = fetch_items(&mut conn, kind, entry.id).await?;
    Ok(LedgerDetail { entry, items })
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, company_id: i64, filter: &LedgerFilter) {
    query.push(" WHERE company_id = ");
    query.push_bind(company_id);
    if let Some(contact) = filter.contact {
        query.push(" AND contact_id = ");
        query.push_bind(contact);
    }
    if let Some(after) = filter.invoice_date_after {
        query.push(" AND invoice_date >= ");
        query.push_bind(after);
    }
    if let Some(before) = filter.invoice_date_before {
        query.push(" AND invoice_date <= ");
        query.push_bind(before);
    }
    if let Some(term) = filter.search.as_deref().filter(|t| !t.trim().is_empty()) {
        let pattern = contains_pattern(term.trim());
        query.push(" AND (description LIKE ");
        query.push_bind(pattern.clone());
        query.push(" ESCAPE '\\' OR accounting_seat LIKE ");
        query.push_bind(pattern);
        query.push(" ESCAPE '\\')");
    }
}

pub async fn list_entries(
    pool: &SqlitePool,
    kind: LedgerKind,
    company_id: i64,
    filter: &LedgerFilter,
    page: &Pagination,
) -> Result<Page<LedgerEntry>, sqlx::Error> {
    let mut count = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", kind.table()));
    push_filters(&mut count, company_id, filter);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut query = QueryBuilder::new(format!("SELECT * FROM {}", kind.table()));
    push_filters(&mut query, company_id, filter);
    query.push(" ORDER BY id DESC LIMIT ");
    query.push_bind(page.limit());
    query.push(" OFFSET ");
    query.push_bind(page.offset());
    let results = query.build_query_as::<LedgerEntry>().fetch_all(pool).await?;

    Ok(Page {
        count: total,
        results,
    })
}

pub async fn delete_entries(
    pool: &SqlitePool,
    kind: LedgerKind,
    company_id: i64,
    ids: &[i64],
) -> Result<u64, AppError> {
    Ok(delete_scoped(pool, kind.table(), "company_id", company_id, ids).await?)
}
