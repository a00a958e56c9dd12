//! Teams, employees and payrolls of a company.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::{
    db::{begin_write, delete_scoped, exists_in_company, invalid_pk},
    errors::{unique_violation_as, AppError},
    structs::{Employee, PayRoll, PayRollItem, Team},
    utils::{
        contains_pattern, nullable, parse_rate, percentage_of, require_non_empty, validate_amount,
        validate_email, Page, Pagination,
    },
};

const EMPLOYEE_NIF_TAKEN: &str = "Employee with this NIF already exists.";

#[derive(Debug, Clone, Deserialize)]
pub struct TeamInput {
    pub team_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEmployee {
    pub name: String,
    pub nif: String,
    pub email: Option<String>,
    pub team: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmployeePatch {
    pub name: Option<String>,
    pub nif: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub team: Option<Option<i64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPayRollItem {
    pub employee: i64,
    pub gross_amount: Decimal,
    pub irpf: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPayRoll {
    pub period: NaiveDate,
    pub description: String,
    pub items: Vec<NewPayRollItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayRollPatch {
    pub period: Option<NaiveDate>,
    pub description: Option<String>,
    pub items: Option<Vec<NewPayRollItem>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayrollFilter {
    pub search: Option<String>,
    pub team: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayRollDetail {
    #[serde(flatten)]
    pub payroll: PayRoll,
    pub items: Vec<PayRollItem>,
}

fn search_term(filter: &PayrollFilter) -> Option<String> {
    filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(contains_pattern)
}

async fn page_of<T>(
    pool: &SqlitePool,
    table: &'static str,
    company_id: i64,
    push_extra: impl Fn(&mut QueryBuilder<'_, Sqlite>),
    page: &Pagination,
) -> Result<Page<T>, sqlx::Error>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> + Send + Unpin,
{
    let mut count = QueryBuilder::new(format!("SELECT COUNT(*) FROM {table} WHERE company_id = "));
    count.push_bind(company_id);
    push_extra(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut query = QueryBuilder::new(format!("SELECT * FROM {table} WHERE company_id = "));
    query.push_bind(company_id);
    push_extra(&mut query);
    query.push(" ORDER BY id DESC LIMIT ");
    query.push_bind(page.limit());
    query.push(" OFFSET ");
    query.push_bind(page.offset());
    let results = query.build_query_as::<T>().fetch_all(pool).await?;

    Ok(Page {
        count: total,
        results,
    })
}

// Teams

pub async fn create_team(pool: &SqlitePool, company_id: i64, input: TeamInput) -> Result<Team, AppError> {
    require_non_empty("team_name", &input.team_name)?;
    let team = sqlx::query_as::<_, Team>(
        "INSERT INTO teams (company_id, team_name) VALUES (?, ?) RETURNING *",
    )
    .bind(company_id)
    .bind(input.team_name.trim())
    .fetch_one(pool)
    .await?;
    log::info!("Team {} created in company {}", team.id, company_id);
    Ok(team)
}

pub async fn update_team(
    pool: &SqlitePool,
    company_id: i64,
    id: i64,
    input: TeamInput,
) -> Result<Team, AppError> {
    require_non_empty("team_name", &input.team_name)?;
    sqlx::query_as::<_, Team>(
        "UPDATE teams SET team_name = ? WHERE id = ? AND company_id = ? RETURNING *",
    )
    .bind(input.team_name.trim())
    .bind(id)
    .bind(company_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Team"))
}

pub async fn get_team(pool: &SqlitePool, company_id: i64, id: i64) -> Result<Team, AppError> {
    sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = ? AND company_id = ?")
        .bind(id)
        .bind(company_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Team"))
}

pub async fn list_teams(
    pool: &SqlitePool,
    company_id: i64,
    filter: &PayrollFilter,
    page: &Pagination,
) -> Result<Page<Team>, sqlx::Error> {
    let term = search_term(filter);
    page_of(
        pool,
        "teams",
        company_id,
        |query| {
            if let Some(term) = &term {
                query.push(" AND team_name LIKE ");
                query.push_bind(term.clone());
                query.push(" ESCAPE '\\'");
            }
        },
        page,
    )
    .await
}

pub async fn delete_teams(pool: &SqlitePool, company_id: i64, ids: &[i64]) -> Result<u64, AppError> {
    Ok(delete_scoped(pool, "teams", "company_id", company_id, ids).await?)
}

// Employees

async fn check_team(conn: &mut SqliteConnection, company_id: i64, team: Option<i64>) -> Result<(), AppError> {
    if let Some(team) = team {
        if !exists_in_company(conn, "teams", company_id, team).await? {
            return Err(invalid_pk("team", team));
        }
    }
    Ok(())
}

async fn employee_nif_taken(
    conn: &mut SqliteConnection,
    company_id: i64,
    nif: &str,
    except_id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM employees WHERE company_id = ? AND nif = ? AND id != ?)",
    )
    .bind(company_id)
    .bind(nif)
    .bind(except_id)
    .fetch_one(&mut *conn)
    .await
}

fn check_optional_email(email: Option<&str>) -> Result<(), AppError> {
    match email {
        Some(email) if !email.trim().is_empty() => validate_email(email),
        _ => Ok(()),
    }
}

pub async fn create_employee(
    pool: &SqlitePool,
    company_id: i64,
    input: NewEmployee,
) -> Result<Employee, AppError> {
    require_non_empty("name", &input.name)?;
    require_non_empty("nif", &input.nif)?;
    check_optional_email(input.email.as_deref())?;
    let nif = input.nif.trim().to_uppercase();

    let mut tx = begin_write(pool).await?;
    check_team(&mut tx, company_id, input.team).await?;
    if employee_nif_taken(&mut tx, company_id, &nif, -1).await? {
        return Err(AppError::validation("nif", EMPLOYEE_NIF_TAKEN));
    }
    let employee = sqlx::query_as::<_, Employee>(
        "INSERT INTO employees (company_id, team_id, name, nif, email) VALUES (?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(company_id)
    .bind(input.team)
    .bind(input.name.trim())
    .bind(&nif)
    .bind(&input.email)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| unique_violation_as(e, "nif", EMPLOYEE_NIF_TAKEN))?;
    tx.commit().await?;

    log::info!("Employee {} created in company {}", employee.id, company_id);
    Ok(employee)
}

pub async fn update_employee(
    pool: &SqlitePool,
    company_id: i64,
    id: i64,
    patch: EmployeePatch,
) -> Result<Employee, AppError> {
    let mut tx = begin_write(pool).await?;
    let old = sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = ? AND company_id = ?")
        .bind(id)
        .bind(company_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Employee"))?;

    let name = patch.name.unwrap_or(old.name);
    require_non_empty("name", &name)?;
    let nif = match patch.nif {
        Some(nif) => {
            require_non_empty("nif", &nif)?;
            nif.trim().to_uppercase()
        }
        None => old.nif,
    };
    check_optional_email(patch.email.as_ref().and_then(|email| email.as_deref()))?;
    check_team(&mut tx, company_id, patch.team.flatten()).await?;
    if employee_nif_taken(&mut tx, company_id, &nif, old.id).await? {
        return Err(AppError::validation("nif", EMPLOYEE_NIF_TAKEN));
    }

    let employee = sqlx::query_as::<_, Employee>(
        "UPDATE employees SET team_id = ?, name = ?, nif = ?, email = ? \
         WHERE id = ? AND company_id = ? RETURNING *",
    )
    .bind(patch.team.unwrap_or(old.team_id))
    .bind(name.trim())
    .bind(&nif)
    .bind(patch.email.unwrap_or(old.email))
    .bind(old.id)
    .bind(company_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| unique_violation_as(e, "nif", EMPLOYEE_NIF_TAKEN))?;
    tx.commit().await?;
    Ok(employee)
}

pub async fn get_employee(pool: &SqlitePool, company_id: i64, id: i64) -> Result<Employee, AppError> {
    sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = ? AND company_id = ?")
        .bind(id)
        .bind(company_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Employee"))
}

pub async fn list_employees(
    pool: &SqlitePool,
    company_id: i64,
    filter: &PayrollFilter,
    page: &Pagination,
) -> Result<Page<Employee>, sqlx::Error> {
    let term = search_term(filter);
    let team = filter.team;
    page_of(
        pool,
        "employees",
        company_id,
        |query| {
            if let Some(team) = team {
                query.push(" AND team_id = ");
                query.push_bind(team);
            }
            if let Some(term) = &term {
                query.push(" AND (name LIKE ");
                query.push_bind(term.clone());
                query.push(" ESCAPE '\\' OR nif LIKE ");
                query.push_bind(term.clone());
                query.push(" ESCAPE '\\')");
            }
        },
        page,
    )
    .await
}

pub async fn delete_employees(pool: &SqlitePool, company_id: i64, ids: &[i64]) -> Result<u64, AppError> {
    Ok(delete_scoped(pool, "employees", "company_id", company_id, ids).await?)
}

// Payrolls

/// IRPF rate of a payroll tax; other tax kinds are rejected.
async fn irpf_rate(conn: &mut SqliteConnection, id: Option<i64>) -> Result<Decimal, AppError> {
    let Some(id) = id else {
        return Ok(Decimal::ZERO);
    };
    let rate: Option<Option<String>> = sqlx::query_scalar(
        "SELECT t.irpf FROM taxes t JOIN lookup_names ln ON ln.id = t.lookup_name_id \
         WHERE t.id = ? AND ln.lookup_name = 'PayrollTax'",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    match rate {
        Some(rate) => parse_rate("irpf", rate.as_deref()),
        None => Err(invalid_pk("irpf", id)),
    }
}

async fn insert_payroll_items(
    conn: &mut SqliteConnection,
    company_id: i64,
    payroll_id: i64,
    items: &[NewPayRollItem],
) -> Result<Vec<PayRollItem>, AppError> {
    if items.is_empty() {
        return Err(AppError::validation("items", "At least one item is required."));
    }
    let mut saved = Vec::with_capacity(items.len());
    for item in items {
        if !exists_in_company(conn, "employees", company_id, item.employee).await? {
            return Err(invalid_pk("employee", item.employee));
        }
        let gross_amount = validate_amount("gross_amount", item.gross_amount)?;
        let rate = irpf_rate(conn, item.irpf).await?;
        let calculated_irpf = percentage_of("gross_amount", gross_amount, rate)?;
        let row = sqlx::query_as::<_, PayRollItem>(
            "INSERT INTO payroll_items (payroll_id, employee_id, gross_amount, irpf_id, calculated_irpf) \
             VALUES (?, ?, ?, ?, ?) RETURNING id, employee_id, gross_amount, irpf_id, calculated_irpf",
        )
        .bind(payroll_id)
        .bind(item.employee)
        .bind(gross_amount.to_string())
        .bind(item.irpf)
        .bind(calculated_irpf.to_string())
        .fetch_one(&mut *conn)
        .await?;
        saved.push(row);
    }
    Ok(saved)
}

async fn fetch_payroll_items(
    conn: &mut SqliteConnection,
    payroll_id: i64,
) -> Result<Vec<PayRollItem>, sqlx::Error> {
    sqlx::query_as::<_, PayRollItem>(
        "SELECT id, employee_id, gross_amount, irpf_id, calculated_irpf FROM payroll_items \
         WHERE payroll_id = ? ORDER BY id",
    )
    .bind(payroll_id)
    .fetch_all(&mut *conn)
    .await
}

async fn fetch_payroll(
    conn: &mut SqliteConnection,
    company_id: i64,
    id: i64,
) -> Result<PayRoll, AppError> {
    sqlx::query_as::<_, PayRoll>("SELECT * FROM payrolls WHERE id = ? AND company_id = ?")
        .bind(id)
        .bind(company_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("Payroll"))
}

pub async fn create_payroll(
    pool: &SqlitePool,
    company_id: i64,
    input: NewPayRoll,
) -> Result<PayRollDetail, AppError> {
    require_non_empty("description", &input.description)?;
    let mut tx = begin_write(pool).await?;
    let payroll = sqlx::query_as::<_, PayRoll>(
        "INSERT INTO payrolls (company_id, period, description, creation_date) VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(company_id)
    .bind(input.period)
    .bind(input.description.trim())
    .bind(chrono::Utc::now().date_naive())
    .fetch_one(&mut *tx)
    .await?;
    let items = insert_payroll_items(&mut tx, company_id, payroll.id, &input.items).await?;
    tx.commit().await?;

    log::info!(
        "Payroll {} created in company {} with {} items",
        payroll.id,
        company_id,
        items.len()
    );
    Ok(PayRollDetail { payroll, items })
}

pub async fn update_payroll(
    pool: &SqlitePool,
    company_id: i64,
    id: i64,
    patch: PayRollPatch,
) -> Result<PayRollDetail, AppError> {
    let mut tx = begin_write(pool).await?;
    let old = fetch_payroll(&mut tx, company_id, id).await?;
    let description = patch.description.unwrap_or(old.description);
    require_non_empty("description", &description)?;

    let payroll = sqlx::query_as::<_, PayRoll>(
        "UPDATE payrolls SET period = ?, description = ? WHERE id = ? AND company_id = ? RETURNING *",
    )
    .bind(patch.period.unwrap_or(old.period))
    .bind(description.trim())
    .bind(old.id)
    .bind(company_id)
    .fetch_one(&mut *tx)
    .await?;

    let items = match patch.items {
        Some(items) => {
            sqlx::query("DELETE FROM payroll_items WHERE payroll_id = ?")
                .bind(payroll.id)
                .execute(&mut *tx)
                .await?;
            insert_payroll_items(&mut tx, company_id, payroll.id, &items).await?
        }
        None => fetch_payroll_items(&mut tx, payroll.id).await?,
    };
    tx.commit().await?;
    Ok(PayRollDetail { payroll, items })
}

pub async fn get_payroll(pool: &SqlitePool, company_id: i64, id: i64) -> Result<PayRollDetail, AppError> {
    let mut conn = pool.acquire().await?;
    let payroll = fetch_payroll(&mut conn, company_id, id).await?;
    let items = fetch_payroll_items(&mut conn, payroll.id).await?;
    Ok(PayRollDetail { payroll, items })
}

pub async fn list_payrolls(
    pool: &SqlitePool,
    company_id: i64,
    filter: &PayrollFilter,
    page: &Pagination,
) -> Result<Page<PayRoll>, sqlx::Error> {
    let term = search_term(filter);
    page_of(
        pool,
        "payrolls",
        company_id,
        |query| {
            if let Some(term) = &term {
                query.push(" AND description LIKE ");
                query.push_bind(term.clone());
                query.push(" ESCAPE '\\'");
            }
        },
        page,
    )
    .await
}

pub async fn delete_payrolls(pool: &SqlitePool, company_id: i64, ids: &[i64]) -> Result<u64, AppError> {
    Ok(delete_scoped(pool, "payrolls", "company_id", company_id, ids).await?)
}
