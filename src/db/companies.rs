use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    db::delete_scoped,
    errors::AppError,
    structs::Company,
    tenancy::{role_of, Role},
    utils::{contains_pattern, now_timestamp, require_non_empty, Page, Pagination},
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewCompany {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyRename {
    pub id: i64,
    pub name: String,
}

pub async fn create_company(
    pool: &SqlitePool,
    owner_id: i64,
    input: NewCompany,
) -> Result<Company, AppError> {
    require_non_empty("name", &input.name)?;
    let now = now_timestamp();
    let company = sqlx::query_as::<_, Company>(
        "INSERT INTO companies (name, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(input.name.trim())
    .bind(owner_id)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;
    log::info!("Company created: {:?}", company);
    Ok(company)
}

pub async fn rename_company(
    pool: &SqlitePool,
    owner_id: i64,
    input: CompanyRename,
) -> Result<Company, AppError> {
    require_non_empty("name", &input.name)?;
    sqlx::query_as::<_, Company>(
        "UPDATE companies SET name = ?, updated_at = ? WHERE id = ? AND owner_id = ? RETURNING *",
    )
    .bind(input.name.trim())
    .bind(now_timestamp())
    .bind(input.id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Company"))
}

pub async fn delete_companies(
    pool: &SqlitePool,
    owner_id: i64,
    ids: &[i64],
) -> Result<u64, AppError> {
    Ok(delete_scoped(pool, "companies", "owner_id", owner_id, ids).await?)
}

#[derive(Debug, Clone, Copy)]
enum Visibility {
    Owned(i64),
    Granted(i64),
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, visibility: Visibility, search: Option<&str>) {
    match visibility {
        Visibility::Owned(owner_id) => {
            query.push(" WHERE c.owner_id = ");
            query.push_bind(owner_id);
        }
        Visibility::Granted(user_id) => {
            query.push(" WHERE c.id IN (SELECT company_id FROM company_access_grants WHERE user_id = ");
            query.push_bind(user_id);
            query.push(")");
        }
    }
    if let Some(term) = search.filter(|term| !term.trim().is_empty()) {
        query.push(" AND c.name LIKE ");
        query.push_bind(contains_pattern(term.trim()));
        query.push(" ESCAPE '\\'");
    }
}

async fn page_companies(
    pool: &SqlitePool,
    visibility: Visibility,
    search: Option<&str>,
    page: &Pagination,
) -> Result<Page<Company>, sqlx::Error> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM companies c");
    push_filters(&mut count, visibility, search);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut query = QueryBuilder::new("SELECT c.* FROM companies c");
    push_filters(&mut query, visibility, search);
    query.push(" ORDER BY c.id LIMIT ");
    query.push_bind(page.limit());
    query.push(" OFFSET ");
    query.push_bind(page.offset());
    let results = query.build_query_as::<Company>().fetch_all(pool).await?;

    Ok(Page {
        count: total,
        results,
    })
}

/// Owners see the companies they own, delegates the companies granted to them.
pub async fn list_companies(
    pool: &SqlitePool,
    user_id: i64,
    search: Option<&str>,
    page: &Pagination,
) -> Result<Page<Company>, AppError> {
    let mut conn = pool.acquire().await?;
    let role = role_of(&mut conn, user_id).await?;
    drop(conn);
    let visibility = match role {
        Role::Owner => Visibility::Owned(user_id),
        Role::Delegate { .. } => Visibility::Granted(user_id),
    };
    Ok(page_companies(pool, visibility, search, page).await?)
}

/// Companies an admin has granted to one of their sub-users.
pub async fn list_user_companies(
    pool: &SqlitePool,
    admin_id: i64,
    user_id: i64,
) -> Result<Vec<Company>, AppError> {
    let is_sub_user: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM profiles WHERE user_id = ? AND admin_id = ?)",
    )
    .bind(user_id)
    .bind(admin_id)
    .fetch_one(pool)
    .await?;
    if !is_sub_user {
        return Err(AppError::Unauthorized(
            "you dont have permission for this user".to_owned(),
        ));
    }
    Ok(sqlx::query_as::<_, Company>(
        "SELECT c.* FROM companies c JOIN company_access_grants g ON g.company_id = c.id \
         WHERE g.user_id = ? ORDER BY c.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}
