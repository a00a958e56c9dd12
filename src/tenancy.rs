//! Company-scoped access control.
//!
//! Admins own companies. Sub-users reach a company only through a
//! `company_access_grants` row, and each company is granted to at most one
//! sub-user at a time (enforced by a UNIQUE index on `company_id`).
//! Handlers receive the active company as a [`CompanyContext`] built from
//! the `X-Company-Id` header; nothing about it is stored between requests.

use std::collections::BTreeSet;

use actix_web::{dev::Payload, web::Data, FromRequest, HttpRequest};
use futures_util::future::LocalBoxFuture;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    auth::{authenticate_request, AuthUser},
    db::begin_write,
    errors::AppError,
    structs::Company,
    utils::now_timestamp,
    AppState,
};

pub const COMPANY_HEADER: &str = "X-Company-Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Delegate { owner_id: i64 },
}

impl Role {
    pub fn from_parts(is_admin: bool, admin_id: Option<i64>) -> Result<Role, AppError> {
        match (is_admin, admin_id) {
            (true, _) => Ok(Role::Owner),
            (false, Some(owner_id)) => Ok(Role::Delegate { owner_id }),
            (false, None) => Err(AppError::Forbidden(
                "This account is not attached to any admin.".to_owned(),
            )),
        }
    }
}

pub async fn role_of(conn: &mut SqliteConnection, user_id: i64) -> Result<Role, AppError> {
    let row: Option<(bool, Option<i64>)> = sqlx::query_as(
        "SELECT u.is_admin, p.admin_id FROM users u LEFT JOIN profiles p ON p.user_id = u.id WHERE u.id = ?",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    let (is_admin, admin_id) = row.ok_or_else(|| AppError::not_found("User"))?;
    Role::from_parts(is_admin, admin_id)
}

pub async fn get_company(
    conn: &mut SqliteConnection,
    company_id: i64,
) -> Result<Option<Company>, sqlx::Error> {
    sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE id = ?")
        .bind(company_id)
        .fetch_optional(&mut *conn)
        .await
}

async fn has_grant(
    conn: &mut SqliteConnection,
    user_id: i64,
    company_id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM company_access_grants WHERE user_id = ? AND company_id = ?)",
    )
    .bind(user_id)
    .bind(company_id)
    .fetch_one(&mut *conn)
    .await
}

/// Returns the company if `user_id` may work inside it.
pub async fn resolve_company(
    pool: &SqlitePool,
    user_id: i64,
    company_id: i64,
) -> Result<(Role, Company), AppError> {
    let mut conn = pool.acquire().await?;
    let role = role_of(&mut conn, user_id).await?;
    let company = get_company(&mut conn, company_id)
        .await?
        .ok_or_else(|| AppError::not_found("Company"))?;

    let allowed = match role {
        Role::Owner => company.owner_id == user_id,
        Role::Delegate { owner_id } => {
            company.owner_id == owner_id && has_grant(&mut conn, user_id, company.id).await?
        }
    };
    if !allowed {
        log::warn!("User {} denied access to company {}", user_id, company_id);
        return Err(AppError::Forbidden(
            "You do not have access to this company.".to_owned(),
        ));
    }
    Ok((role, company))
}

/// The authenticated caller together with the company the request works on.
#[derive(Debug, Clone)]
pub struct CompanyContext {
    pub user: AuthUser,
    pub role: Role,
    pub company: Company,
}

impl CompanyContext {
    pub fn company_id(&self) -> i64 {
        self.company.id
    }
}

fn company_id_from_header(req: &HttpRequest) -> Result<i64, AppError> {
    req.headers()
        .get(COMPANY_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .ok_or_else(|| AppError::validation("company", "A company must be selected."))
}

impl FromRequest for CompanyContext {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let user = authenticate_request(req);
        let company_id = company_id_from_header(req);
        let state = req.app_data::<Data<AppState>>().cloned();
        Box::pin(async move {
            let user = user?;
            let company_id = company_id?;
            let state = state.ok_or_else(|| {
                AppError::ConfigError("application state is not registered".to_owned())
            })?;
            let (role, company) = resolve_company(&state.db_pool, user.id, company_id).await?;
            Ok(CompanyContext {
                user,
                role,
                company,
            })
        })
    }
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct GrantOutcome {
    pub granted: Vec<i64>,
    pub revoked: Vec<i64>,
    pub skipped: Vec<i64>,
}

/// Replaces `sub_user_id`'s grant set with the listed companies `admin_id` owns.
///
/// Companies already granted to someone else are skipped, existing grants of
/// this sub-user stay as they are, and grants missing from the list are
/// revoked.
pub async fn grant_company_access(
    pool: &SqlitePool,
    admin_id: i64,
    sub_user_id: i64,
    company_ids: &[i64],
) -> Result<GrantOutcome, AppError> {
    let mut tx = begin_write(pool).await?;

    let owner: Option<Option<i64>> =
        sqlx::query_scalar("SELECT admin_id FROM profiles WHERE user_id = ?")
            .bind(sub_user_id)
            .fetch_optional(&mut *tx)
            .await?;
    match owner {
        None => return Err(AppError::not_found("User")),
        Some(owner) if owner != Some(admin_id) => {
            return Err(AppError::Unauthorized(
                "you dont have permission for this user".to_owned(),
            ))
        }
        Some(_) => {}
    }

    let requested: BTreeSet<i64> = company_ids.iter().copied().collect();
    let already: BTreeSet<i64> = sqlx::query_scalar::<_, i64>(
        "SELECT company_id FROM company_access_grants WHERE user_id = ?",
    )
    .bind(sub_user_id)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .collect();

    let mut outcome = GrantOutcome::default();
    let created_at = now_timestamp();
    for &company_id in &requested {
        if already.contains(&company_id) {
            continue;
        }
        let owned: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM companies WHERE id = ? AND owner_id = ?)",
        )
        .bind(company_id)
        .bind(admin_id)
        .fetch_one(&mut *tx)
        .await?;
        if !owned {
            outcome.skipped.push(company_id);
            continue;
        }
        let inserted = sqlx::query(
            "INSERT INTO company_access_grants (user_id, company_id, created_at) VALUES (?, ?, ?) ON CONFLICT(company_id) DO NOTHING",
        )
        .bind(sub_user_id)
        .bind(company_id)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            outcome.skipped.push(company_id);
        } else {
            outcome.granted.push(company_id);
        }
    }

    for &company_id in already.difference(&requested) {
        sqlx::query("DELETE FROM company_access_grants WHERE user_id = ? AND company_id = ?")
            .bind(sub_user_id)
            .bind(company_id)
            .execute(&mut *tx)
            .await?;
        outcome.revoked.push(company_id);
    }

    tx.commit().await?;
    log::info!(
        "Admin {} updated grants of user {}: granted {:?}, revoked {:?}, skipped {:?}",
        admin_id,
        sub_user_id,
        outcome.granted,
        outcome.revoked,
        outcome.skipped
    );
    Ok(outcome)
}
