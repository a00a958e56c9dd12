use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::errors::AppError;

pub mod accounts;
pub mod companies;
pub mod contacts;
pub mod ledger;
pub mod lookups;
pub mod payroll;

/// `BEGIN IMMEDIATE`: the write lock is taken before the first read, so a
/// uniqueness check and the write it guards see no other writer. Waiting for
/// the lock is bounded by the connection's `busy_timeout`.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    pool.begin_with("BEGIN IMMEDIATE").await
}

/// Deletes the listed ids from `table`, restricted to rows whose
/// `scope_column` equals `scope_id`. Ids belonging to another scope are
/// ignored. Returns the number of rows removed.
pub async fn delete_scoped(
    pool: &SqlitePool,
    table: &'static str,
    scope_column: &'static str,
    scope_id: i64,
    ids: &[i64],
) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("DELETE FROM {table} WHERE {scope_column} = "));
    query.push_bind(scope_id);
    query.push(" AND id IN (");
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let deleted = query.build().execute(pool).await?.rows_affected();
    log::info!(
        "Deleted {} of {} requested rows from {} ({} = {})",
        deleted,
        ids.len(),
        table,
        scope_column,
        scope_id
    );
    Ok(deleted)
}

/// Whether `table` has a row `id` inside `company_id`.
pub async fn exists_in_company(
    conn: &mut SqliteConnection,
    table: &'static str,
    company_id: i64,
    id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(&format!(
        "SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ? AND company_id = ?)"
    ))
    .bind(id)
    .bind(company_id)
    .fetch_one(&mut *conn)
    .await
}

pub async fn exists(
    conn: &mut SqliteConnection,
    table: &'static str,
    id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?)"))
        .bind(id)
        .fetch_one(&mut *conn)
        .await
}

/// Fails with the usual "object does not exist" validation error when an
/// optional reference points nowhere.
pub async fn require_reference(
    conn: &mut SqliteConnection,
    table: &'static str,
    field: &str,
    id: Option<i64>,
) -> Result<(), AppError> {
    if let Some(id) = id {
        if !exists(conn, table, id).await? {
            return Err(invalid_pk(field, id));
        }
    }
    Ok(())
}

pub fn invalid_pk(field: &str, id: i64) -> AppError {
    AppError::validation(
        field,
        format!("Invalid pk \"{id}\" - object does not exist."),
    )
}

/// Name of a lookup value that must belong to `lookup_type`.
pub async fn lookup_name_of_type(
    conn: &mut SqliteConnection,
    lookup_type: &str,
    lookup_name_id: i64,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT ln.lookup_name FROM lookup_names ln \
         JOIN lookup_types lt ON lt.id = ln.lookup_type_id \
         WHERE ln.id = ? AND lt.lookup_type = ?",
    )
    .bind(lookup_name_id)
    .bind(lookup_type)
    .fetch_optional(&mut *conn)
    .await
}
