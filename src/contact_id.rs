//! Accounting codes for contacts.
//!
//! Each contact type owns a prefix in the chart of accounts (4300 clients,
//! 4000 providers, ...) and its own sequence in `contact_id_sequences`.

use sqlx::SqliteConnection;

use crate::errors::AppError;

pub type Generator = fn(i64) -> String;

static GENERATORS: &[(&str, Generator)] = &[
    ("client", client_code),
    ("provider", provider_code),
    ("creditor", creditor_code),
    ("debitor", debitor_code),
];

fn account_code(prefix: &str, seq: i64) -> String {
    format!("{prefix}{seq:04}")
}

fn client_code(seq: i64) -> String {
    account_code("4300", seq)
}

fn provider_code(seq: i64) -> String {
    account_code("4000", seq)
}

fn creditor_code(seq: i64) -> String {
    account_code("4100", seq)
}

fn debitor_code(seq: i64) -> String {
    account_code("4400", seq)
}

pub fn generator_for(contact_type: &str) -> Option<Generator> {
    let key = contact_type.to_lowercase();
    GENERATORS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, generate)| *generate)
}

/// Draws the next code for `contact_type`. Runs on the caller's connection so
/// the sequence bump rolls back with the rest of a failed transaction.
pub async fn assign_contact_id(
    conn: &mut SqliteConnection,
    contact_type: &str,
) -> Result<String, AppError> {
    let generate = generator_for(contact_type)
        .ok_or_else(|| AppError::validation("contact_type", "Unsupported contact type."))?;
    let seq: i64 = sqlx::query_scalar(
        "INSERT INTO contact_id_sequences (contact_type, next_value) VALUES (?, 1) \
         ON CONFLICT(contact_type) DO UPDATE SET next_value = next_value + 1 \
         RETURNING next_value",
    )
    .bind(contact_type.to_lowercase())
    .fetch_one(&mut *conn)
    .await?;
    Ok(generate(seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_state;

    #[test]
    fn known_types_have_generators() {
        let client = generator_for("Client").expect("client generator");
        assert_eq!(client(1), "43000001");
        let provider = generator_for("provider").expect("provider generator");
        assert_eq!(provider(42), "40000042");
        assert!(generator_for("Income").is_none());
    }

    #[tokio::test]
    async fn sequences_advance_per_type() {
        let (state, _) = test_state().await;
        let mut conn = state.db_pool.acquire().await.expect("conn");

        let first = assign_contact_id(&mut conn, "Client").await.expect("first");
        let second = assign_contact_id(&mut conn, "Client").await.expect("second");
        let provider = assign_contact_id(&mut conn, "Provider").await.expect("provider");

        assert_eq!(first, "43000001");
        assert_eq!(second, "43000002");
        assert_eq!(provider, "40000001");
    }

    #[tokio::test]
    async fn unknown_type_is_a_validation_error() {
        let (state, _) = test_state().await;
        let mut conn = state.db_pool.acquire().await.expect("conn");
        assert!(matches!(
            assign_contact_id(&mut conn, "Income").await,
            Err(AppError::Validation { .. })
        ));
    }
}
