//! Fixtures shared by the unit tests: an in-memory database with the real
//! migrations, a mailer that records instead of sending, and seed helpers.

use std::{
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tempfile::TempDir;

use crate::{
    auth::{AuthUser, TokenService},
    config::Config,
    db::{
        accounts::{get_account, register, Registration},
        companies::{create_company, NewCompany},
        contacts::{create_contact, NewContact},
    },
    errors::AppError,
    mailer::{EmailContent, Mailer},
    structs::{Account, Company, Contact},
    AppState,
};

pub const PASSWORD: &str = "Sup3rSecret";

/// `lookup_names` ids of the seeded contact types.
pub const CLIENT: i64 = 1;
pub const PROVIDER: i64 = 2;

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub content: EmailContent,
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SentEmail>>,
}

impl Mailer for RecordingMailer {
    fn send(
        &self,
        content: &EmailContent,
        subject: &str,
        to: &str,
        _template: &str,
    ) -> Result<(), AppError> {
        self.sent.lock().expect("mailer lock").push(SentEmail {
            to: to.to_owned(),
            subject: subject.to_owned(),
            content: content.clone(),
        });
        Ok(())
    }
}

fn state_with_pool(db_pool: SqlitePool) -> (AppState, Arc<RecordingMailer>) {
    let config = Config::for_tests();
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState {
        db_pool,
        tokens: Arc::new(TokenService::new(&config)),
        config: Arc::new(config),
        mailer: mailer.clone(),
    };
    (state, mailer)
}

/// A single connection keeps the in-memory database alive and shared.
pub async fn test_state() -> (AppState, Arc<RecordingMailer>) {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("sqlite options")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("in-memory pool");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    state_with_pool(pool)
}

/// A file database in WAL mode behind several connections, opened the way
/// `main` opens the real one, for tests that race writers. Keep the
/// returned directory alive until the test ends.
pub async fn concurrent_test_state() -> (AppState, Arc<RecordingMailer>, TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("ledger.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .expect("file pool");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    let (state, mailer) = state_with_pool(pool);
    (state, mailer, dir)
}

async fn seed_user(state: &AppState, username: &str, owner_id: Option<i64>) -> Account {
    let account = register(
        state,
        Registration {
            email: format!("{username}@acme.es"),
            username: username.to_owned(),
            password: PASSWORD.to_owned(),
            first_name: username.to_owned(),
            last_name: "Test".to_owned(),
        },
        owner_id,
    )
    .await
    .expect("register");
    sqlx::query("UPDATE profiles SET is_active = 1, is_activation_key_used = 1 WHERE user_id = ?")
        .bind(account.id)
        .execute(&state.db_pool)
        .await
        .expect("activate");
    let mut conn = state.db_pool.acquire().await.expect("conn");
    get_account(&mut conn, account.id)
        .await
        .expect("account")
        .expect("account exists")
}

/// A verified admin named `username` with email `{username}@acme.es`.
pub async fn seed_admin(state: &AppState, username: &str) -> Account {
    seed_user(state, username, None).await
}

pub async fn seed_sub_user(state: &AppState, admin_id: i64, username: &str) -> Account {
    seed_user(state, username, Some(admin_id)).await
}

pub async fn seed_company(state: &AppState, owner_id: i64, name: &str) -> Company {
    create_company(
        &state.db_pool,
        owner_id,
        NewCompany {
            name: name.to_owned(),
        },
    )
    .await
    .expect("company")
}

pub async fn seed_contact(state: &AppState, company: &Company, nif: &str, contact_type: i64) -> Contact {
    create_contact(
        &state.db_pool,
        company,
        NewContact {
            contact_type,
            name: format!("Contact {nif}"),
            nif: nif.to_owned(),
            email: None,
            phone: None,
            address: None,
            tax: None,
            account_type: None,
            payment_day: None,
        },
    )
    .await
    .expect("contact")
}

pub fn auth_user(state: &AppState, account: &Account) -> AuthUser {
    let token = state.tokens.issue(account).expect("token");
    let claims = state.tokens.decode(&token).expect("claims");
    AuthUser {
        id: account.id,
        is_admin: account.is_admin,
        claims,
    }
}

pub fn bearer(state: &AppState, account: &Account) -> (&'static str, String) {
    let token = state.tokens.issue(account).expect("token");
    ("Authorization", format!("Bearer {token}"))
}

/// The one-time token in the link of the last email sent to `to`, read
/// from just after `marker` (e.g. `"token="`).
pub fn last_token_sent_to(mailer: &RecordingMailer, to: &str, marker: &str) -> String {
    let sent = mailer.sent.lock().expect("mailer lock");
    let email = sent
        .iter()
        .rev()
        .find(|email| email.to == to)
        .unwrap_or_else(|| panic!("no email sent to {to}"));
    let link = email.content.link.as_deref().expect("email has a link");
    let (_, token) = link
        .split_once(marker)
        .unwrap_or_else(|| panic!("link {link} has no {marker}"));
    token.to_owned()
}
