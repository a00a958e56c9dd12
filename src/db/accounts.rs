use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::{
    auth::AuthUser,
    db::begin_write,
    errors::{unique_violation_as, AppError},
    mailer::{send_email, EmailContent},
    structs::{Account, SubUser},
    utils::{
        contains_pattern, generate_token, hash_password, now_timestamp, require_non_empty,
        validate_email, validate_password, verify_password, Page, Pagination,
    },
    AppState,
};

const ACCOUNT_SELECT: &str = "SELECT u.id, u.username, u.email, u.pwd_hash, u.is_admin, \
     p.first_name, p.last_name, p.picture, p.is_active, p.admin_id \
     FROM users u JOIN profiles p ON p.user_id = u.id";

const PORTAL_SUBTITLE: &str = "Booster Ledger: your business handled in one go";

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub email: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub picture: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileUpdated {
    Saved { message: String },
    EmailChanged { message: String },
}

pub async fn get_account(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!("{ACCOUNT_SELECT} WHERE u.id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
}

/// Finds an account by email first, then by username.
pub async fn find_account_by_login(
    pool: &SqlitePool,
    login: &str,
) -> Result<Option<Account>, sqlx::Error> {
    let by_email = sqlx::query_as::<_, Account>(&format!("{ACCOUNT_SELECT} WHERE u.email = ?"))
        .bind(login.to_lowercase())
        .fetch_optional(pool)
        .await?;
    if by_email.is_some() {
        return Ok(by_email);
    }
    sqlx::query_as::<_, Account>(&format!("{ACCOUNT_SELECT} WHERE u.username = ?"))
        .bind(login)
        .fetch_optional(pool)
        .await
}

fn welcome_email(state: &AppState, token: &str) -> EmailContent {
    EmailContent {
        title: "Thank you for registering with Booster Ledger".to_owned(),
        short_description: "These are the next steps.".to_owned(),
        subtitle: PORTAL_SUBTITLE.to_owned(),
        message: "You have successfully registered. Verify your email with the link below, \
                  then log in to your profile and start."
            .to_owned(),
        link: Some(
            state
                .config
                .frontend_link(&format!("/activate/activation_key={token}")),
        ),
        name: None,
    }
}

/// Creates a user with its profile. `owner_id` is `None` for a self-registered
/// admin and the admin's id for a sub-user.
pub async fn register(
    state: &AppState,
    registration: Registration,
    owner_id: Option<i64>,
) -> Result<Account, AppError> {
    require_non_empty("username", &registration.username)?;
    validate_email(&registration.email)?;
    validate_password("password", &registration.password)?;

    let email = registration.email.trim().to_lowercase();
    let username = registration.username.trim().to_owned();
    let pwd_hash = hash_password(&registration.password)?;
    let token = generate_token();
    let now = now_timestamp();

    let mut tx = begin_write(&state.db_pool).await?;

    let email_taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)")
        .bind(&email)
        .fetch_one(&mut *tx)
        .await?;
    if email_taken {
        return Err(AppError::validation("email", "This field must be unique."));
    }
    let username_taken: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)")
            .bind(&username)
            .fetch_one(&mut *tx)
            .await?;
    if username_taken {
        return Err(AppError::validation(
            "username",
            "A user with that username already exists.",
        ));
    }

    let user_id: i64 = sqlx::query_scalar(
        "INSERT INTO users (username, email, pwd_hash, is_admin, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&username)
    .bind(&email)
    .bind(&pwd_hash)
    .bind(owner_id.is_none())
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| unique_violation_as(e, "email", "This field must be unique."))?;

    sqlx::query(
        "INSERT INTO profiles (user_id, first_name, last_name, is_active, activation_key, is_activation_key_used, admin_id) \
         VALUES (?, ?, ?, 0, ?, 0, ?)",
    )
    .bind(user_id)
    .bind(registration.first_name.trim())
    .bind(registration.last_name.trim())
    .bind(&token)
    .bind(owner_id)
    .execute(&mut *tx)
    .await?;

    let account = get_account(&mut tx, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    tx.commit().await?;

    log::info!(
        "Registered {} {} ({})",
        if owner_id.is_none() { "admin" } else { "sub-user" },
        account.id,
        account.email
    );
    send_email(
        state.mailer.as_ref(),
        &welcome_email(state, &token),
        "Welcome to Booster Ledger",
        &account.email,
    );
    Ok(account)
}

/// Validates credentials and returns the account with a fresh token.
pub async fn login(
    state: &AppState,
    login: &str,
    password: &str,
) -> Result<(Account, String), AppError> {
    if login.trim().is_empty() || password.is_empty() {
        return Err(AppError::validation(
            "non_field_errors",
            "Must include \"email\" and \"password\".",
        ));
    }
    let invalid = || AppError::Authentication("Unable to log in with provided credentials.".to_owned());

    let account = find_account_by_login(&state.db_pool, login.trim())
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(password, &account.pwd_hash)? {
        log::warn!("Failed login for user {}", account.id);
        return Err(invalid());
    }
    if !account.is_active {
        return Err(AppError::AccountNotVerified);
    }
    let token = state.tokens.issue(&account)?;
    Ok((account, token))
}

pub async fn refresh(state: &AppState, user: &AuthUser) -> Result<(Account, String), AppError> {
    let mut conn = state.db_pool.acquire().await?;
    let account = get_account(&mut conn, user.id)
        .await?
        .ok_or_else(|| AppError::Authentication("User no longer exists.".to_owned()))?;
    if !account.is_active {
        return Err(AppError::AccountNotVerified);
    }
    let token = state.tokens.refresh(&user.claims, &account)?;
    Ok((account, token))
}

/// What the profile screen shows about the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub picture: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
}

impl From<Account> for ProfileView {
    fn from(account: Account) -> Self {
        ProfileView {
            id: account.id,
            username: account.username,
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            picture: account.picture,
            is_admin: account.is_admin,
            is_active: account.is_active,
        }
    }
}

pub async fn fetch_profile(pool: &SqlitePool, user_id: i64) -> Result<ProfileView, AppError> {
    let mut conn = pool.acquire().await?;
    get_account(&mut conn, user_id)
        .await?
        .map(ProfileView::from)
        .ok_or_else(|| AppError::not_found("User"))
}

/// Marks the one-time token used. Only one caller can win this update; the
/// loser learns whether the token was consumed or never existed.
async fn consume_token(
    conn: &mut SqliteConnection,
    token: &str,
    activate: bool,
) -> Result<i64, AppError> {
    let sql = if activate {
        "UPDATE profiles SET is_active = 1, is_activation_key_used = 1 \
         WHERE activation_key = ? AND is_activation_key_used = 0 RETURNING user_id"
    } else {
        "UPDATE profiles SET is_activation_key_used = 1 \
         WHERE activation_key = ? AND is_activation_key_used = 0 RETURNING user_id"
    };
    let consumed: Option<i64> = sqlx::query_scalar(sql)
        .bind(token)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(user_id) = consumed {
        return Ok(user_id);
    }
    let known: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM profiles WHERE activation_key = ?)")
            .bind(token)
            .fetch_one(&mut *conn)
            .await?;
    Err(if known {
        AppError::TokenConsumed
    } else {
        AppError::TokenUnknown
    })
}

pub async fn verify_email(state: &AppState, activation_key: &str) -> Result<(), AppError> {
    require_non_empty("activation_key", activation_key)?;
    let mut conn = state.db_pool.acquire().await?;
    let user_id = consume_token(&mut conn, activation_key.trim(), true).await?;
    log::info!("Email verified for user {}", user_id);
    Ok(())
}

pub async fn request_password_reset(state: &AppState, email: &str) -> Result<(), AppError> {
    require_non_empty("email", email)?;
    let email = email.trim().to_lowercase();
    let account = sqlx::query_as::<_, Account>(&format!("{ACCOUNT_SELECT} WHERE u.email = ?"))
        .bind(&email)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Email Not Exist".to_owned()))?;
    if !account.is_active {
        return Err(AppError::AccountNotVerified);
    }

    let token = generate_token();
    sqlx::query(
        "UPDATE profiles SET activation_key = ?, is_activation_key_used = 0 WHERE user_id = ?",
    )
    .bind(&token)
    .bind(account.id)
    .execute(&state.db_pool)
    .await?;

    let content = EmailContent {
        title: "Thank you for using Booster Ledger.".to_owned(),
        short_description: "You have requested password reset".to_owned(),
        subtitle: PORTAL_SUBTITLE.to_owned(),
        message: "The link below takes you to the portal, where you can enter a new password."
            .to_owned(),
        link: Some(
            state
                .config
                .frontend_link(&format!("/auth/reset-password/?token={token}")),
        ),
        name: Some(account.first_name.clone()),
    };
    send_email(state.mailer.as_ref(), &content, "Password Reset", &account.email);
    Ok(())
}

/// Consumes a reset token and stores the new password in one transaction.
pub async fn confirm_password_reset(
    state: &AppState,
    token: &str,
    password: &str,
) -> Result<Account, AppError> {
    require_non_empty("token", token)?;
    validate_password("password", password)?;
    let pwd_hash = hash_password(password)?;

    let mut tx = begin_write(&state.db_pool).await?;
    let user_id = consume_token(&mut tx, token.trim(), false).await?;
    sqlx::query("UPDATE users SET pwd_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&pwd_hash)
        .bind(now_timestamp())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    let account = get_account(&mut tx, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    tx.commit().await?;

    let content = EmailContent {
        title: "Thank you for using Booster Ledger.".to_owned(),
        short_description: "You have requested password reset".to_owned(),
        subtitle: "Your Password has been reset successfully.".to_owned(),
        message: "You can now log in with your new password.".to_owned(),
        link: None,
        name: Some(account.first_name.clone()),
    };
    send_email(
        state.mailer.as_ref(),
        &content,
        "Password Reset Confirm",
        &account.email,
    );
    Ok(account)
}

async fn store_password(pool: &SqlitePool, user_id: i64, password: &str) -> Result<(), AppError> {
    let pwd_hash = hash_password(password)?;
    sqlx::query("UPDATE users SET pwd_hash = ?, updated_at = ? WHERE id = ?")
        .bind(pwd_hash)
        .bind(now_timestamp())
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn change_password(
    state: &AppState,
    user_id: i64,
    old_password: &str,
    new_password: &str,
) -> Result<Account, AppError> {
    let mut conn = state.db_pool.acquire().await?;
    let account = get_account(&mut conn, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    drop(conn);

    if !verify_password(old_password, &account.pwd_hash)? {
        return Err(AppError::validation("old_password", "Wrong password."));
    }
    validate_password("new_password", new_password)?;
    store_password(&state.db_pool, account.id, new_password).await?;
    log::info!("Password changed for user {}", account.id);
    Ok(account)
}

/// Lets an admin reset one of their own sub-users' passwords.
pub async fn admin_change_user_password(
    state: &AppState,
    admin_id: i64,
    user_id: i64,
    new_password: &str,
) -> Result<Account, AppError> {
    validate_password("new_password", new_password)?;
    let mut conn = state.db_pool.acquire().await?;
    let account = get_account(&mut conn, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    drop(conn);

    if account.admin_id != Some(admin_id) {
        return Err(AppError::Unauthorized(
            "you are an unauthorized user to perform this action".to_owned(),
        ));
    }
    store_password(&state.db_pool, account.id, new_password).await?;
    log::info!("Admin {} changed password of user {}", admin_id, account.id);
    Ok(account)
}

pub async fn update_profile(
    state: &AppState,
    caller: &AuthUser,
    update: ProfileUpdate,
) -> Result<ProfileUpdated, AppError> {
    require_non_empty("first_name", &update.first_name)?;
    validate_email(&update.email)?;
    let email = update.email.trim().to_lowercase();

    let mut tx = begin_write(&state.db_pool).await?;
    let caller_account = get_account(&mut tx, caller.id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let mut message = format!(
        "Dear {} your Profile has been updated successfully",
        caller_account.first_name
    );
    let target = match update.user_id {
        Some(user_id) if caller_account.is_admin && user_id != caller.id => {
            let target = get_account(&mut tx, user_id)
                .await?
                .ok_or_else(|| AppError::not_found("User"))?;
            if target.admin_id != Some(caller.id) {
                return Err(AppError::Unauthorized(
                    "you are an unauthorized user to perform this action".to_owned(),
                ));
            }
            message = format!(
                "Dear admin, Profile of User named as {} has been updated successfully",
                target.first_name
            );
            target
        }
        _ => caller_account,
    };

    sqlx::query("UPDATE profiles SET first_name = ?, last_name = ?, picture = COALESCE(?, picture) WHERE user_id = ?")
        .bind(update.first_name.trim())
        .bind(update.last_name.trim())
        .bind(&update.picture)
        .bind(target.id)
        .execute(&mut *tx)
        .await?;

    if target.email == email {
        tx.commit().await?;
        return Ok(ProfileUpdated::Saved { message });
    }

    let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)")
        .bind(&email)
        .fetch_one(&mut *tx)
        .await?;
    if taken {
        return Err(AppError::validation("email", "Email should be unique."));
    }

    let token = generate_token();
    sqlx::query("UPDATE users SET email = ?, updated_at = ? WHERE id = ?")
        .bind(&email)
        .bind(now_timestamp())
        .bind(target.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_violation_as(e, "email", "Email should be unique."))?;
    sqlx::query(
        "UPDATE profiles SET is_active = 0, activation_key = ?, is_activation_key_used = 0 WHERE user_id = ?",
    )
    .bind(&token)
    .bind(target.id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    send_email(
        state.mailer.as_ref(),
        &welcome_email(state, &token),
        "Verify your new email",
        &email,
    );
    Ok(ProfileUpdated::EmailChanged {
        message: format!(
            "{message} Also as you have updated email so kindly check mailbox and verify your email"
        ),
    })
}

pub async fn list_sub_users(
    pool: &SqlitePool,
    admin_id: i64,
    search: Option<&str>,
    page: &Pagination,
) -> Result<Page<SubUser>, sqlx::Error> {
    fn push_filters<'a>(query: &mut QueryBuilder<'a, Sqlite>, admin_id: i64, search: Option<&str>) {
        query.push(" WHERE p.admin_id = ");
        query.push_bind(admin_id);
        if let Some(term) = search.filter(|term| !term.trim().is_empty()) {
            query.push(" AND p.first_name LIKE ");
            query.push_bind(contains_pattern(term.trim()));
            query.push(" ESCAPE '\\'");
        }
    }

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users u JOIN profiles p ON p.user_id = u.id");
    push_filters(&mut count, admin_id, search);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut query = QueryBuilder::new(
        "SELECT u.id, u.username, u.email, p.first_name, p.last_name, p.is_active \
         FROM users u JOIN profiles p ON p.user_id = u.id",
    );
    push_filters(&mut query, admin_id, search);
    query.push(" ORDER BY u.id DESC LIMIT ");
    query.push_bind(page.limit());
    query.push(" OFFSET ");
    query.push_bind(page.offset());
    let results = query.build_query_as::<SubUser>().fetch_all(pool).await?;

    Ok(Page {
        count: total,
        results,
    })
}

/// Deletes a sub-user of `admin_id`. Admin accounts are never deleted here.
pub async fn delete_sub_user(pool: &SqlitePool, admin_id: i64, user_id: i64) -> Result<(), AppError> {
    let owner: Option<(bool, Option<i64>)> = sqlx::query_as(
        "SELECT u.is_admin, p.admin_id FROM users u JOIN profiles p ON p.user_id = u.id WHERE u.id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    match owner {
        None | Some((true, _)) => Err(AppError::not_found("User")),
        Some((false, admin)) if admin != Some(admin_id) => Err(AppError::Unauthorized(
            "you are not allowed to perform this action".to_owned(),
        )),
        Some(_) => {
            sqlx::query("DELETE FROM users WHERE id = ? AND is_admin = 0")
                .bind(user_id)
                .execute(pool)
                .await?;
            log::info!("Admin {} deleted user {}", admin_id, user_id);
            Ok(())
        }
    }
}
