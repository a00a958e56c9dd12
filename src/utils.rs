use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::AppError;

pub const ONE_TIME_TOKEN_LEN: usize = 48;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    Argon2::default()
        .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))
        .map(|hash| hash.to_string())
        .map_err(|e| {
            log::error!("Failed to hash password: {}", e);
            AppError::PasswordError(e.to_string())
        })
}

pub fn verify_password(provided: &str, stored_hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| {
        log::error!("Stored password hash is malformed: {}", e);
        AppError::PasswordError(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(provided.as_bytes(), &parsed)
        .is_ok())
}

/// Random alphanumeric token for activation and password-reset links.
pub fn generate_token() -> String {
    rand::rngs::OsRng
        .sample_iter(&Alphanumeric)
        .take(ONE_TIME_TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub fn validate_email(email: &str) -> Result<(), AppError> {
    let trimmed = email.trim();
    let valid = match trimmed.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !trimmed.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::validation("email", "Enter a valid email address."))
    }
}

pub fn validate_password(field: &str, password: &str) -> Result<(), AppError> {
    if password.len() < 8 {
        return Err(AppError::validation(
            field,
            "Password must be at least 8 characters long",
        ));
    }
    if password.len() > 128 {
        return Err(AppError::validation(
            field,
            "Password must be at most 128 characters long",
        ));
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::validation(field, "This password is entirely numeric."));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) || !password.chars().any(char::is_alphabetic)
    {
        return Err(AppError::validation(
            field,
            "Password must contain at least one number and one letter",
        ));
    }
    Ok(())
}

pub fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(field, "This field may not be blank."));
    }
    Ok(())
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_string()
}

/// Money columns hold ten digits, two of them after the decimal point.
const MAX_AMOUNT: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

/// Rejects amounts that a `NUMERIC(10, 2)` column could not hold.
pub fn validate_amount(field: &str, amount: Decimal) -> Result<Decimal, AppError> {
    if amount < Decimal::ZERO {
        return Err(AppError::validation(
            field,
            "Ensure this value is greater than or equal to 0.",
        ));
    }
    if amount.scale() > 2 {
        return Err(AppError::validation(
            field,
            "Ensure that there are no more than 2 decimal places.",
        ));
    }
    if amount >= MAX_AMOUNT {
        return Err(AppError::validation(
            field,
            "Ensure that there are no more than 8 digits before the decimal point.",
        ));
    }
    Ok(amount)
}

/// `amount * rate / 100`, rounded half-up to cents.
pub fn percentage_of(field: &str, amount: Decimal, rate: Decimal) -> Result<Decimal, AppError> {
    let mut value = amount
        .checked_mul(rate)
        .and_then(|product| product.checked_div(Decimal::ONE_HUNDRED))
        .ok_or_else(|| AppError::validation(field, "Ensure this value is a valid amount."))?
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    value.rescale(2);
    Ok(value)
}

/// Reads a stored tax rate. A missing rate is zero; a malformed one is a
/// data error and fails the request.
pub fn parse_rate(column: &str, raw: Option<&str>) -> Result<Decimal, AppError> {
    let Some(raw) = raw else {
        return Ok(Decimal::ZERO);
    };
    raw.trim().parse().map_err(|e| {
        log::error!("Stored {} rate {:?} is not a decimal: {}", column, raw, e);
        AppError::ConfigError(format!("tax table holds an invalid {column} rate"))
    })
}

/// For `Option<Option<T>>` patch fields: a missing key stays `None`, an
/// explicit `null` becomes `Some(None)` so the column can be cleared.
/// Use with `#[serde(default, deserialize_with = "nullable")]`.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub const DEFAULT_PAGE_LIMIT: i64 = 25;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Limit/offset page envelope returned by list endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: i64,
    pub results: Vec<T>,
}

/// `LIKE` pattern for a case-insensitive "contains" search.
pub fn contains_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
