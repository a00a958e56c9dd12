use std::env;

use crate::errors::AppError;

/// Runtime settings, read from the environment (and `.env` via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expiration_secs: i64,
    pub jwt_refresh_window_secs: i64,
    pub frontend_protocol: String,
    pub frontend_domain: String,
    pub mail_from: String,
    pub templates_dir: String,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Where the Tera email templates live. `TEMPLATES` loads before the rest of
/// the config is validated, so this one is readable on its own.
pub fn templates_dir() -> String {
    var_or("TEMPLATES_DIR", "templates")
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::ConfigError(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let jwt_secret = env::var("JWT_SECRET").map_err(|e| {
            log::error!("FATAL: JWT_SECRET environment variable not set");
            AppError::EnvVarError(e)
        })?;
        if jwt_secret.len() < 32 {
            return Err(AppError::ConfigError(
                "JWT_SECRET must be at least 32 bytes long".to_owned(),
            ));
        }

        Ok(Config {
            database_url: var_or("DATABASE_URL", "sqlite://booster_ledger.db"),
            bind_addr: var_or("BIND_ADDR", "0.0.0.0"),
            port: parse_var("PORT", 8080)?,
            jwt_secret,
            jwt_expiration_secs: parse_var("JWT_EXPIRATION_SECS", 60 * 60 * 24)?,
            jwt_refresh_window_secs: parse_var("JWT_REFRESH_WINDOW_SECS", 60 * 60 * 24 * 7)?,
            frontend_protocol: var_or("FRONTEND_PROTOCOL", "http"),
            frontend_domain: var_or("FRONTEND_DOMAIN", "localhost:3000"),
            mail_from: var_or("MAIL_FROM", "no-reply@booster-ledger.local"),
            templates_dir: templates_dir(),
        })
    }

    /// Builds an absolute link into the frontend, e.g. `/activate/activation_key=...`.
    pub fn frontend_link(&self, path: &str) -> String {
        format!(
            "{}://{}{}",
            self.frontend_protocol, self.frontend_domain, path
        )
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Config {
            database_url: "sqlite::memory:".to_owned(),
            bind_addr: "127.0.0.1".to_owned(),
            port: 0,
            jwt_secret: "test-secret-test-secret-test-secret!".to_owned(),
            jwt_expiration_secs: 300,
            jwt_refresh_window_secs: 3600,
            frontend_protocol: "https".to_owned(),
            frontend_domain: "portal.test".to_owned(),
            mail_from: "no-reply@portal.test".to_owned(),
            templates_dir: "templates".to_owned(),
        }
    }
}
