use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use sqlx::Error as SqlxError;
use std::env::VarError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Authentication(String),

    #[error("Oops, Your email is not verified. Kindly verify your email to continue.")]
    AccountNotVerified,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("token is expired or already used")]
    TokenConsumed,

    #[error("token is not valid")]
    TokenUnknown,

    #[error("Password error: {0}")]
    PasswordError(String),

    #[error("Template error: {0}")]
    TemplateError(#[from] tera::Error),

    #[error("Token encoding error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] VarError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] SqlxError),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{what} not found."))
    }

    fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Maps a unique-constraint violation to a field-level validation error,
/// leaving every other database error untouched.
pub fn unique_violation_as(err: SqlxError, field: &str, message: &str) -> AppError {
    match &err {
        SqlxError::Database(db_err) if db_err.is_unique_violation() => {
            AppError::validation(field, message)
        }
        _ => AppError::SqlxError(err),
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::AccountNotVerified => StatusCode::NOT_ACCEPTABLE,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TokenConsumed => StatusCode::FORBIDDEN,
            AppError::TokenUnknown => StatusCode::BAD_REQUEST,
            AppError::PasswordError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::TemplateError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::JwtError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::EnvVarError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::SqlxError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::Validation { field, message } => {
                let mut fields = serde_json::Map::new();
                fields.insert(field.clone(), json!(message));
                serde_json::Value::Object(fields)
            }
            _ if self.is_internal() => {
                log::error!("Request failed: {}", self);
                json!({ "message": "Internal server error" })
            }
            _ => json!({ "message": self.to_string() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<AppError> for std::io::Error {
    fn from(err: AppError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
    }
}
