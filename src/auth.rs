//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs. `orig_iat` survives refreshes so a session cannot be
//! extended forever: once `now - orig_iat` passes the refresh window the
//! client has to log in again.

use std::future::{ready, Ready};

use actix_web::{dev::Payload, http::header, web::Data, FromRequest, HttpRequest};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{config::Config, errors::AppError, structs::Account, AppState};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
    pub orig_iat: i64,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiration_secs: i64,
    refresh_window_secs: i64,
}

impl TokenService {
    pub fn new(config: &Config) -> Self {
        let secret = config.jwt_secret.as_bytes();
        let mut validation = Validation::default();
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            expiration_secs: config.jwt_expiration_secs,
            refresh_window_secs: config.jwt_refresh_window_secs,
        }
    }

    pub fn issue(&self, account: &Account) -> Result<String, AppError> {
        self.issue_with_origin(account, chrono::Utc::now().timestamp())
    }

    fn issue_with_origin(&self, account: &Account, orig_iat: i64) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: account.id.to_string(),
            user_id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            is_admin: account.is_admin,
            iat: now,
            exp: now + self.expiration_secs,
            orig_iat,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                log::debug!("Rejected bearer token: {}", e);
                AppError::Authentication("Invalid or expired token.".to_owned())
            })
    }

    /// Re-issues a token for `account`, keeping the original login time.
    pub fn refresh(&self, claims: &Claims, account: &Account) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();
        if now - claims.orig_iat > self.refresh_window_secs {
            return Err(AppError::Authentication("Refresh has expired.".to_owned()));
        }
        self.issue_with_origin(account, claims.orig_iat)
    }
}

/// The caller identified by a valid `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub is_admin: bool,
    pub claims: Claims,
}

/// An authenticated caller whose token says they are an admin.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl AdminUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }
}

pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn authenticate_request(req: &HttpRequest) -> Result<AuthUser, AppError> {
    let state = req
        .app_data::<Data<AppState>>()
        .ok_or_else(|| AppError::ConfigError("application state is not registered".to_owned()))?;
    let token = bearer_token(req).ok_or_else(|| {
        AppError::Authentication("Authentication credentials were not provided.".to_owned())
    })?;
    let claims = state.tokens.decode(token)?;
    Ok(AuthUser {
        id: claims.user_id,
        is_admin: claims.is_admin,
        claims,
    })
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate_request(req))
    }
}

impl FromRequest for AdminUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate_request(req).and_then(|user| {
            if user.is_admin {
                Ok(AdminUser(user))
            } else {
                Err(AppError::Forbidden(
                    "You do not have permission to perform this action.".to_owned(),
                ))
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            id: 7,
            username: "owner".to_owned(),
            email: "owner@acme.es".to_owned(),
            pwd_hash: String::new(),
            is_admin: true,
            first_name: "Ana".to_owned(),
            last_name: "Lopez".to_owned(),
            picture: None,
            is_active: true,
            admin_id: None,
        }
    }

    #[test]
    fn issued_token_decodes_to_the_account() {
        let tokens = TokenService::new(&Config::for_tests());
        let token = tokens.issue(&account()).expect("issue");
        let claims = tokens.decode(&token).expect("decode");
        assert_eq!(claims.user_id, 7);
        assert!(claims.is_admin);
        assert_eq!(claims.orig_iat, claims.iat);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let tokens = TokenService::new(&Config::for_tests());
        let mut token = tokens.issue(&account()).expect("issue");
        token.push('x');
        assert!(matches!(
            tokens.decode(&token),
            Err(AppError::Authentication(_))
        ));
    }

    #[test]
    fn refresh_keeps_origin_and_respects_window() {
        let tokens = TokenService::new(&Config::for_tests());
        let token = tokens.issue(&account()).expect("issue");
        let claims = tokens.decode(&token).expect("decode");

        let refreshed = tokens.refresh(&claims, &account()).expect("refresh");
        let refreshed_claims = tokens.decode(&refreshed).expect("decode");
        assert_eq!(refreshed_claims.orig_iat, claims.orig_iat);

        let stale = Claims {
            orig_iat: claims.orig_iat - 7200,
            ..claims
        };
        assert!(matches!(
            tokens.refresh(&stale, &account()),
            Err(AppError::Authentication(_))
        ));
    }
}
