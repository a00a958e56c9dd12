//! Reference data. These reads are public.

use actix_web::{get, web, HttpResponse, Responder};

use crate::{db::lookups, errors::AppError, AppState};

#[get("/lookups/types")]
pub async fn types_handler(state: web::Data<AppState>) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(lookups::list_lookup_types(&state.db_pool).await?))
}

#[get("/lookups/names/{lookup_type}")]
pub async fn names_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(lookups::list_lookup_names(&state.db_pool, &path).await?))
}

#[get("/lookups/payroll-taxes")]
pub async fn payroll_taxes_handler(state: web::Data<AppState>) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(lookups::list_payroll_taxes(&state.db_pool).await?))
}

#[get("/lookups/contact-taxes/{lookup_id}")]
pub async fn contact_taxes_handler(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let taxes = lookups::list_contact_taxes(&state.db_pool, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(taxes))
}

#[get("/lookups/account-types/{lookup_id}")]
pub async fn account_types_handler(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let account_types = lookups::list_account_types(&state.db_pool, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(account_types))
}

#[get("/lookups/payment-days")]
pub async fn payment_days_handler(state: web::Data<AppState>) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(lookups::list_payment_days(&state.db_pool).await?))
}
