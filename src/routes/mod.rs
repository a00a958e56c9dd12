use actix_web::web;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::AppError;

pub mod auth;
pub mod companies;
pub mod contacts;
pub mod ledger;
pub mod lookups;
pub mod payroll;

/// `?search=` on list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

/// Reads the ids of a bulk delete body such as `{"contact_list": [1, 2]}`.
pub fn id_list(body: &Value, key: &str) -> Result<Vec<i64>, AppError> {
    let items = body
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::validation(key, "This field is required."))?;
    items
        .iter()
        .map(|item| {
            item.as_i64()
                .ok_or_else(|| AppError::validation(key, "Expected a list of ids."))
        })
        .collect()
}

fn json_error(err: actix_web::error::JsonPayloadError) -> actix_web::Error {
    log::debug!("Rejected JSON payload: {}", err);
    AppError::validation("non_field_errors", err.to_string()).into()
}

fn query_error(err: actix_web::error::QueryPayloadError) -> actix_web::Error {
    AppError::validation("query", err.to_string()).into()
}

fn path_error(err: actix_web::error::PathError) -> actix_web::Error {
    log::debug!("Unmatched path parameter: {}", err);
    AppError::NotFound("Not found.".to_owned()).into()
}

/// Mounts the whole JSON API under `/api`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _| json_error(err)))
        .app_data(web::QueryConfig::default().error_handler(|err, _| query_error(err)))
        .app_data(web::PathConfig::default().error_handler(|err, _| path_error(err)))
        .service(
            web::scope("/api")
                // auth
                .service(auth::register_handler)
                .service(auth::register_sub_user_handler)
                .service(auth::login_handler)
                .service(auth::refresh_handler)
                .service(auth::verify_email_handler)
                .service(auth::forgot_password_handler)
                .service(auth::reset_password_handler)
                .service(auth::change_password_handler)
                .service(auth::admin_change_password_handler)
                .service(auth::profile_handler)
                .service(auth::update_profile_handler)
                .service(auth::sub_users_handler)
                .service(auth::delete_sub_user_handler)
                .service(auth::user_companies_handler)
                // companies
                .service(companies::list_handler)
                .service(companies::create_handler)
                .service(companies::rename_handler)
                .service(companies::delete_handler)
                .service(companies::access_handler)
                // contacts, fixed paths before `{id}`
                .service(contacts::for_expense_handler)
                .service(contacts::clients_handler)
                .service(contacts::client_handler)
                .service(contacts::list_handler)
                .service(contacts::create_handler)
                .service(contacts::delete_handler)
                .service(contacts::detail_handler)
                .service(contacts::update_handler)
                // payroll
                .service(payroll::list_teams_handler)
                .service(payroll::create_team_handler)
                .service(payroll::delete_teams_handler)
                .service(payroll::team_handler)
                .service(payroll::update_team_handler)
                .service(payroll::list_employees_handler)
                .service(payroll::create_employee_handler)
                .service(payroll::delete_employees_handler)
                .service(payroll::employee_handler)
                .service(payroll::update_employee_handler)
                .service(payroll::list_payrolls_handler)
                .service(payroll::create_payroll_handler)
                .service(payroll::delete_payrolls_handler)
                .service(payroll::payroll_handler)
                .service(payroll::update_payroll_handler)
                // lookups
                .service(lookups::types_handler)
                .service(lookups::names_handler)
                .service(lookups::payroll_taxes_handler)
                .service(lookups::contact_taxes_handler)
                .service(lookups::account_types_handler)
                .service(lookups::payment_days_handler)
                // expenses, purchases, assets
                .service(ledger::list_handler)
                .service(ledger::create_handler)
                .service(ledger::delete_handler)
                .service(ledger::detail_handler)
                .service(ledger::update_handler),
        );
}
