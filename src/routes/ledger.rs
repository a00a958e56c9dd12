//! One set of handlers serves `/expenses`, `/purchases` and `/assets`; the
//! first path segment picks the [`LedgerKind`].

use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use serde_json::Value;

use crate::{
    db::ledger::{self, LedgerFilter, LedgerKind, LedgerPatch, NewLedgerEntry},
    errors::AppError,
    routes::id_list,
    tenancy::CompanyContext,
    utils::Pagination,
    AppState,
};

fn kind_of(segment: &str) -> Result<LedgerKind, AppError> {
    LedgerKind::from_segment(segment).ok_or_else(|| AppError::NotFound("Not found.".to_owned()))
}

#[get("/{kind:expenses|purchases|assets}")]
pub async fn list_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<String>,
    page: web::Query<Pagination>,
    filter: web::Query<LedgerFilter>,
) -> Result<impl Responder, AppError> {
    let kind = kind_of(&path)?;
    let entries = ledger::list_entries(&state.db_pool, kind, ctx.company_id(), &filter, &page).await?;
    Ok(HttpResponse::Ok().json(entries))
}

#[post("/{kind:expenses|purchases|assets}")]
pub async fn create_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<String>,
    web::Json(input): web::Json<NewLedgerEntry>,
) -> Result<impl Responder, AppError> {
    let kind = kind_of(&path)?;
    let detail = ledger::create_entry(&state.db_pool, kind, &ctx.company, input).await?;
    Ok(HttpResponse::Created().json(detail))
}

#[delete("/{kind:expenses|purchases|assets}")]
pub async fn delete_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<Value>,
) -> Result<impl Responder, AppError> {
    let kind = kind_of(&path)?;
    let ids = id_list(&body, kind.list_key())?;
    ledger::delete_entries(&state.db_pool, kind, ctx.company_id(), &ids).await?;
    log::info!(
        "User {} ({:?}) deleted {} {:?} in company {}",
        ctx.user.id,
        ctx.role,
        kind.label(),
        ids,
        ctx.company_id()
    );
    Ok(HttpResponse::NoContent().finish())
}

#[get("/{kind:expenses|purchases|assets}/{id:\\d+}")]
pub async fn detail_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<(String, i64)>,
) -> Result<impl Responder, AppError> {
    let (segment, id) = path.into_inner();
    let kind = kind_of(&segment)?;
    let detail = ledger::get_entry(&state.db_pool, kind, ctx.company_id(), id).await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[patch("/{kind:expenses|purchases|assets}/{id:\\d+}")]
pub async fn update_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<(String, i64)>,
    web::Json(patch): web::Json<LedgerPatch>,
) -> Result<impl Responder, AppError> {
    let (segment, id) = path.into_inner();
    let kind = kind_of(&segment)?;
    let detail = ledger::update_entry(&state.db_pool, kind, &ctx.company, id, patch).await?;
    Ok(HttpResponse::Ok().json(detail))
}
