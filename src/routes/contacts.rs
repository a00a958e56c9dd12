use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use serde_json::Value;

use crate::{
    db::contacts::{self, ContactFilter, ContactPatch, NewContact},
    errors::AppError,
    routes::id_list,
    tenancy::CompanyContext,
    utils::Pagination,
    AppState,
};

#[get("/contacts/for-expense/{lookup}")]
pub async fn for_expense_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<impl Responder, AppError> {
    let contacts =
        contacts::list_contacts_for_expense(&state.db_pool, ctx.company_id(), &path).await?;
    Ok(HttpResponse::Ok().json(contacts))
}

#[get("/contacts/clients")]
pub async fn clients_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
) -> Result<impl Responder, AppError> {
    let clients = contacts::list_clients(&state.db_pool, ctx.company_id()).await?;
    Ok(HttpResponse::Ok().json(clients))
}

#[get("/contacts/clients/{id}")]
pub async fn client_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let client = contacts::get_client(&state.db_pool, ctx.company_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(client))
}

#[get("/contacts")]
pub async fn list_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    page: web::Query<Pagination>,
    filter: web::Query<ContactFilter>,
) -> Result<impl Responder, AppError> {
    let contacts = contacts::list_contacts(&state.db_pool, ctx.company_id(), &filter, &page).await?;
    Ok(HttpResponse::Ok().json(contacts))
}

#[post("/contacts")]
pub async fn create_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    web::Json(input): web::Json<NewContact>,
) -> Result<impl Responder, AppError> {
    let contact = contacts::create_contact(&state.db_pool, &ctx.company, input).await?;
    Ok(HttpResponse::Created().json(contact))
}

#[delete("/contacts")]
pub async fn delete_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<impl Responder, AppError> {
    let ids = id_list(&body, "contact_list")?;
    contacts::delete_contacts(&state.db_pool, ctx.company_id(), &ids).await?;
    log::info!(
        "User {} ({:?}) deleted contacts {:?} in company {}",
        ctx.user.id,
        ctx.role,
        ids,
        ctx.company_id()
    );
    Ok(HttpResponse::NoContent().finish())
}

#[get("/contacts/{id:\\d+}")]
pub async fn detail_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let contact = contacts::get_contact(&state.db_pool, ctx.company_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(contact))
}

#[patch("/contacts/{id:\\d+}")]
pub async fn update_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    web::Json(patch): web::Json<ContactPatch>,
) -> Result<impl Responder, AppError> {
    let contact =
        contacts::update_contact(&state.db_pool, &ctx.company, path.into_inner(), patch).await?;
    Ok(HttpResponse::Ok().json(contact))
}
