use actix_web::{delete, get, post, put, web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    auth::{AdminUser, AuthUser},
    db::companies::{self, CompanyRename, NewCompany},
    errors::AppError,
    routes::{id_list, SearchQuery},
    tenancy::grant_company_access,
    utils::Pagination,
    AppState,
};

/// Body of `POST /companies/access`: `{"user_id": 7, "company_list": [1, 2]}`.
#[derive(Deserialize)]
pub struct AccessRequest {
    user_id: i64,
    #[serde(alias = "companies")]
    company_list: Vec<i64>,
}

#[get("/companies")]
pub async fn list_handler(
    user: AuthUser,
    state: web::Data<AppState>,
    page: web::Query<Pagination>,
    query: web::Query<SearchQuery>,
) -> Result<impl Responder, AppError> {
    let companies =
        companies::list_companies(&state.db_pool, user.id, query.search.as_deref(), &page).await?;
    Ok(HttpResponse::Ok().json(companies))
}

#[post("/companies")]
pub async fn create_handler(
    admin: AdminUser,
    state: web::Data<AppState>,
    web::Json(input): web::Json<NewCompany>,
) -> Result<impl Responder, AppError> {
    let company = companies::create_company(&state.db_pool, admin.id(), input).await?;
    Ok(HttpResponse::Created().json(company))
}

#[put("/companies")]
pub async fn rename_handler(
    admin: AdminUser,
    state: web::Data<AppState>,
    web::Json(input): web::Json<CompanyRename>,
) -> Result<impl Responder, AppError> {
    let company = companies::rename_company(&state.db_pool, admin.id(), input).await?;
    Ok(HttpResponse::Ok().json(company))
}

#[delete("/companies")]
pub async fn delete_handler(
    admin: AdminUser,
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<impl Responder, AppError> {
    let ids = id_list(&body, "companies_list")?;
    companies::delete_companies(&state.db_pool, admin.id(), &ids).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/companies/access")]
pub async fn access_handler(
    admin: AdminUser,
    state: web::Data<AppState>,
    web::Json(request): web::Json<AccessRequest>,
) -> Result<impl Responder, AppError> {
    let outcome =
        grant_company_access(&state.db_pool, admin.id(), request.user_id, &request.company_list)
            .await?;
    Ok(HttpResponse::Created().json(outcome))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, web::Data, App};
    use serde_json::{json, Value};

    use crate::{
        routes::configure,
        test_utils::{bearer, seed_admin, seed_company, seed_sub_user, test_state},
    };

    #[actix_web::test]
    async fn granted_companies_show_up_for_the_sub_user() {
        let (state, _) = test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let clerk = seed_sub_user(&state, admin.id, "clerk").await;
        let one = seed_company(&state, admin.id, "One").await;
        seed_company(&state, admin.id, "Two").await;
        let admin_auth = bearer(&state, &admin);
        let clerk_auth = bearer(&state, &clerk);
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/companies/access")
            .insert_header(admin_auth.clone())
            .set_json(json!({"user_id": clerk.id, "company_list": [one.id]}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let outcome: Value = test::read_body_json(resp).await;
        assert_eq!(outcome["granted"], json!([one.id]));

        let req = test::TestRequest::get()
            .uri("/api/companies")
            .insert_header(clerk_auth.clone())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["name"], "One");

        let req = test::TestRequest::post()
            .uri("/api/companies")
            .insert_header(clerk_auth)
            .set_json(json!({"name": "Mine"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::delete()
            .uri("/api/companies")
            .insert_header(admin_auth)
            .set_json(json!({"companies_list": [one.id]}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
    }
}
