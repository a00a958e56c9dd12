use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use serde_json::Value;

use crate::{
    db::payroll::{
        self, EmployeePatch, NewEmployee, NewPayRoll, PayRollPatch, PayrollFilter, TeamInput,
    },
    errors::AppError,
    routes::id_list,
    tenancy::CompanyContext,
    utils::Pagination,
    AppState,
};

// Teams

#[get("/payroll/teams")]
pub async fn list_teams_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    page: web::Query<Pagination>,
    filter: web::Query<PayrollFilter>,
) -> Result<impl Responder, AppError> {
    let teams = payroll::list_teams(&state.db_pool, ctx.company_id(), &filter, &page).await?;
    Ok(HttpResponse::Ok().json(teams))
}

#[post("/payroll/teams")]
pub async fn create_team_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    web::Json(input): web::Json<TeamInput>,
) -> Result<impl Responder, AppError> {
    let team = payroll::create_team(&state.db_pool, ctx.company_id(), input).await?;
    Ok(HttpResponse::Created().json(team))
}

#[delete("/payroll/teams")]
pub async fn delete_teams_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<impl Responder, AppError> {
    let ids = id_list(&body, "teams_list")?;
    payroll::delete_teams(&state.db_pool, ctx.company_id(), &ids).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/payroll/teams/{id}")]
pub async fn team_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let team = payroll::get_team(&state.db_pool, ctx.company_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(team))
}

#[patch("/payroll/teams/{id}")]
pub async fn update_team_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    web::Json(input): web::Json<TeamInput>,
) -> Result<impl Responder, AppError> {
    let team =
        payroll::update_team(&state.db_pool, ctx.company_id(), path.into_inner(), input).await?;
    Ok(HttpResponse::Ok().json(team))
}

// Employees

#[get("/payroll/employees")]
pub async fn list_employees_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    page: web::Query<Pagination>,
    filter: web::Query<PayrollFilter>,
) -> Result<impl Responder, AppError> {
    let employees =
        payroll::list_employees(&state.db_pool, ctx.company_id(), &filter, &page).await?;
    Ok(HttpResponse::Ok().json(employees))
}

#[post("/payroll/employees")]
pub async fn create_employee_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    web::Json(input): web::Json<NewEmployee>,
) -> Result<impl Responder, AppError> {
    let employee = payroll::create_employee(&state.db_pool, ctx.company_id(), input).await?;
    Ok(HttpResponse::Created().json(employee))
}

#[delete("/payroll/employees")]
pub async fn delete_employees_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<impl Responder, AppError> {
    let ids = id_list(&body, "employees_list")?;
    payroll::delete_employees(&state.db_pool, ctx.company_id(), &ids).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/payroll/employees/{id}")]
pub async fn employee_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let employee =
        payroll::get_employee(&state.db_pool, ctx.company_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(employee))
}

#[patch("/payroll/employees/{id}")]
pub async fn update_employee_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    web::Json(patch): web::Json<EmployeePatch>,
) -> Result<impl Responder, AppError> {
    let employee =
        payroll::update_employee(&state.db_pool, ctx.company_id(), path.into_inner(), patch)
            .await?;
    Ok(HttpResponse::Ok().json(employee))
}

// Payrolls

#[get("/payroll/payrolls")]
pub async fn list_payrolls_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    page: web::Query<Pagination>,
    filter: web::Query<PayrollFilter>,
) -> Result<impl Responder, AppError> {
    let payrolls = payroll::list_payrolls(&state.db_pool, ctx.company_id(), &filter, &page).await?;
    Ok(HttpResponse::Ok().json(payrolls))
}

#[post("/payroll/payrolls")]
pub async fn create_payroll_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    web::Json(input): web::Json<NewPayRoll>,
) -> Result<impl Responder, AppError> {
    let detail = payroll::create_payroll(&state.db_pool, ctx.company_id(), input).await?;
    Ok(HttpResponse::Created().json(detail))
}

#[delete("/payroll/payrolls")]
pub async fn delete_payrolls_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<impl Responder, AppError> {
    let ids = id_list(&body, "payrolls_list")?;
    payroll::delete_payrolls(&state.db_pool, ctx.company_id(), &ids).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/payroll/payrolls/{id}")]
pub async fn payroll_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let detail = payroll::get_payroll(&state.db_pool, ctx.company_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[patch("/payroll/payrolls/{id}")]
pub async fn update_payroll_handler(
    ctx: CompanyContext,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    web::Json(patch): web::Json<PayRollPatch>,
) -> Result<impl Responder, AppError> {
    let detail =
        payroll::update_payroll(&state.db_pool, ctx.company_id(), path.into_inner(), patch)
            .await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, web::Data, App};
    use serde_json::{json, Value};

    use crate::{
        routes::configure,
        tenancy::COMPANY_HEADER,
        test_utils::{bearer, seed_admin, seed_company, test_state},
    };

    #[actix_web::test]
    async fn teams_and_employees_over_http() {
        let (state, _) = test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let acme = seed_company(&state, admin.id, "Acme").await;
        let auth = bearer(&state, &admin);
        let company = (COMPANY_HEADER, acme.id.to_string());
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/payroll/teams")
            .insert_header(auth.clone())
            .insert_header(company.clone())
            .set_json(json!({"team_name": "Kitchen"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let team: Value = test::read_body_json(resp).await;

        let req = test::TestRequest::post()
            .uri("/api/payroll/employees")
            .insert_header(auth.clone())
            .insert_header(company.clone())
            .set_json(json!({"name": "Luis", "nif": "12345678Z", "team": team["id"]}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::get()
            .uri(&format!("/api/payroll/employees?team={}", team["id"]))
            .insert_header(auth.clone())
            .insert_header(company.clone())
            .to_request();
        let page: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(page["count"], 1);
        assert_eq!(page["results"][0]["name"], "Luis");

        let req = test::TestRequest::delete()
            .uri("/api/payroll/teams")
            .insert_header(auth)
            .insert_header(company)
            .set_json(json!({"teams_list": [team["id"]]}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
    }
}
