use actix_web::{delete, get, patch, post, put, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    auth::{AdminUser, AuthUser},
    db::{
        accounts::{self, ProfileUpdate, ProfileUpdated, ProfileView, Registration},
        companies,
    },
    errors::AppError,
    routes::SearchQuery,
    structs::Account,
    utils::Pagination,
    AppState,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginUser {
    id: i64,
    email: String,
    first_name: String,
    last_name: String,
    image: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    is_admin: bool,
    user: LoginUser,
}

impl LoginResponse {
    fn new(account: Account, token: String) -> Self {
        LoginResponse {
            token,
            is_admin: account.is_admin,
            user: LoginUser {
                id: account.id,
                email: account.email,
                first_name: account.first_name,
                last_name: account.last_name,
                image: account.picture,
            },
        }
    }
}

#[derive(Deserialize)]
pub struct VerifyEmailRequest {
    activation_key: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    token: String,
    password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    old_password: String,
    new_password: String,
}

#[derive(Deserialize)]
pub struct AdminChangePasswordRequest {
    user_id: i64,
    new_password: String,
}

#[post("/auth/register")]
pub async fn register_handler(
    state: web::Data<AppState>,
    web::Json(registration): web::Json<Registration>,
) -> Result<impl Responder, AppError> {
    let account = accounts::register(&state, registration, None).await?;
    Ok(HttpResponse::Created().json(ProfileView::from(account)))
}

#[post("/auth/users")]
pub async fn register_sub_user_handler(
    admin: AdminUser,
    state: web::Data<AppState>,
    web::Json(registration): web::Json<Registration>,
) -> Result<impl Responder, AppError> {
    let account = accounts::register(&state, registration, Some(admin.id())).await?;
    Ok(HttpResponse::Created().json(ProfileView::from(account)))
}

#[post("/auth/login")]
pub async fn login_handler(
    state: web::Data<AppState>,
    web::Json(form): web::Json<LoginRequest>,
) -> Result<impl Responder, AppError> {
    let (account, token) = accounts::login(&state, &form.email, &form.password).await?;
    log::info!("User {} logged in", account.id);
    Ok(HttpResponse::Ok().json(LoginResponse::new(account, token)))
}

#[get("/auth/refresh")]
pub async fn refresh_handler(
    user: AuthUser,
    state: web::Data<AppState>,
) -> Result<impl Responder, AppError> {
    let (account, token) = accounts::refresh(&state, &user).await?;
    Ok(HttpResponse::Ok().json(LoginResponse::new(account, token)))
}

#[post("/auth/verify-email")]
pub async fn verify_email_handler(
    state: web::Data<AppState>,
    web::Json(form): web::Json<VerifyEmailRequest>,
) -> Result<impl Responder, AppError> {
    accounts::verify_email(&state, &form.activation_key).await?;
    Ok(HttpResponse::Accepted().json(json!({"message": "Email Verified"})))
}

#[post("/auth/password/forgot")]
pub async fn forgot_password_handler(
    state: web::Data<AppState>,
    web::Json(form): web::Json<ForgotPasswordRequest>,
) -> Result<impl Responder, AppError> {
    accounts::request_password_reset(&state, &form.email).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "We have sent you a link to reset your password"
    })))
}

#[post("/auth/password/reset")]
pub async fn reset_password_handler(
    state: web::Data<AppState>,
    web::Json(form): web::Json<ResetPasswordRequest>,
) -> Result<impl Responder, AppError> {
    accounts::confirm_password_reset(&state, &form.token, &form.password).await?;
    Ok(HttpResponse::Accepted().json(json!({"message": "Password reset successfully"})))
}

#[put("/auth/password")]
pub async fn change_password_handler(
    user: AuthUser,
    state: web::Data<AppState>,
    web::Json(form): web::Json<ChangePasswordRequest>,
) -> Result<impl Responder, AppError> {
    accounts::change_password(&state, user.id, &form.old_password, &form.new_password).await?;
    Ok(HttpResponse::Ok().json(json!({"message": "Password updated successfully"})))
}

#[put("/auth/users/password")]
pub async fn admin_change_password_handler(
    admin: AdminUser,
    state: web::Data<AppState>,
    web::Json(form): web::Json<AdminChangePasswordRequest>,
) -> Result<impl Responder, AppError> {
    accounts::admin_change_user_password(&state, admin.id(), form.user_id, &form.new_password)
        .await?;
    Ok(HttpResponse::Ok().json(json!({"message": "Password updated successfully"})))
}

#[get("/auth/profile")]
pub async fn profile_handler(
    user: AuthUser,
    state: web::Data<AppState>,
) -> Result<impl Responder, AppError> {
    let profile = accounts::fetch_profile(&state.db_pool, user.id).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[patch("/auth/profile")]
pub async fn update_profile_handler(
    user: AuthUser,
    state: web::Data<AppState>,
    web::Json(update): web::Json<ProfileUpdate>,
) -> Result<impl Responder, AppError> {
    Ok(match accounts::update_profile(&state, &user, update).await? {
        ProfileUpdated::Saved { message } => HttpResponse::Ok().json(json!({"message": message})),
        ProfileUpdated::EmailChanged { message } => {
            HttpResponse::Accepted().json(json!({"message": message}))
        }
    })
}

#[get("/users")]
pub async fn sub_users_handler(
    admin: AdminUser,
    state: web::Data<AppState>,
    page: web::Query<Pagination>,
    query: web::Query<SearchQuery>,
) -> Result<impl Responder, AppError> {
    let users =
        accounts::list_sub_users(&state.db_pool, admin.id(), query.search.as_deref(), &page).await?;
    Ok(HttpResponse::Ok().json(users))
}

#[delete("/users/{id}")]
pub async fn delete_sub_user_handler(
    admin: AdminUser,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    accounts::delete_sub_user(&state.db_pool, admin.id(), path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/users/{id}/companies")]
pub async fn user_companies_handler(
    admin: AdminUser,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let companies =
        companies::list_user_companies(&state.db_pool, admin.id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(companies))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, web::Data, App};
    use serde_json::{json, Value};

    use crate::{
        routes::configure,
        test_utils::{bearer, last_token_sent_to, seed_admin, seed_sub_user, test_state, PASSWORD},
    };

    #[actix_web::test]
    async fn refresh_without_bearer_is_unauthorized() {
        let (state, _) = test_state().await;
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/auth/refresh").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn register_verify_and_login() {
        let (state, mailer) = test_state().await;
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "email": "owner@acme.es",
                "username": "owner",
                "password": PASSWORD,
                "first_name": "Ana",
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let login = || {
            test::TestRequest::post()
                .uri("/api/auth/login")
                .set_json(json!({"email": "owner@acme.es", "password": PASSWORD}))
                .to_request()
        };
        assert_eq!(
            test::call_service(&app, login()).await.status(),
            StatusCode::NOT_ACCEPTABLE
        );

        let key = last_token_sent_to(&mailer, "owner@acme.es", "activation_key=");
        let req = test::TestRequest::post()
            .uri("/api/auth/verify-email")
            .set_json(json!({ "activation_key": key }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

        let req = test::TestRequest::post()
            .uri("/api/auth/verify-email")
            .set_json(json!({ "activation_key": key }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let body: Value = test::call_and_read_body_json(&app, login()).await;
        assert_eq!(body["is_admin"], true);
        assert_eq!(body["user"]["first_name"], "Ana");
        assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[actix_web::test]
    async fn sub_user_endpoints_require_an_admin_token() {
        let (state, _) = test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let clerk = seed_sub_user(&state, admin.id, "clerk").await;
        let admin_auth = bearer(&state, &admin);
        let clerk_auth = bearer(&state, &clerk);
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/api/users")
            .insert_header(clerk_auth)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::get()
            .uri("/api/users?limit=10")
            .insert_header(admin_auth)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["username"], "clerk");
    }

    #[actix_web::test]
    async fn wrong_old_password_names_the_field() {
        let (state, _) = test_state().await;
        let admin = seed_admin(&state, "owner").await;
        let auth = bearer(&state, &admin);
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::put()
            .uri("/api/auth/password")
            .insert_header(auth)
            .set_json(json!({"old_password": "Wrong1pass", "new_password": "Fresh9Password"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["old_password"], "Wrong password.");
    }
}
