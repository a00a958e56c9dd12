#[macro_use]
extern crate lazy_static;

use std::{str::FromStr, sync::Arc, time::Duration};

use actix_web::{
    middleware,
    web::{self, Data},
    App, HttpServer,
};
use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    SqlitePool,
};

mod auth;
mod config;
mod contact_id;
mod db;
mod errors;
mod mailer;
mod routes;
mod structs;
mod tenancy;
#[cfg(test)]
mod test_utils;
mod utils;

use auth::TokenService;
use config::Config;
use errors::AppError;
use mailer::{Mailer, TemplateMailer, TEMPLATES};

/// Shared by every handler. Built once at startup; nothing in it changes
/// while the server runs.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Arc<Config>,
    pub tokens: Arc<TokenService>,
    pub mailer: Arc<dyn Mailer>,
}

fn io_error<E>(e: E) -> std::io::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env()?;

    let opts = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(io_error)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .read_only(false)
        .busy_timeout(Duration::from_secs(5));

    let db_pool = SqlitePool::connect_with(opts).await.map_err(io_error)?;

    sqlx::migrate!().run(&db_pool).await.map_err(io_error)?;
    info!("Database migrated successfully");

    lazy_static::initialize(&TEMPLATES);
    info!(
        "Loaded {} email templates from {}",
        TEMPLATES.get_template_names().count(),
        config.templates_dir
    );

    let state = Data::new(AppState {
        db_pool,
        tokens: Arc::new(TokenService::new(&config)),
        mailer: Arc::new(TemplateMailer::new(config.mail_from.clone())),
        config: Arc::new(config.clone()),
    });

    info!(
        "Starting HTTP server on http://{}:{}/",
        config.bind_addr, config.port
    );

    HttpServer::new(move || {
        App::new()
            // enable automatic response compression - usually register this first
            .wrap(middleware::Compress::default())
            // enable logger - always register Actix Web Logger middleware last
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(routes::configure)
            .default_service(web::to(default_handler))
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await
}

async fn default_handler() -> Result<actix_web::HttpResponse, AppError> {
    Err(AppError::NotFound("Not found.".to_owned()))
}
