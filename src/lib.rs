pub mod authentication;
pub mod client;
pub mod code;
pub mod config;
pub mod database;
pub mod kvs;
pub mod models;
pub mod password;
pub mod requests;
pub mod responses;
pub mod routes;
pub mod service;
pub mod validation;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use http::{header, HeaderValue, Method};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::{
    authentication::AuthenticationService,
    code::RandomCodeGenerator,
    config::{Config, ConfigError},
    kvs::KvsCreatePoolError,
    service::LinkService,
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("key-value store error: {0}")]
    Kvs(#[from] KvsCreatePoolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Services {
    pub links: LinkService,
    pub auth: AuthenticationService,
}

impl Services {
    pub async fn new(config: &Config) -> Result<Self, StartupError> {
        let db = database::connect(&config.database_url).await?;
        let kvs_pool = kvs::optional_kvs_pool(config.kvs_url.as_deref())?.map(Arc::new);
        if kvs_pool.is_none() {
            tracing::info!("KVS_URL not set, session cache disabled");
        }

        Ok(Self {
            links: LinkService::new(
                db.clone(),
                config.public_base_url.clone(),
                Box::new(RandomCodeGenerator::new(config.code_length)),
            ),
            auth: AuthenticationService::new(
                db,
                kvs_pool,
                chrono::Duration::days(config.session_ttl_days),
                config.cookie_secure,
            ),
        })
    }
}

pub fn router(services: Arc<Services>, config: &Config) -> Router {
    let mut router = Router::new()
        .route("/health", get(routes::health_check))
        .route("/register", post(routes::register))
        .route("/login", post(routes::login))
        .route("/logout", post(routes::logout))
        .route("/me", get(routes::me))
        .route("/me/links", get(routes::my_links))
        .route("/shorten", post(routes::shorten))
        .route("/links", get(routes::list_links))
        .route("/:code", get(routes::resolve));

    if let Some(static_dir) = &config.static_dir {
        router = router.nest_service("/static", ServeDir::new(static_dir));
    }

    if let Some(cors) = cors_layer(&config.cors_origins) {
        router = router.layer(cors);
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|error| {
                    tracing::warn!(%origin, %error, "ignoring invalid CORS origin");
                })
                .ok()
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true),
    )
}

/// Serves `app` on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tracing::info!(address = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
