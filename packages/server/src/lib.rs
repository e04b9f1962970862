#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the smallbiz map.
//!
//! Serves the hover feature endpoint backed by the
//! [`Aggregator`](smallbiz_map_features::Aggregator), a health endpoint
//! exposing per-source cache counters, and a single-page Leaflet frontend.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, error, middleware, web};
use smallbiz_map_features::{Aggregator, FeaturesConfig};
use smallbiz_map_server_models::ApiError;

/// Shared application state.
pub struct AppState {
    /// Source fan-out with its rate limiters and caches. Built once at
    /// startup; every request shares it.
    pub aggregator: Arc<Aggregator>,
}

/// Registers the API routes and the index page.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(query_config())
        .service(
            web::scope("/api")
                .route("/health", web::get().to(handlers::health))
                .route("/features", web::get().to(handlers::features)),
        )
        .route("/", web::get().to(handlers::index));
}

/// Answers unparseable query strings with a JSON 400 instead of actix's
/// plain-text default.
fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        let body = ApiError::new(err.to_string());
        error::InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    })
}

/// Starts the smallbiz map API server.
///
/// Loads the source configuration from the environment, builds the
/// aggregator, and starts the Actix-Web HTTP server on `BIND_ADDR:PORT`
/// (default `127.0.0.1:8080`). The caller provides the async runtime
/// (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the configuration is invalid, the
/// HTTP client cannot be built, or the server fails to bind.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Loading source configuration...");
    let config = FeaturesConfig::from_env().map_err(std::io::Error::other)?;
    for (source, policy) in config.policies() {
        log::info!(
            "{source}: {} calls per {:?}, cache capacity {}, {} retries",
            policy.rate_limit.calls,
            policy.rate_limit.period(),
            policy.cache_capacity,
            policy.max_retries,
        );
    }

    let aggregator = Aggregator::from_config(&config).map_err(std::io::Error::other)?;
    let state = web::Data::new(AppState {
        aggregator: Arc::new(aggregator),
    });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
