//! HTTP handler functions for the smallbiz map API.

use actix_web::{HttpResponse, web};
use smallbiz_map_server_models::{ApiError, ApiHealth, FeaturesQueryParams};

use crate::AppState;

/// The single-page hover map.
const INDEX_HTML: &str = include_str!("../static/index.html");

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        caches: state.aggregator.cache_stats(),
    })
}

/// `GET /api/features`
///
/// Aggregates census, POI, crime and transit data around a point. Source
/// outages degrade the bundle (see its `notes`) but still answer 200; only
/// an invalid query is rejected.
pub async fn features(
    state: web::Data<AppState>,
    params: web::Query<FeaturesQueryParams>,
) -> HttpResponse {
    let FeaturesQueryParams { lat, lon, radius } = params.into_inner();

    match state.aggregator.get_features(lat, lon, radius).await {
        Ok(bundle) => {
            if !bundle.notes.is_empty() {
                log::info!(
                    "Served degraded features for ({lat}, {lon}): {} source(s) unavailable",
                    bundle.notes.len()
                );
            }
            HttpResponse::Ok().json(bundle)
        }
        Err(e) => {
            log::debug!("Rejected features query ({lat}, {lon}, {radius}): {e}");
            HttpResponse::BadRequest().json(ApiError::new(e.to_string()))
        }
    }
}

/// `GET /`
pub async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}
