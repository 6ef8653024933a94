use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::analytics::{live, top_dimension, top_stats};
use super::handlers::{health_check, ingest_event, AppState};

pub fn create_router(state: Arc<AppState>) -> Router {
    // Beacons arrive cross-origin from every tracked site
    let ingest_routes = Router::new()
        .route("/api/event", post(ingest_event))
        .layer(CorsLayer::permissive())
        .with_state(Arc::clone(&state));

    let dashboard_routes = Router::new()
        .route("/api/dashboard/{domain}/top-stats", get(top_stats))
        .route("/api/dashboard/{domain}/live", get(live))
        .route("/api/dashboard/{domain}/{dimension}", get(top_dimension))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .merge(ingest_routes)
        .merge(dashboard_routes)
        .layer(TraceLayer::new_for_http())
}
