use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::analytics::{extract_client_ip, Clock, IngestService};
use crate::config::{AnalyticsConfig, DashboardConfig};
use crate::models::Beacon;
use crate::storage::Storage;

use super::error::ApiError;

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub ingest: Arc<IngestService>,
    pub clock: Arc<dyn Clock>,
    pub analytics: AnalyticsConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

/// Record a beacon from the tracking script
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(beacon): Json<Beacon>,
) -> Result<(StatusCode, Json<SuccessResponse>), ApiError> {
    let client_ip = extract_client_ip(&headers, remote.ip(), &state.analytics);

    state.ingest.ingest(beacon, client_ip).await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse {
            message: "recorded".to_string(),
        }),
    ))
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
