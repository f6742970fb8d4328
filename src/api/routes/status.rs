//! Bot status endpoints

use crate::api::server::AppState;
use crate::services::{ConnectionSnapshot, MetricsSnapshot};
use crate::types::PriceSample;
use axum::{extract::State, Json};
use serde::Serialize;

/// Full bot status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connection: ConnectionSnapshot,
    pub metrics: MetricsSnapshot,
    pub symbols: Vec<String>,
}

/// Get connection health and counters
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        connection: state.connection.snapshot(),
        metrics: state.metrics.snapshot(),
        symbols: state.config.symbols(),
    })
}

/// Latest cached prices (empty while the feed is down)
pub async fn list_prices(State(state): State<AppState>) -> Json<Vec<PriceSample>> {
    Json(state.cache.all().await)
}
