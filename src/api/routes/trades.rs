//! Trade ledger and balance endpoints

use crate::api::server::AppState;
use crate::types::{AssetBalance, TradeRecord};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Trade list query params
#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<i64>,
}

/// Recent trades, newest first
pub async fn list_trades(
    State(state): State<AppState>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Vec<TradeRecord>>, (StatusCode, Json<ErrorResponse>)> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    state.db.get_trades(limit).await.map(Json).map_err(internal)
}

/// Last synced account balances
pub async fn list_balances(
    State(state): State<AppState>,
) -> Result<Json<Vec<AssetBalance>>, (StatusCode, Json<ErrorResponse>)> {
    state
        .db
        .get_account_balances()
        .await
        .map(Json)
        .map_err(internal)
}

fn internal(e: anyhow::Error) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("Database error: {:#}", e),
        }),
    )
}
