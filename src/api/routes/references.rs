//! Reference price endpoints

use crate::api::server::AppState;
use crate::events::BotEvent;
use crate::types::{ReferencePrice, ReferencePriceUpdate};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::info;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// List every asset's threshold row
pub async fn list_references(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReferencePrice>>, (StatusCode, Json<ErrorResponse>)> {
    state
        .db
        .get_all_reference_prices()
        .await
        .map(Json)
        .map_err(internal)
}

/// Patch one asset's thresholds. Omitted fields keep their stored values;
/// this is how a fresh asset's first buy trigger gets armed.
pub async fn patch_reference(
    State(state): State<AppState>,
    Path(asset): Path<String>,
    Json(update): Json<ReferencePriceUpdate>,
) -> Result<Json<ReferencePrice>, (StatusCode, Json<ErrorResponse>)> {
    let asset = asset.to_uppercase();
    if !state.config.assets.contains(&asset) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("{} is not a configured asset", asset),
            }),
        ));
    }

    let reference = state
        .db
        .update_reference_price(&asset, &update)
        .await
        .map_err(internal)?;

    info!("[Api] Reference prices for {} patched", asset);
    state
        .bus
        .publish(BotEvent::ReferencePriceUpdated(reference.clone()));

    Ok(Json(reference))
}

fn internal(e: anyhow::Error) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("Database error: {:#}", e),
        }),
    )
}
