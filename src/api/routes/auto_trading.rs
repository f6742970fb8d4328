//! Auto-trading control endpoints

use crate::api::server::AppState;
use crate::events::BotEvent;
use axum::{extract::State, Json};
use serde::Serialize;
use tracing::info;

/// Auto-trading state response
#[derive(Debug, Serialize)]
pub struct AutoTradingResponse {
    pub enabled: bool,
}

/// Enable auto-trading
pub async fn enable(State(state): State<AppState>) -> Json<AutoTradingResponse> {
    Json(set_auto_trading(&state, true))
}

/// Disable auto-trading
pub async fn disable(State(state): State<AppState>) -> Json<AutoTradingResponse> {
    Json(set_auto_trading(&state, false))
}

/// Flip the flag and broadcast the state actually in effect
fn set_auto_trading(state: &AppState, enabled: bool) -> AutoTradingResponse {
    let enabled = state.connection.set_auto_trading(enabled);
    state.bus.publish(BotEvent::AutoTradingStatus { enabled });
    info!(
        "[Api] Auto-trading {}",
        if enabled { "enabled" } else { "disabled" }
    );
    AutoTradingResponse { enabled }
}
