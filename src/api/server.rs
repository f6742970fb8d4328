//! Axum server setup and configuration

use crate::api::routes;
use crate::api::ws::ws_handler;
use crate::config::Config;
use crate::db::Database;
use crate::events::EventBus;
use crate::services::{ConnectionState, Metrics, PriceCache};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub connection: ConnectionState,
    pub cache: PriceCache,
    pub metrics: Metrics,
    pub bus: EventBus,
}

/// Create the Axum application with all routes
pub fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // API routes
    let api_routes = Router::new()
        .route("/status", get(routes::status::get_status))
        .route("/prices", get(routes::status::list_prices))
        .route("/auto-trading/enable", post(routes::auto_trading::enable))
        .route("/auto-trading/disable", post(routes::auto_trading::disable))
        .route("/references", get(routes::references::list_references))
        .route("/references/:asset", post(routes::references::patch_reference))
        .route("/trades", get(routes::trades::list_trades))
        .route("/balances", get(routes::trades::list_balances));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
