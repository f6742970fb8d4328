//! Web API module for the trading bot
//!
//! Provides REST endpoints and WebSocket event fan-out for the dashboard.

pub mod routes;
pub mod server;
pub mod ws;

pub use server::{create_app, AppState};
