//! Binance Cycle Trading Bot Library
//!
//! An automated spot bot trading a reference-price cycle strategy: buy a
//! fixed quote amount whenever the price drops a configured percentage
//! below the last trade, sell the whole position once it rises the
//! configured percentage above it, then let the next sell-all re-arm a
//! fresh cycle.
//!
//! The core is the triad of the resilient streaming price feed, the
//! per-asset threshold state machine persisted in SQLite, and the guarded
//! auto-trading engine turning price events into market orders. Everything
//! else (REST API, WebSocket fan-out, Telegram notifications) observes
//! that core through the event bus.

pub mod api;
pub mod binance;
pub mod config;
pub mod db;
pub mod events;
pub mod notifier;
pub mod services;
pub mod types;

pub use config::Config;
pub use db::Database;
