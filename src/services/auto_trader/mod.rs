//! Automated threshold trading.
//!
//! The engine subscribes to price events and screens them through the
//! per-symbol gates; the executor turns a passing decision into a market
//! order and commits the result to the ledger and threshold state.

pub mod engine;
pub mod executor;
pub mod guards;

pub use engine::AutoTrader;
pub use executor::TradeExecutor;
