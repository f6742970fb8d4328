//! Background services for the trading bot

pub mod auto_trader;
pub mod connection;
pub mod metrics;
pub mod price_cache;
pub mod price_feed;
pub mod retry;

pub use auto_trader::{AutoTrader, TradeExecutor};
pub use connection::{ConnectionSnapshot, ConnectionState};
pub use metrics::{Metrics, MetricsSnapshot};
pub use price_cache::{PriceCache, PriceCacheError};
pub use price_feed::PriceFeed;
