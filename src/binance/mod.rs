//! Binance exchange integration

pub mod client;
pub mod error;
pub mod types;

pub use client::BinanceClient;
pub use error::BinanceError;
