//! Latest-price cache fed by the stream connection.
//!
//! The feed task is the only writer. Reads are gated on stream health so a
//! consumer can never act on a price that survived an outage.

use crate::services::connection::ConnectionState;
use crate::types::PriceSample;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PriceCacheError {
    #[error("price feed is not connected")]
    NotConnected,
    #[error("no price observed yet for this symbol")]
    NoData,
}

#[derive(Clone)]
pub struct PriceCache {
    prices: Arc<RwLock<HashMap<String, PriceSample>>>,
    connection: ConnectionState,
}

impl PriceCache {
    pub fn new(connection: ConnectionState) -> Self {
        Self {
            prices: Arc::new(RwLock::new(HashMap::new())),
            connection,
        }
    }

    /// Store the newest price for a symbol and return the stored sample
    pub async fn update(&self, symbol: &str, price: Decimal) -> PriceSample {
        let sample = PriceSample {
            symbol: symbol.to_string(),
            price,
            received_at: Utc::now(),
        };
        self.prices
            .write()
            .await
            .insert(symbol.to_string(), sample.clone());
        sample
    }

    /// Latest sample for a symbol. Fails while the feed is down rather than
    /// serving a value of unknown age.
    pub async fn get(&self, symbol: &str) -> Result<PriceSample, PriceCacheError> {
        if !self.connection.connected() {
            return Err(PriceCacheError::NotConnected);
        }
        self.prices
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or(PriceCacheError::NoData)
    }

    /// All currently known samples (empty while disconnected)
    pub async fn all(&self) -> Vec<PriceSample> {
        if !self.connection.connected() {
            return Vec::new();
        }
        let mut samples: Vec<PriceSample> = self.prices.read().await.values().cloned().collect();
        samples.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        samples
    }
}
