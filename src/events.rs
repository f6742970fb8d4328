//! Broadcast event bus connecting the core services to the relay surface.
//!
//! Every observable state change goes out as a [`BotEvent`] on a
//! `tokio::sync::broadcast` channel. Each subscriber gets its own queue, so
//! a slow WebSocket client lags (and is told so) without ever blocking the
//! feed or the trading engine.

use crate::services::connection::ConnectionSnapshot;
use crate::types::{PriceSample, ReferencePrice, TradeDecision, TradeNotification, TradeRecord};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

/// Events published by the bot core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum BotEvent {
    #[serde(rename = "price-update")]
    PriceUpdate(PriceSample),
    #[serde(rename = "order-update")]
    OrderUpdate(TradeRecord),
    #[serde(rename = "connection-change")]
    ConnectionChange(ConnectionSnapshot),
    #[serde(rename = "auto-trading-status")]
    AutoTradingStatus { enabled: bool },
    #[serde(rename = "reference-price-updated")]
    ReferencePriceUpdated(ReferencePrice),
    #[serde(rename = "auto-trading-executed")]
    AutoTradingExecuted(TradeNotification),
    #[serde(rename = "auto-trading-check")]
    AutoTradingCheck {
        symbol: String,
        price: Decimal,
        decision: TradeDecision,
    },
}

/// Cloneable handle for publishing and subscribing to bot events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BotEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: BotEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        // Price updates dominate the traffic, keep room for bursts
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = BotEvent::AutoTradingCheck {
            symbol: "BTCUSDT".to_string(),
            price: dec!(50000),
            decision: TradeDecision::SellAll,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "auto-trading-check");
        assert_eq!(json["data"]["decision"], "sell-all");

        let status = serde_json::to_value(BotEvent::AutoTradingStatus { enabled: true }).unwrap();
        assert_eq!(status["type"], "auto-trading-status");
        assert_eq!(status["data"]["enabled"], true);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.publish(BotEvent::AutoTradingStatus { enabled: false });
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(BotEvent::PriceUpdate(PriceSample {
            symbol: "ETHUSDT".to_string(),
            price: dec!(3000),
            received_at: Utc::now(),
        }));

        match rx.recv().await.unwrap() {
            BotEvent::PriceUpdate(sample) => assert_eq!(sample.symbol, "ETHUSDT"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
