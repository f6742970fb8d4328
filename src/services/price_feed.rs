//! Live market data from the Binance combined stream.
//!
//! Subscribes to one `bookTicker` stream per watched pair over a single
//! connection and keeps the [`PriceCache`] current. The feed owns stream
//! health: it stamps message liveness, flips `connected` on the shared
//! [`ConnectionState`], and reconnects with exponential backoff until told
//! to shut down.

use crate::config::Config;
use crate::events::{BotEvent, EventBus};
use crate::notifier::Notifier;
use crate::services::connection::ConnectionState;
use crate::services::metrics::Metrics;
use crate::services::price_cache::PriceCache;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One frame from the combined stream: `{"stream":"...","data":{...}}`
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    data: BookTicker,
}

/// `bookTicker` payload. Binance keys are single letters; the best ask is
/// what a market buy would pay, so it is the price the bot tracks.
#[derive(Debug, Deserialize)]
struct BookTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "a")]
    best_ask: Decimal,
}

/// How a live connection ended
enum StreamEnd {
    Shutdown,
    Stale,
    Closed,
    Error(tungstenite::Error),
}

/// Binance market data stream service
pub struct PriceFeed {
    config: Arc<Config>,
    cache: PriceCache,
    connection: ConnectionState,
    bus: EventBus,
    metrics: Metrics,
    notifier: Arc<Notifier>,
}

impl PriceFeed {
    pub fn new(
        config: Arc<Config>,
        cache: PriceCache,
        connection: ConnectionState,
        bus: EventBus,
        metrics: Metrics,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            config,
            cache,
            connection,
            bus,
            metrics,
            notifier,
        }
    }

    /// Run the feed until shutdown. Always reconnects after a drop; a stale
    /// connection is forced down and retried immediately, everything else
    /// waits out the current backoff rung first.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let url = self.config.stream_url();
        info!(
            "[Feed] Starting stream for {} pairs",
            self.config.symbols().len()
        );

        let mut restore_auto_trading = false;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.connection
                .begin_reconnect_attempt(self.config.reconnect_base_delay());

            let ws_stream = match timeout(self.config.connect_timeout(), connect_async(&url)).await
            {
                Ok(Ok((ws, _))) => ws,
                Ok(Err(e)) => {
                    warn!("[Feed] Connection failed: {}", e);
                    if !self.wait_before_retry(&mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
                Err(_) => {
                    warn!(
                        "[Feed] Connection timed out after {:?}",
                        self.config.connect_timeout()
                    );
                    if !self.wait_before_retry(&mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            };

            self.connection.reset_reconnect_attempts();
            // Seed the liveness clock so the staleness check measures this
            // connection, not the gap before it.
            self.connection.mark_message();
            self.connection.set_connected(true);
            self.publish_connection_change();
            info!("[Feed] Connected");

            if restore_auto_trading {
                restore_auto_trading = false;
                self.connection.set_auto_trading(true);
                self.bus
                    .publish(BotEvent::AutoTradingStatus { enabled: true });
                info!("[Feed] Auto-trading restored after reconnect");
                self.notifier
                    .send_message("✅ Price feed reconnected, auto-trading active again")
                    .await;
            }

            match self.stream_until_end(ws_stream, &mut shutdown_rx).await {
                StreamEnd::Shutdown => break,
                StreamEnd::Stale => {
                    restore_auto_trading = self.note_outage();
                    warn!(
                        "[Feed] No stream message within {:?}, forcing reconnect",
                        self.config.heartbeat_timeout()
                    );
                }
                StreamEnd::Closed => {
                    restore_auto_trading = self.note_outage();
                    info!("[Feed] Stream closed by server, reconnecting...");
                    if !self.wait_before_retry(&mut shutdown_rx).await {
                        break;
                    }
                }
                StreamEnd::Error(e) => {
                    restore_auto_trading = self.note_outage();
                    warn!("[Feed] Stream error: {}, reconnecting...", e);
                    if !self.wait_before_retry(&mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }

        self.connection.set_connected(false);
        info!("[Feed] Stopped");
    }

    /// Read frames until the connection ends one way or another
    async fn stream_until_end(
        &self,
        ws_stream: WsStream,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> StreamEnd {
        let (mut write, mut read) = ws_stream.split();

        let mut staleness = interval(self.config.heartbeat_timeout() / 2);
        staleness.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.connection.mark_message();
                            self.metrics.inc_stream_messages();
                            self.handle_frame(&text).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            self.connection.mark_message();
                            if let Err(e) = write.send(Message::Pong(payload)).await {
                                return StreamEnd::Error(e);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return StreamEnd::Closed,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return StreamEnd::Error(e),
                    }
                }

                _ = staleness.tick() => {
                    if let Some(age) = self.connection.last_message_age() {
                        if age > self.config.heartbeat_timeout() {
                            return StreamEnd::Stale;
                        }
                    }
                }

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return StreamEnd::Shutdown;
                    }
                }
            }
        }
    }

    /// Parse one frame and fan the price out to the cache and the bus.
    /// Malformed frames are dropped; the connection stays up.
    async fn handle_frame(&self, text: &str) {
        let envelope: StreamEnvelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                debug!("[Feed] Dropping malformed frame: {}", e);
                return;
            }
        };

        let BookTicker { symbol, best_ask } = envelope.data;

        if self.config.asset_for_symbol(&symbol).is_none() {
            debug!("[Feed] Ignoring unwatched symbol {}", symbol);
            return;
        }
        if best_ask <= Decimal::ZERO {
            debug!("[Feed] Ignoring empty ask book for {}", symbol);
            return;
        }

        let sample = self.cache.update(&symbol, best_ask).await;
        self.bus.publish(BotEvent::PriceUpdate(sample));
    }

    /// The connection is gone: halt trading now, remember operator intent
    /// so it can be reasserted once the stream is back.
    fn note_outage(&self) -> bool {
        let auto_trading_was_on = self.connection.auto_trading_enabled();
        self.connection.set_connected(false);
        self.publish_connection_change();
        self.metrics.inc_stream_reconnects();
        auto_trading_was_on
    }

    /// Sleep out the current backoff rung, counting this attempt as failed.
    /// Returns false when shutdown arrived during the wait.
    async fn wait_before_retry(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        let delay = self
            .connection
            .reconnect_delay(self.config.reconnect_base_delay());
        let attempt = self.connection.record_reconnect_failure();
        info!("[Feed] Reconnect attempt {} in {:?}", attempt, delay);

        tokio::select! {
            _ = sleep(delay) => true,
            changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        }
    }

    fn publish_connection_change(&self) {
        self.bus
            .publish(BotEvent::ConnectionChange(self.connection.snapshot()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_config() -> Config {
        Config {
            api_key: None,
            api_secret: None,
            rest_url: "https://api.binance.com".to_string(),
            ws_url: "wss://stream.binance.com:9443".to_string(),
            database_path: "cyclebot.db".to_string(),
            assets: vec!["BTC".to_string(), "ETH".to_string()],
            quote_asset: "USDT".to_string(),
            investment_amount: Decimal::from(100),
            buy_pct: Decimal::new(1, 2),
            sell_pct: Decimal::new(1, 2),
            check_interval_seconds: 10,
            trade_cooldown_seconds: 180,
            heartbeat_timeout_seconds: 60,
            connect_timeout_seconds: 10,
            reconnect_base_delay_seconds: 1,
            recv_window_ms: 60_000,
            auto_trading_on_start: false,
            api_port: 8080,
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }

    fn test_feed() -> (PriceFeed, ConnectionState, EventBus) {
        let connection = ConnectionState::new();
        let cache = PriceCache::new(connection.clone());
        let bus = EventBus::new(16);
        let feed = PriceFeed::new(
            Arc::new(test_config()),
            cache,
            connection.clone(),
            bus.clone(),
            Metrics::new(),
            Arc::new(Notifier::new(None, None)),
        );
        (feed, connection, bus)
    }

    #[test]
    fn parses_combined_stream_frame() {
        let frame = r#"{"stream":"btcusdt@bookTicker","data":{"u":400900217,"s":"BTCUSDT","b":"50123.10000000","B":"31.21000000","a":"50124.30000000","A":"40.66000000"}}"#;
        let envelope: StreamEnvelope = serde_json::from_str(frame).unwrap();
        assert_eq!(envelope.data.symbol, "BTCUSDT");
        assert_eq!(envelope.data.best_ask, dec!(50124.3));
    }

    #[tokio::test]
    async fn frames_flow_into_cache_and_bus() {
        let (feed, connection, bus) = test_feed();
        connection.set_connected(true);
        let mut rx = bus.subscribe();

        let frame = r#"{"stream":"ethusdt@bookTicker","data":{"u":1,"s":"ETHUSDT","b":"2999.90","B":"5.0","a":"3000.50","A":"2.0"}}"#;
        feed.handle_frame(frame).await;

        let sample = feed.cache.get("ETHUSDT").await.unwrap();
        assert_eq!(sample.price, dec!(3000.50));

        match rx.try_recv().unwrap() {
            BotEvent::PriceUpdate(update) => assert_eq!(update.symbol, "ETHUSDT"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn bad_frames_never_reach_the_cache() {
        let (feed, connection, _bus) = test_feed();
        connection.set_connected(true);

        feed.handle_frame("not json at all").await;
        feed.handle_frame(r#"{"stream":"btcusdt@bookTicker","data":{"s":"BTCUSDT"}}"#)
            .await;
        feed.handle_frame(r#"{"stream":"dogeusdt@bookTicker","data":{"s":"DOGEUSDT","a":"0.10"}}"#)
            .await;
        feed.handle_frame(r#"{"stream":"btcusdt@bookTicker","data":{"s":"BTCUSDT","a":"0"}}"#)
            .await;

        assert!(feed.cache.all().await.is_empty());
    }
}
