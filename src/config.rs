//! Configuration management for the Binance cycle bot

use anyhow::Result;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Bot configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Binance API key (required for trading, not for read-only commands)
    pub api_key: Option<String>,

    /// Binance API secret (required for trading)
    pub api_secret: Option<String>,

    /// REST API base URL
    pub rest_url: String,

    /// WebSocket stream base URL
    pub ws_url: String,

    /// Path to SQLite database
    pub database_path: String,

    /// Base assets to trade (e.g. BTC, ETH)
    pub assets: Vec<String>,

    /// Quote asset all pairs trade against
    pub quote_asset: String,

    /// Quote amount spent per auto-buy
    pub investment_amount: Decimal,

    /// Buy threshold drop as a fraction (0.01 = buy 1% below last trade)
    pub buy_pct: Decimal,

    /// Sell threshold rise as a fraction (0.01 = sell 1% above first buy)
    pub sell_pct: Decimal,

    /// Minimum seconds between auto-trading checks per symbol
    pub check_interval_seconds: u64,

    /// Seconds after a committed trade during which a symbol is not checked
    pub trade_cooldown_seconds: u64,

    /// Feed is considered dead after this many seconds without a message
    pub heartbeat_timeout_seconds: u64,

    /// Timeout for establishing the stream connection
    pub connect_timeout_seconds: u64,

    /// Base delay for exponential reconnect backoff
    pub reconnect_base_delay_seconds: u64,

    /// recvWindow for signed REST requests in milliseconds
    pub recv_window_ms: u64,

    /// Whether auto-trading starts enabled
    pub auto_trading_on_start: bool,

    /// Port for the HTTP/WebSocket relay
    pub api_port: u16,

    /// Telegram bot token for notifications (optional)
    pub telegram_bot_token: Option<String>,

    /// Telegram chat id notifications are sent to (optional)
    pub telegram_chat_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let api_key = env::var("BINANCE_API_KEY").ok().filter(|s| !s.is_empty());
        let api_secret = env::var("BINANCE_API_SECRET").ok().filter(|s| !s.is_empty());

        let rest_url = env::var("BINANCE_REST_URL")
            .unwrap_or_else(|_| "https://api.binance.com".to_string());

        let ws_url = env::var("BINANCE_WS_URL")
            .unwrap_or_else(|_| "wss://stream.binance.com:9443".to_string());

        let database_path = env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "cyclebot.db".to_string());

        let assets: Vec<String> = env::var("TRADE_ASSETS")
            .unwrap_or_else(|_| "BTC,ETH".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let quote_asset = env::var("QUOTE_ASSET")
            .map(|v| v.to_uppercase())
            .unwrap_or_else(|_| "USDT".to_string());

        let investment_amount = env::var("INVESTMENT_AMOUNT")
            .ok()
            .and_then(|v| Decimal::from_str(&v).ok())
            .unwrap_or_else(|| Decimal::from(100));

        // Thresholds are configured in percent and stored as fractions
        let buy_pct = env::var("BUY_DIP_PERCENT")
            .ok()
            .and_then(|v| Decimal::from_str(&v).ok())
            .unwrap_or_else(|| Decimal::ONE)
            / Decimal::from(100);

        let sell_pct = env::var("SELL_RISE_PERCENT")
            .ok()
            .and_then(|v| Decimal::from_str(&v).ok())
            .unwrap_or_else(|| Decimal::ONE)
            / Decimal::from(100);

        let check_interval_seconds = env::var("CHECK_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let trade_cooldown_seconds = env::var("TRADE_COOLDOWN_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(180); // 3 minutes between trades on the same symbol

        let heartbeat_timeout_seconds = env::var("HEARTBEAT_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let connect_timeout_seconds = env::var("CONNECT_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let reconnect_base_delay_seconds = env::var("RECONNECT_BASE_DELAY_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let recv_window_ms = env::var("RECV_WINDOW_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60_000); // Generous window, clock drift should not kill orders

        let auto_trading_on_start = env::var("AUTO_TRADING_ENABLED")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false); // Default to off for safety

        let api_port = env::var("API_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty());
        let telegram_chat_id = env::var("TELEGRAM_CHAT_ID").ok().filter(|s| !s.is_empty());

        let config = Self {
            api_key,
            api_secret,
            rest_url,
            ws_url,
            database_path,
            assets,
            quote_asset,
            investment_amount,
            buy_pct,
            sell_pct,
            check_interval_seconds,
            trade_cooldown_seconds,
            heartbeat_timeout_seconds,
            connect_timeout_seconds,
            reconnect_base_delay_seconds,
            recv_window_ms,
            auto_trading_on_start,
            api_port,
            telegram_bot_token,
            telegram_chat_id,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the bot cannot run with
    fn validate(&self) -> Result<()> {
        if self.assets.is_empty() {
            anyhow::bail!("TRADE_ASSETS must name at least one asset");
        }
        if self.investment_amount <= Decimal::ZERO {
            anyhow::bail!("INVESTMENT_AMOUNT must be positive");
        }
        if self.buy_pct <= Decimal::ZERO || self.sell_pct <= Decimal::ZERO {
            anyhow::bail!("BUY_DIP_PERCENT and SELL_RISE_PERCENT must be positive");
        }
        for (name, value) in [
            ("CHECK_INTERVAL_SECONDS", self.check_interval_seconds),
            ("TRADE_COOLDOWN_SECONDS", self.trade_cooldown_seconds),
            ("HEARTBEAT_TIMEOUT_SECONDS", self.heartbeat_timeout_seconds),
            ("CONNECT_TIMEOUT_SECONDS", self.connect_timeout_seconds),
            ("RECONNECT_BASE_DELAY_SECONDS", self.reconnect_base_delay_seconds),
            ("RECV_WINDOW_MS", self.recv_window_ms),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }
        Ok(())
    }

    /// Check if API credentials are configured
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }

    /// Trading pair symbol for a base asset (BTC -> BTCUSDT)
    pub fn symbol_for(&self, asset: &str) -> String {
        format!("{}{}", asset.to_uppercase(), self.quote_asset)
    }

    /// All trading pair symbols the bot watches
    pub fn symbols(&self) -> Vec<String> {
        self.assets.iter().map(|a| self.symbol_for(a)).collect()
    }

    /// Base asset for a trading pair symbol (BTCUSDT -> BTC), if it is one of ours
    pub fn asset_for_symbol(&self, symbol: &str) -> Option<String> {
        let base = symbol.strip_suffix(self.quote_asset.as_str())?;
        self.assets.iter().find(|a| a.as_str() == base).cloned()
    }

    /// Combined-stream URL subscribing every watched pair's bookTicker
    pub fn stream_url(&self) -> String {
        let streams: Vec<String> = self
            .symbols()
            .iter()
            .map(|s| format!("{}@bookTicker", s.to_lowercase()))
            .collect();
        format!("{}/stream?streams={}", self.ws_url, streams.join("/"))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn trade_cooldown(&self) -> Duration {
        Duration::from_secs(self.trade_cooldown_seconds)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_base_delay_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn symbol_mapping_round_trips() {
        let cfg = test_config();
        assert_eq!(cfg.symbol_for("BTC"), "BTCUSDT");
        assert_eq!(cfg.asset_for_symbol("BTCUSDT"), Some("BTC".to_string()));
        assert_eq!(cfg.asset_for_symbol("SOLUSDT"), None);
        assert_eq!(cfg.asset_for_symbol("BTCBUSD"), None);
    }

    #[test]
    fn stream_url_multiplexes_all_pairs() {
        let cfg = test_config();
        assert_eq!(
            cfg.stream_url(),
            "wss://stream.binance.com:9443/stream?streams=btcusdt@bookTicker/ethusdt@bookTicker"
        );
    }

    #[test]
    fn zero_timing_values_are_rejected() {
        assert!(test_config().validate().is_ok());

        // A zero heartbeat would panic the feed's staleness interval.
        let mut cfg = test_config();
        cfg.heartbeat_timeout_seconds = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = test_config();
        cfg.reconnect_base_delay_seconds = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = test_config();
        cfg.check_interval_seconds = 0;
        assert!(cfg.validate().is_err());
    }
}
