//! Binance API error differentiation
//!
//! Parses REST error responses into structured types so callers can tell
//! rejections apart from transient failures and retry only the latter.

use serde::Deserialize;
use thiserror::Error;

/// Structured Binance API error
#[derive(Debug, Clone, Error)]
pub enum BinanceError {
    /// API key/secret missing from configuration
    #[error("API credentials not configured")]
    MissingCredentials,
    /// API key or signature was not accepted
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Request weight or order rate exceeded (429/418)
    #[error("rate limited by exchange (status {status})")]
    RateLimited { status: u16 },
    /// Exchange refused the request (4xx with a code/msg body)
    #[error("rejected by exchange (code {code}): {msg}")]
    Rejected { code: i64, msg: String },
    /// Exchange-side failure (5xx)
    #[error("exchange server error {status}: {msg}")]
    Server { status: u16, msg: String },
    /// Network/connection error (timeout, DNS, etc.)
    #[error("network error: {0}")]
    Network(String),
    /// Response body did not match the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Binance error response format
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

impl BinanceError {
    /// Parse a non-success REST response into a structured error
    pub fn from_response(status: u16, body: &str) -> Self {
        let (code, msg) = match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(parsed) => (parsed.code, parsed.msg),
            Err(_) => (0, body.to_string()),
        };

        // 418 is the IP auto-ban escalation of 429
        if status == 429 || status == 418 {
            return BinanceError::RateLimited { status };
        }

        // -2014 invalid API key format, -2015 key/IP/permission rejection
        if status == 401
            || status == 403
            || code == -2014
            || code == -2015
            || msg.to_lowercase().contains("signature")
        {
            return BinanceError::Auth(msg);
        }

        if (500..600).contains(&status) {
            return BinanceError::Server { status, msg };
        }

        BinanceError::Rejected { code, msg }
    }

    /// Classify a reqwest transport error
    pub fn from_network_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            BinanceError::Network("request timed out".to_string())
        } else if err.is_connect() {
            BinanceError::Network("connection failed".to_string())
        } else {
            BinanceError::Network(err.to_string())
        }
    }

    /// Whether this error is worth retrying with backoff.
    ///
    /// Only transport failures and 5xx qualify. Rejections and rate limits
    /// abort the current attempt; hammering a 429 invites an IP ban.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BinanceError::Network(_) | BinanceError::Server { .. })
    }
}
