//! Signed REST client for the Binance spot API
//!
//! Signed endpoints take an HMAC-SHA256 signature over the exact query
//! string, so the query is assembled by hand here and sent byte-identical
//! to what was signed. Timestamps are corrected by a server-time offset
//! measured at startup.

use crate::binance::error::BinanceError;
use crate::binance::types::{
    AccountInfo, ExchangeInfo, OrderInfo, OrderResponse, ServerTime, SymbolFilter, SymbolInfo,
};
use crate::types::{AssetBalance, SymbolFilters, TradeAction};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT_SECS: u64 = 10;

pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    /// Server clock minus local clock, in milliseconds
    time_offset_ms: AtomicI64,
}

impl BinanceClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        api_secret: &str,
        recv_window_ms: u64,
    ) -> Result<Self, BinanceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| BinanceError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            recv_window_ms,
            time_offset_ms: AtomicI64::new(0),
        })
    }

    /// Measure the offset between the exchange clock and ours.
    ///
    /// Run once at startup (and after reconnects); signed requests apply the
    /// offset so a drifting local clock stays inside the recvWindow.
    pub async fn sync_time(&self) -> Result<(), BinanceError> {
        let before = Utc::now().timestamp_millis();
        let time: ServerTime = self.get_public("/api/v3/time", &[]).await?;
        let after = Utc::now().timestamp_millis();

        let midpoint = before + (after - before) / 2;
        let offset = time.server_time - midpoint;
        self.time_offset_ms.store(offset, Ordering::Relaxed);
        debug!("[Binance] server time offset {}ms", offset);
        Ok(())
    }

    /// Connectivity check against `GET /api/v3/ping`
    pub async fn ping(&self) -> Result<(), BinanceError> {
        let _: serde_json::Value = self.get_public("/api/v3/ping", &[]).await?;
        Ok(())
    }

    /// Fetch LOT_SIZE and notional constraints for the given symbols
    pub async fn exchange_filters(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, SymbolFilters>, BinanceError> {
        let list = format!(
            "[{}]",
            symbols
                .iter()
                .map(|s| format!("\"{}\"", s))
                .collect::<Vec<_>>()
                .join(",")
        );
        let info: ExchangeInfo = self
            .get_public("/api/v3/exchangeInfo", &[("symbols", list.as_str())])
            .await?;

        let mut filters = HashMap::new();
        for symbol_info in info.symbols {
            let symbol = symbol_info.symbol.clone();
            filters.insert(symbol, fold_filters(symbol_info)?);
        }
        info!("[Binance] loaded order filters for {} symbols", filters.len());
        Ok(filters)
    }

    /// Current account balances (signed)
    pub async fn account_balances(&self) -> Result<Vec<AssetBalance>, BinanceError> {
        let account: AccountInfo = self.get_signed("/api/v3/account", &[]).await?;
        Ok(account
            .balances
            .into_iter()
            .filter(|b| b.free > Decimal::ZERO || b.locked > Decimal::ZERO)
            .map(|b| AssetBalance {
                asset: b.asset,
                free: b.free,
                locked: b.locked,
            })
            .collect())
    }

    /// Submit a market order and return the FULL response including fills.
    ///
    /// `quantity` must already be quantized and formatted for the symbol.
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: TradeAction,
        quantity: &str,
    ) -> Result<OrderResponse, BinanceError> {
        let client_order_id = format!("cb-{}", Uuid::new_v4().simple());
        let side_str = side.to_string();
        let params: Vec<(&str, &str)> = vec![
            ("symbol", symbol),
            ("side", side_str.as_str()),
            ("type", "MARKET"),
            ("quantity", quantity),
            ("newClientOrderId", client_order_id.as_str()),
            ("newOrderRespType", "FULL"),
        ];
        let body = self.signed_query(&params)?;

        let url = format!("{}/api/v3/order", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| BinanceError::from_network_error(&e))?;

        parse_response(response).await
    }

    /// Look up an order by exchange id (signed)
    pub async fn get_order(&self, symbol: &str, order_id: i64) -> Result<OrderInfo, BinanceError> {
        let id = order_id.to_string();
        self.get_signed("/api/v3/order", &[("symbol", symbol), ("orderId", id.as_str())])
            .await
    }

    fn timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset_ms.load(Ordering::Relaxed)
    }

    fn sign(&self, payload: &str) -> Result<String, BinanceError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| BinanceError::Auth(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build `k=v&...&recvWindow=..&timestamp=..&signature=..` for a signed call
    fn signed_query(&self, params: &[(&str, &str)]) -> Result<String, BinanceError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(BinanceError::MissingCredentials);
        }
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "recvWindow={}&timestamp={}",
            self.recv_window_ms,
            self.timestamp_ms()
        ));

        let signature = self.sign(&query)?;
        query.push_str(&format!("&signature={}", signature));
        Ok(query)
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, BinanceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| BinanceError::from_network_error(&e))?;
        parse_response(response).await
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, BinanceError> {
        let query = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| BinanceError::from_network_error(&e))?;
        parse_response(response).await
    }
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BinanceError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BinanceError::from_network_error(&e))?;

    if !status.is_success() {
        return Err(BinanceError::from_response(status.as_u16(), &body));
    }

    serde_json::from_str(&body).map_err(|e| BinanceError::Malformed(e.to_string()))
}

/// Collapse a symbol's filter list into the constraints order sizing uses
fn fold_filters(info: SymbolInfo) -> Result<SymbolFilters, BinanceError> {
    let mut lot: Option<(Decimal, Decimal, Decimal)> = None;
    let mut min_notional = Decimal::ZERO;

    for filter in info.filters {
        match filter {
            SymbolFilter::LotSize {
                min_qty,
                max_qty,
                step_size,
            } => lot = Some((min_qty, max_qty, step_size)),
            SymbolFilter::Notional { min_notional: m }
            | SymbolFilter::MinNotional { min_notional: m } => min_notional = m,
            SymbolFilter::Other => {}
        }
    }

    let (min_qty, max_qty, step_size) = lot.ok_or_else(|| {
        BinanceError::Malformed(format!("no LOT_SIZE filter for {}", info.symbol))
    })?;

    Ok(SymbolFilters {
        symbol: info.symbol,
        min_qty,
        max_qty,
        step_size,
        min_notional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // Key pair and expected signature from the Binance API documentation
    const DOC_SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";

    fn doc_client() -> BinanceClient {
        BinanceClient::new(
            "https://api.binance.com",
            "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A",
            DOC_SECRET,
            5000,
        )
        .unwrap()
    }

    #[test]
    fn signature_matches_documented_vector() {
        let client = doc_client();
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            client.sign(query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn signed_query_appends_window_timestamp_signature() {
        let client = doc_client();
        let query = client
            .signed_query(&[("symbol", "BTCUSDT"), ("orderId", "42")])
            .unwrap();
        assert!(query.starts_with("symbol=BTCUSDT&orderId=42&recvWindow=5000&timestamp="));
        let sig_at = query.find("&signature=").unwrap();
        // hex-encoded SHA256 HMAC is 64 chars
        assert_eq!(query.len() - sig_at - "&signature=".len(), 64);
    }

    #[test]
    fn fold_filters_extracts_lot_and_notional() {
        let info: SymbolInfo = serde_json::from_str(
            r#"{
                "symbol": "ETHUSDT",
                "status": "TRADING",
                "filters": [
                    {"filterType": "LOT_SIZE", "minQty": "0.0001", "maxQty": "9000", "stepSize": "0.0001"},
                    {"filterType": "MIN_NOTIONAL", "minNotional": "5.0"},
                    {"filterType": "ICEBERG_PARTS", "limit": 10}
                ]
            }"#,
        )
        .unwrap();
        let filters = fold_filters(info).unwrap();
        assert_eq!(filters.min_qty, dec!(0.0001));
        assert_eq!(filters.max_qty, dec!(9000));
        assert_eq!(filters.step_size, dec!(0.0001));
        assert_eq!(filters.min_notional, dec!(5.0));
    }

    #[test]
    fn fold_filters_requires_lot_size() {
        let info: SymbolInfo = serde_json::from_str(
            r#"{"symbol": "X", "status": "TRADING", "filters": []}"#,
        )
        .unwrap();
        assert!(matches!(fold_filters(info), Err(BinanceError::Malformed(_))));
    }
}
