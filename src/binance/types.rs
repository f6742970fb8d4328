//! Wire types for the Binance REST API
//!
//! Binance sends every quantity and price as a string; `rust_decimal`'s
//! serde support parses those directly into `Decimal`.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Response of `GET /api/v3/time`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// Response of `GET /api/v3/exchangeInfo`, trimmed to what order sizing needs
#[derive(Debug, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub filters: Vec<SymbolFilter>,
}

/// Per-symbol order constraint filters. Spot symbols carry NOTIONAL today
/// but older deployments used MIN_NOTIONAL, so both are accepted.
#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        min_qty: Decimal,
        max_qty: Decimal,
        step_size: Decimal,
    },
    #[serde(rename = "NOTIONAL", rename_all = "camelCase")]
    Notional { min_notional: Decimal },
    #[serde(rename = "MIN_NOTIONAL", rename_all = "camelCase")]
    MinNotional { min_notional: Decimal },
    #[serde(other)]
    Other,
}

/// Response of `GET /api/v3/account`, trimmed to balances
#[derive(Debug, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceEntry {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Order lifecycle states reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    ExpiredInMatch,
}

/// One fill inside a FULL order response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
}

/// Response of `POST /api/v3/order` with `newOrderRespType=FULL`.
///
/// `cummulativeQuoteQty` is the exchange's own spelling.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub transact_time: i64,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub cummulative_quote_qty: Decimal,
    pub status: OrderStatus,
    #[serde(default)]
    pub fills: Vec<OrderFill>,
}

impl OrderResponse {
    /// Volume-weighted fill price across all fills, None if nothing executed
    pub fn average_fill_price(&self) -> Option<Decimal> {
        if self.executed_qty > Decimal::ZERO {
            Some(self.cummulative_quote_qty / self.executed_qty)
        } else {
            None
        }
    }
}

/// Response of `GET /api/v3/order` (no fills on queries)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInfo {
    pub symbol: String,
    pub order_id: i64,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub cummulative_quote_qty: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_exchange_info_filters() {
        let json = r#"{
            "symbols": [{
                "symbol": "BTCUSDT",
                "status": "TRADING",
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.01", "maxPrice": "1000000.00", "tickSize": "0.01"},
                    {"filterType": "LOT_SIZE", "minQty": "0.00001000", "maxQty": "9000.00000000", "stepSize": "0.00001000"},
                    {"filterType": "NOTIONAL", "minNotional": "10.00000000", "applyMinToMarket": true, "maxNotional": "9000000.00000000"}
                ]
            }]
        }"#;
        let info: ExchangeInfo = serde_json::from_str(json).unwrap();
        let filters = &info.symbols[0].filters;
        assert_eq!(filters.len(), 3);
        assert!(matches!(filters[0], SymbolFilter::Other));
        assert!(matches!(
            filters[1],
            SymbolFilter::LotSize { step_size, .. } if step_size == dec!(0.00001000)
        ));
        assert!(matches!(
            filters[2],
            SymbolFilter::Notional { min_notional } if min_notional == dec!(10)
        ));
    }

    #[test]
    fn parses_full_order_response() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "orderId": 28,
            "orderListId": -1,
            "clientOrderId": "cb-6gCrw2kRUAF9CvJDGP16IP",
            "transactTime": 1507725176595,
            "price": "0.00000000",
            "origQty": "0.00020000",
            "executedQty": "0.00020000",
            "cummulativeQuoteQty": "10.00000000",
            "status": "FILLED",
            "timeInForce": "GTC",
            "type": "MARKET",
            "side": "BUY",
            "fills": [
                {"price": "50000.00000000", "qty": "0.00015000", "commission": "0.00000015", "commissionAsset": "BTC", "tradeId": 56},
                {"price": "50001.00000000", "qty": "0.00005000", "commission": "0.00000005", "commissionAsset": "BTC", "tradeId": 57}
            ]
        }"#;
        let order: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.fills.len(), 2);
        assert_eq!(order.average_fill_price(), Some(dec!(50000)));
    }

    #[test]
    fn unexecuted_order_has_no_fill_price() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "orderId": 29,
            "clientOrderId": "cb-x",
            "transactTime": 1507725176595,
            "origQty": "0.00020000",
            "executedQty": "0.00000000",
            "cummulativeQuoteQty": "0.00000000",
            "status": "EXPIRED"
        }"#;
        let order: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(order.status, OrderStatus::Expired);
        assert_eq!(order.average_fill_price(), None);
        assert!(order.fills.is_empty());
    }
}
