//! Core types for the Binance cycle trading bot

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an executed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for TradeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(TradeAction::Buy),
            "SELL" => Ok(TradeAction::Sell),
            other => Err(format!("unknown trade action: {}", other)),
        }
    }
}

/// Outcome of one auto-trading check against the thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TradeDecision {
    Buy,
    SellAll,
    Hold,
}

impl fmt::Display for TradeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDecision::Buy => write!(f, "buy"),
            TradeDecision::SellAll => write!(f, "sell-all"),
            TradeDecision::Hold => write!(f, "hold"),
        }
    }
}

/// Latest observed price for a trading pair, sourced from the stream feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub symbol: String,
    pub price: Decimal,
    pub received_at: DateTime<Utc>,
}

/// Per-asset threshold state driving the buy-low / sell-high cycle.
///
/// A cycle starts from the all-zero state: the first buy anchors
/// `first_transaction_price` and the sell target, subsequent buys only walk
/// `next_buy_price` down, and a sell-all resets the anchor so the next buy
/// starts a fresh cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencePrice {
    pub asset: String,
    pub first_transaction_price: Decimal,
    pub last_transaction_price: Decimal,
    pub next_buy_price: Decimal,
    pub next_sell_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl ReferencePrice {
    /// Fresh all-zero state for an asset (no open cycle)
    pub fn new(asset: &str) -> Self {
        Self {
            asset: asset.to_string(),
            first_transaction_price: Decimal::ZERO,
            last_transaction_price: Decimal::ZERO,
            next_buy_price: Decimal::ZERO,
            next_sell_price: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Whether any cycle is currently open (a first buy has happened and no
    /// sell-all has closed it since)
    pub fn in_cycle(&self) -> bool {
        self.first_transaction_price > Decimal::ZERO
    }

    /// Apply an executed buy at `executed_price`.
    ///
    /// `buy_pct` and `sell_pct` are fractions (0.01 = 1%). The next buy
    /// threshold always re-anchors to the executed price; the sell target is
    /// set only by the first buy of a cycle and left alone afterwards.
    pub fn apply_buy(&mut self, executed_price: Decimal, buy_pct: Decimal, sell_pct: Decimal) {
        self.next_buy_price = executed_price * (Decimal::ONE - buy_pct);
        if self.first_transaction_price.is_zero() {
            self.first_transaction_price = executed_price;
            self.next_sell_price = executed_price * (Decimal::ONE + sell_pct);
        }
        self.last_transaction_price = executed_price;
        self.updated_at = Utc::now();
    }

    /// Apply a completed sell-all triggered at `trigger_price`.
    ///
    /// Closes the cycle: the sell target and first-price anchor go to zero,
    /// and the next buy threshold re-arms below the trigger price.
    pub fn apply_sell_all(&mut self, trigger_price: Decimal, buy_pct: Decimal) {
        self.next_buy_price = trigger_price * (Decimal::ONE - buy_pct);
        self.next_sell_price = Decimal::ZERO;
        self.first_transaction_price = Decimal::ZERO;
        self.last_transaction_price = trigger_price;
        self.updated_at = Utc::now();
    }

    /// Apply an operator patch. This is how a fresh asset's first buy
    /// trigger gets armed, since thresholds otherwise derive only from
    /// executed trades.
    pub fn apply_update(&mut self, update: &ReferencePriceUpdate) {
        if let Some(price) = update.first_transaction_price {
            self.first_transaction_price = price;
        }
        if let Some(price) = update.last_transaction_price {
            self.last_transaction_price = price;
        }
        if let Some(price) = update.next_buy_price {
            self.next_buy_price = price;
        }
        if let Some(price) = update.next_sell_price {
            self.next_sell_price = price;
        }
        self.updated_at = Utc::now();
    }
}

/// Operator-supplied partial update for a reference row.
/// Omitted fields keep their stored values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferencePriceUpdate {
    pub first_transaction_price: Option<Decimal>,
    pub last_transaction_price: Option<Decimal>,
    pub next_buy_price: Option<Decimal>,
    pub next_sell_price: Option<Decimal>,
}

/// One row of the append-only trade ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    /// Exchange-assigned order id; the ledger is idempotent on this
    pub exchange_trade_id: String,
    pub symbol: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub quote_amount: Decimal,
    pub trade_time: DateTime<Utc>,
}

/// Net position for an asset, derived from the trade ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Holdings {
    pub quantity: Decimal,
    pub avg_buy_price: Decimal,
}

impl Holdings {
    pub fn has_position(&self) -> bool {
        self.quantity > Decimal::ZERO
    }
}

/// Cached exchange balance for one asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Exchange-imposed order constraints for one trading pair
/// (LOT_SIZE and NOTIONAL filters)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub symbol: String,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
    pub min_notional: Decimal,
}

impl SymbolFilters {
    /// Adjust a raw order quantity so the exchange will accept it.
    ///
    /// Clamps into [min_qty, max_qty], raises the quantity to meet the
    /// minimum notional at the given price (rounded up onto the step grid),
    /// then floors onto the grid anchored at min_qty so the result never
    /// exceeds what the caller can afford.
    pub fn quantize(&self, quantity: Decimal, price: Decimal) -> Decimal {
        let mut qty = quantity.clamp(self.min_qty, self.max_qty);

        if qty * price < self.min_notional && price > Decimal::ZERO {
            let required = self.min_notional / price;
            qty = (required / self.step_size).ceil() * self.step_size;
        }

        ((qty - self.min_qty) / self.step_size).floor() * self.step_size + self.min_qty
    }

    /// Decimal places implied by the step size (0.00100 -> 3)
    pub fn quantity_precision(&self) -> u32 {
        self.step_size.normalize().scale()
    }

    /// Render a quantity at exactly the precision the exchange expects
    pub fn format_quantity(&self, quantity: Decimal) -> String {
        format!("{:.*}", self.quantity_precision() as usize, quantity)
    }
}

/// Payload for the chat notification sent after a committed trade
#[derive(Debug, Clone, Serialize)]
pub struct TradeNotification {
    pub symbol: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub quote_amount: Decimal,
    pub trigger_price: Decimal,
}
