//! Order execution: submit, verify, then commit to ledger and thresholds.
//!
//! A trade exists only once the exchange confirms a full fill twice (the
//! order response and an independent status query). Everything after that
//! point is bookkeeping on a trade that already happened, so those failures
//! propagate loudly but roll nothing back.

use crate::binance::types::{OrderResponse, OrderStatus};
use crate::binance::BinanceClient;
use crate::config::Config;
use crate::db::Database;
use crate::events::{BotEvent, EventBus};
use crate::notifier::Notifier;
use crate::services::metrics::Metrics;
use crate::services::retry::{with_retry, RetryConfig};
use crate::types::{SymbolFilters, TradeAction, TradeNotification, TradeRecord};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Market order executor for the auto-trading engine
pub struct TradeExecutor {
    config: Arc<Config>,
    client: Arc<BinanceClient>,
    db: Arc<Database>,
    bus: EventBus,
    metrics: Metrics,
    notifier: Arc<Notifier>,
    /// Exchange order constraints per symbol, fetched once at startup
    filters: HashMap<String, SymbolFilters>,
    retry: RetryConfig,
}

impl TradeExecutor {
    pub fn new(
        config: Arc<Config>,
        client: Arc<BinanceClient>,
        db: Arc<Database>,
        bus: EventBus,
        metrics: Metrics,
        notifier: Arc<Notifier>,
        filters: HashMap<String, SymbolFilters>,
    ) -> Self {
        Self {
            config,
            client,
            db,
            bus,
            metrics,
            notifier,
            filters,
            retry: RetryConfig::default(),
        }
    }

    /// Buy the configured quote amount's worth at roughly the trigger price.
    /// Returns the committed ledger entry.
    pub async fn execute_buy(&self, symbol: &str, trigger_price: Decimal) -> Result<TradeRecord> {
        let asset = self.asset_for(symbol)?;
        let filters = self.filters_for(symbol)?;

        let raw_qty = self.config.investment_amount / trigger_price;
        let quantity = filters.format_quantity(filters.quantize(raw_qty, trigger_price));

        info!(
            "[AutoTrade] Buying {} {} at ~{} for {} {}",
            quantity, symbol, trigger_price, self.config.investment_amount, self.config.quote_asset
        );

        let (order, executed_price) = self
            .submit_and_verify(symbol, TradeAction::Buy, &quantity)
            .await?;
        self.commit(
            symbol,
            &asset,
            TradeAction::Buy,
            &order,
            executed_price,
            trigger_price,
        )
        .await
    }

    /// Sell the full cached base-asset balance at market
    pub async fn execute_sell_all(
        &self,
        symbol: &str,
        trigger_price: Decimal,
    ) -> Result<TradeRecord> {
        let asset = self.asset_for(symbol)?;
        let filters = self.filters_for(symbol)?;

        let held = self
            .db
            .get_balance(&asset)
            .await?
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO);
        if held <= Decimal::ZERO {
            bail!("no free {} balance to sell", asset);
        }

        let quantity = filters.format_quantity(filters.quantize(held, trigger_price));

        info!(
            "[AutoTrade] Selling {} {} at ~{}",
            quantity, symbol, trigger_price
        );

        let (order, executed_price) = self
            .submit_and_verify(symbol, TradeAction::Sell, &quantity)
            .await?;
        self.commit(
            symbol,
            &asset,
            TradeAction::Sell,
            &order,
            executed_price,
            trigger_price,
        )
        .await
    }

    /// Submit a market order and require a full fill twice: once from the
    /// order response, once from an independent status query. Submission is
    /// never retried; the next qualifying price event is the retry.
    async fn submit_and_verify(
        &self,
        symbol: &str,
        action: TradeAction,
        quantity: &str,
    ) -> Result<(OrderResponse, Decimal)> {
        self.metrics.inc_orders_submitted();

        let order = self
            .client
            .place_market_order(symbol, action, quantity)
            .await
            .context("order submission failed")?;

        if order.status != OrderStatus::Filled {
            bail!(
                "order {} for {} came back {:?} instead of filled",
                order.order_id,
                symbol,
                order.status
            );
        }
        let executed_price = order.average_fill_price().ok_or_else(|| {
            anyhow!(
                "order {} for {} reported no fill details",
                order.order_id,
                symbol
            )
        })?;

        // The status query is idempotent, so transient blips get a bounded
        // retry instead of failing a trade that already filled.
        let confirmed = with_retry(&self.retry, "order confirmation", || {
            self.client.get_order(symbol, order.order_id)
        })
        .await
        .context("order confirmation query failed")?;
        if confirmed.status != OrderStatus::Filled {
            bail!(
                "order {} did not confirm as filled ({:?})",
                order.order_id,
                confirmed.status
            );
        }

        self.metrics.inc_orders_filled();
        Ok((order, executed_price))
    }

    /// Commit a verified fill: ledger entry, threshold transition, balance
    /// refresh, events and notification.
    async fn commit(
        &self,
        symbol: &str,
        asset: &str,
        action: TradeAction,
        order: &OrderResponse,
        executed_price: Decimal,
        trigger_price: Decimal,
    ) -> Result<TradeRecord> {
        let trade_time = Utc
            .timestamp_millis_opt(order.transact_time)
            .single()
            .unwrap_or_else(Utc::now);

        let mut trade = TradeRecord {
            id: 0,
            exchange_trade_id: order.order_id.to_string(),
            symbol: symbol.to_string(),
            action,
            quantity: order.executed_qty,
            price: executed_price,
            quote_amount: order.cummulative_quote_qty,
            trade_time,
        };

        match self
            .db
            .record_trade(
                &trade.exchange_trade_id,
                symbol,
                action,
                trade.quantity,
                trade.price,
                trade.quote_amount,
                trade.trade_time,
            )
            .await
        {
            Ok(Some(id)) => trade.id = id,
            Ok(None) => {
                warn!(
                    "[AutoTrade] Order {} was already in the ledger",
                    trade.exchange_trade_id
                );
            }
            Err(e) => {
                error!(
                    "[AutoTrade] Trade {} executed on exchange but ledger write failed: {:#}",
                    trade.exchange_trade_id, e
                );
                return Err(e);
            }
        }

        // Buy thresholds re-derive from the actual fill; a sell-all re-arms
        // the next cycle from the price that triggered it.
        let threshold_price = match action {
            TradeAction::Buy => executed_price,
            TradeAction::Sell => trigger_price,
        };

        let reference = match self
            .db
            .apply_trade_to_reference(
                asset,
                action,
                threshold_price,
                self.config.buy_pct,
                self.config.sell_pct,
            )
            .await
        {
            Ok(reference) => reference,
            Err(e) => {
                error!(
                    "[AutoTrade] Trade {} recorded but threshold update failed: {:#}",
                    trade.exchange_trade_id, e
                );
                return Err(e);
            }
        };

        if let Err(e) = self.refresh_balances().await {
            warn!("[AutoTrade] Balance refresh after trade failed: {:#}", e);
        }

        let notification = TradeNotification {
            symbol: symbol.to_string(),
            action,
            quantity: trade.quantity,
            price: executed_price,
            quote_amount: trade.quote_amount,
            trigger_price,
        };

        self.bus.publish(BotEvent::OrderUpdate(trade.clone()));
        self.bus.publish(BotEvent::ReferencePriceUpdated(reference));
        self.bus
            .publish(BotEvent::AutoTradingExecuted(notification.clone()));
        self.notifier.send_trade_notification(&notification).await;

        info!(
            "[AutoTrade] {} {} {} at {} ({} {})",
            action, trade.quantity, symbol, executed_price, trade.quote_amount, self.config.quote_asset
        );

        Ok(trade)
    }

    /// Pull a fresh balance snapshot from the exchange into the cache
    async fn refresh_balances(&self) -> Result<()> {
        let balances = with_retry(&self.retry, "balance refresh", || {
            self.client.account_balances()
        })
        .await?;
        self.db.update_account_balances(&balances).await
    }

    fn asset_for(&self, symbol: &str) -> Result<String> {
        self.config
            .asset_for_symbol(symbol)
            .ok_or_else(|| anyhow!("{} is not a configured trading pair", symbol))
    }

    fn filters_for(&self, symbol: &str) -> Result<&SymbolFilters> {
        self.filters
            .get(symbol)
            .ok_or_else(|| anyhow!("no exchange filters loaded for {}", symbol))
    }
}
