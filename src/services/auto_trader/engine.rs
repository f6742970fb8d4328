//! Auto-trading engine: turns price events into guarded trade decisions.
//!
//! Listens on the event bus and screens every price update through the gate
//! chain (operator intent, connection health, per-symbol throttle, exclusion
//! and cooldown). Only a fully passing event spawns a check task, so the
//! loop itself never waits on the database or the exchange and distinct
//! symbols evaluate concurrently.

use super::executor::TradeExecutor;
use super::guards::{CheckPermit, SymbolGate};
use crate::config::Config;
use crate::db::Database;
use crate::events::{BotEvent, EventBus};
use crate::notifier::Notifier;
use crate::services::connection::ConnectionState;
use crate::services::metrics::Metrics;
use crate::types::{PriceSample, TradeDecision};
use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// The auto-trading decision engine
#[derive(Clone)]
pub struct AutoTrader {
    config: Arc<Config>,
    db: Arc<Database>,
    connection: ConnectionState,
    bus: EventBus,
    executor: Arc<TradeExecutor>,
    metrics: Metrics,
    notifier: Arc<Notifier>,
    gates: HashMap<String, Arc<SymbolGate>>,
}

impl AutoTrader {
    pub fn new(
        config: Arc<Config>,
        db: Arc<Database>,
        connection: ConnectionState,
        bus: EventBus,
        executor: Arc<TradeExecutor>,
        metrics: Metrics,
        notifier: Arc<Notifier>,
    ) -> Self {
        let gates = config
            .symbols()
            .into_iter()
            .map(|symbol| {
                (
                    symbol,
                    Arc::new(SymbolGate::new(
                        config.check_interval(),
                        config.trade_cooldown(),
                    )),
                )
            })
            .collect();

        Self {
            config,
            db,
            connection,
            bus,
            executor,
            metrics,
            notifier,
            gates,
        }
    }

    /// Consume price events until shutdown
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("[AutoTrade] Engine watching {} pairs", self.gates.len());
        let mut events = self.bus.subscribe();
        let mut checks = JoinSet::new();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(BotEvent::PriceUpdate(sample)) => self.on_price(sample, &mut checks),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("[AutoTrade] Lagged {} events behind the bus", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("[AutoTrade] Event bus closed, stopping engine");
                        break;
                    }
                },
                Some(result) = checks.join_next(), if !checks.is_empty() => {
                    if let Err(e) = result {
                        warn!("[AutoTrade] Check task panicked: {}", e);
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("[AutoTrade] Shutdown signal received");
                        break;
                    }
                }
            }
        }

        // A check may be mid-commit; wait the set out instead of dropping
        // the tasks with the runtime.
        while let Some(result) = checks.join_next().await {
            if let Err(e) = result {
                warn!("[AutoTrade] Check task panicked: {}", e);
            }
        }
        info!("[AutoTrade] Engine stopped");
    }

    /// Screen one price event. Every gate failure is a silent no-op; a pass
    /// spawns the actual check so the event loop keeps draining.
    fn on_price(&self, sample: PriceSample, checks: &mut JoinSet<()>) {
        if !self.connection.auto_trading_enabled() || !self.connection.trading_enabled() {
            return;
        }

        let Some(gate) = self.gates.get(&sample.symbol) else {
            return;
        };
        let Some(permit) = gate.try_begin_check() else {
            return;
        };

        let engine = self.clone();
        checks.spawn(async move {
            engine.check_symbol(sample, permit).await;
        });
    }

    /// One full check: decide, publish the decision, execute if it calls
    /// for a trade. Failures never disable auto-trading.
    async fn check_symbol(&self, sample: PriceSample, permit: CheckPermit) {
        self.metrics.inc_checks_run();

        let decision = match self.decide(&sample).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("[AutoTrade] Check for {} failed: {:#}", sample.symbol, e);
                self.notifier
                    .send_error_notification(&format!(
                        "Check for {} failed: {:#}",
                        sample.symbol, e
                    ))
                    .await;
                return;
            }
        };

        self.bus.publish(BotEvent::AutoTradingCheck {
            symbol: sample.symbol.clone(),
            price: sample.price,
            decision,
        });

        let outcome = match decision {
            TradeDecision::Hold => return,
            TradeDecision::Buy => self.executor.execute_buy(&sample.symbol, sample.price).await,
            TradeDecision::SellAll => {
                self.executor
                    .execute_sell_all(&sample.symbol, sample.price)
                    .await
            }
        };

        match outcome {
            Ok(trade) => {
                // Cooldown starts only now, so a failed attempt stays
                // retryable on the next qualifying event.
                permit.mark_trade();
                info!(
                    "[AutoTrade] Committed {} {} {}",
                    trade.action, trade.quantity, trade.symbol
                );
            }
            Err(e) => {
                self.metrics.inc_orders_failed();
                error!("[AutoTrade] {} for {} failed: {:#}", decision, sample.symbol, e);
                self.notifier
                    .send_error_notification(&format!(
                        "{} {} failed: {:#}",
                        decision, sample.symbol, e
                    ))
                    .await;
            }
        }
    }

    /// Evaluate the threshold rule for one price event.
    /// Buy wins when both sides trigger in the same tick.
    async fn decide(&self, sample: &PriceSample) -> Result<TradeDecision> {
        let asset = self
            .config
            .asset_for_symbol(&sample.symbol)
            .ok_or_else(|| anyhow!("{} is not a configured trading pair", sample.symbol))?;

        let Some(reference) = self.db.get_reference_price(&asset).await? else {
            return Ok(TradeDecision::Hold);
        };

        if reference.next_buy_price > Decimal::ZERO && sample.price <= reference.next_buy_price {
            let funds = self
                .db
                .get_balance(&self.config.quote_asset)
                .await?
                .map(|b| b.free)
                .unwrap_or(Decimal::ZERO);
            if funds >= self.config.investment_amount {
                return Ok(TradeDecision::Buy);
            }
            debug!(
                "[AutoTrade] {} dip hit but only {} {} free",
                sample.symbol, funds, self.config.quote_asset
            );
        }

        if reference.next_sell_price > Decimal::ZERO && sample.price >= reference.next_sell_price {
            let holdings = self.db.get_current_holdings(&sample.symbol).await?;
            if holdings.has_position() {
                return Ok(TradeDecision::SellAll);
            }
            debug!("[AutoTrade] {} rise hit but nothing held", sample.symbol);
        }

        Ok(TradeDecision::Hold)
    }
}
