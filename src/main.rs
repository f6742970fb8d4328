//! Binance Cycle Trading Bot CLI

use anyhow::{Context, Result};
use binance_cycle_bot::api::{create_app, AppState};
use binance_cycle_bot::binance::BinanceClient;
use binance_cycle_bot::events::EventBus;
use binance_cycle_bot::notifier::Notifier;
use binance_cycle_bot::services::{
    AutoTrader, ConnectionState, Metrics, PriceCache, PriceFeed, TradeExecutor,
};
use binance_cycle_bot::{Config, Database};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "binance-cycle-bot")]
#[command(about = "Binance spot bot trading a reference-price cycle strategy")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot: price feed, auto-trading engine and API server
    Run,

    /// Show reference prices and holdings
    Status,

    /// Show recent trades
    Trades {
        /// Maximum number of trades to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show cached account balances
    Balances,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging. Override with RUST_LOG for full control,
    // e.g. RUST_LOG=binance_cycle_bot=debug
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,binance_cycle_bot={}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run => run_bot(config).await?,
        Commands::Status => show_status(&config).await?,
        Commands::Trades { limit } => show_trades(&config, limit).await?,
        Commands::Balances => show_balances(&config).await?,
    }

    Ok(())
}

async fn run_bot(config: Config) -> Result<()> {
    let config = Arc::new(config);

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              BINANCE CYCLE TRADING BOT                       ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Pairs: {:<53}║", config.symbols().join(", "));
    println!(
        "║  Per-buy investment: {:<40}║",
        format!("{} {}", config.investment_amount, config.quote_asset)
    );
    println!(
        "║  Auto-trading on start: {:<37}║",
        if config.auto_trading_on_start { "YES" } else { "NO" }
    );
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // Database and the per-asset threshold rows
    let db = Arc::new(Database::new(&config.database_path).await?);
    db.ensure_reference_rows(&config.assets).await?;

    // Exchange client: clock sync, reachability check, order filters
    let client = Arc::new(BinanceClient::new(
        &config.rest_url,
        config.api_key.as_deref().unwrap_or_default(),
        config.api_secret.as_deref().unwrap_or_default(),
        config.recv_window_ms,
    )?);
    client.sync_time().await.context("exchange clock sync failed")?;
    client.ping().await.context("exchange unreachable")?;
    let filters = client
        .exchange_filters(&config.symbols())
        .await
        .context("loading exchange order filters failed")?;

    let connection = ConnectionState::new();
    connection.set_api_connected(true);
    connection.set_auto_trading(config.auto_trading_on_start);

    // Seed the balance snapshot when credentials are configured
    if config.has_credentials() {
        match client.account_balances().await {
            Ok(balances) => db.update_account_balances(&balances).await?,
            Err(e) => warn!("Initial balance sync failed: {}", e),
        }
    } else {
        warn!("No API credentials configured, order submission will be rejected");
    }

    let bus = EventBus::default();
    let cache = PriceCache::new(connection.clone());
    let metrics = Metrics::new();
    let notifier = Arc::new(Notifier::new(
        config.telegram_bot_token.clone(),
        config.telegram_chat_id.clone(),
    ));

    let executor = Arc::new(TradeExecutor::new(
        config.clone(),
        client,
        db.clone(),
        bus.clone(),
        metrics.clone(),
        notifier.clone(),
        filters,
    ));

    let engine = AutoTrader::new(
        config.clone(),
        db.clone(),
        connection.clone(),
        bus.clone(),
        executor,
        metrics.clone(),
        notifier.clone(),
    );

    let feed = PriceFeed::new(
        config.clone(),
        cache.clone(),
        connection.clone(),
        bus.clone(),
        metrics.clone(),
        notifier,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let feed_rx = shutdown_rx.clone();
    let feed_task = tokio::spawn(async move { feed.run(feed_rx).await });

    let engine_rx = shutdown_rx;
    let engine_task = tokio::spawn(async move { engine.run(engine_rx).await });

    // API server
    let state = AppState {
        config: config.clone(),
        db,
        connection,
        cache,
        metrics,
        bus,
    };
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let listener = TcpListener::bind(addr).await?;
    info!("API listening on http://{}", addr);
    println!("  API:       http://localhost:{}/api", config.api_port);
    println!("  WebSocket: ws://localhost:{}/ws", config.api_port);
    println!("  Health:    http://localhost:{}/health", config.api_port);
    println!();

    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("API server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("ctrl-c handler failed")?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    let _ = feed_task.await;
    let _ = engine_task.await;
    server_task.abort();

    Ok(())
}

async fn show_status(config: &Config) -> Result<()> {
    let db = Database::new(&config.database_path).await?;

    println!("\n{}", "=".repeat(70));
    println!("  REFERENCE PRICES");
    println!("{}", "=".repeat(70));
    println!(
        "{:<8} {:>13} {:>13} {:>13} {:>13}",
        "ASSET", "FIRST BUY", "LAST TRADE", "NEXT BUY", "NEXT SELL"
    );
    for reference in db.get_all_reference_prices().await? {
        println!(
            "{:<8} {:>13} {:>13} {:>13} {:>13}",
            reference.asset,
            reference.first_transaction_price,
            reference.last_transaction_price,
            reference.next_buy_price,
            reference.next_sell_price,
        );
    }

    println!("\n{}", "=".repeat(70));
    println!("  HOLDINGS");
    println!("{}", "=".repeat(70));
    let mut any = false;
    for symbol in config.symbols() {
        let holdings = db.get_current_holdings(&symbol).await?;
        if holdings.has_position() {
            any = true;
            println!(
                "{:<10} {} (avg buy {})",
                symbol, holdings.quantity, holdings.avg_buy_price
            );
        }
    }
    if !any {
        println!("(none)");
    }

    Ok(())
}

async fn show_trades(config: &Config, limit: i64) -> Result<()> {
    let db = Database::new(&config.database_path).await?;
    let trades = db.get_trades(limit).await?;

    println!("\n{}", "=".repeat(70));
    println!("  RECENT TRADES");
    println!("{}", "=".repeat(70));
    if trades.is_empty() {
        println!("(none)");
        return Ok(());
    }
    for trade in trades {
        println!(
            "{}  {:<4} {:<10} {:>14} @ {:>13}  = {:>11} {}",
            trade.trade_time.format("%Y-%m-%d %H:%M:%S"),
            trade.action,
            trade.symbol,
            trade.quantity,
            trade.price,
            trade.quote_amount,
            config.quote_asset,
        );
    }

    Ok(())
}

async fn show_balances(config: &Config) -> Result<()> {
    let db = Database::new(&config.database_path).await?;
    let balances = db.get_account_balances().await?;

    println!("\n{}", "=".repeat(70));
    println!("  ACCOUNT BALANCES (last sync)");
    println!("{}", "=".repeat(70));
    if balances.is_empty() {
        println!("(no snapshot yet, run the bot once with API credentials)");
        return Ok(());
    }
    println!("{:<8} {:>18} {:>18} {:>18}", "ASSET", "FREE", "LOCKED", "TOTAL");
    for balance in balances {
        println!(
            "{:<8} {:>18} {:>18} {:>18}",
            balance.asset,
            balance.free,
            balance.locked,
            balance.total(),
        );
    }

    Ok(())
}
