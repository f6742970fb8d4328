//! SQLite database for reference prices, the trade ledger, and balances

use crate::types::{
    AssetBalance, Holdings, ReferencePrice, ReferencePriceUpdate, TradeAction, TradeRecord,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reference_prices (
                asset TEXT PRIMARY KEY,
                first_transaction_price TEXT NOT NULL,
                last_transaction_price TEXT NOT NULL,
                next_buy_price TEXT NOT NULL,
                next_sell_price TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                exchange_trade_id TEXT NOT NULL UNIQUE,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                quote_amount TEXT NOT NULL,
                trade_time TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_time ON trades(trade_time)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_balances (
                asset TEXT PRIMARY KEY,
                free TEXT NOT NULL,
                locked TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database initialized");
        Ok(())
    }

    /// Create all-zero reference rows for assets that do not have one yet.
    /// Existing rows are left untouched.
    pub async fn ensure_reference_rows(&self, assets: &[String]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for asset in assets {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO reference_prices
                    (asset, first_transaction_price, last_transaction_price, next_buy_price, next_sell_price, updated_at)
                VALUES (?, '0', '0', '0', '0', ?)
                "#,
            )
            .bind(asset)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Get the reference price row for an asset
    pub async fn get_reference_price(&self, asset: &str) -> Result<Option<ReferencePrice>> {
        let row = sqlx::query("SELECT * FROM reference_prices WHERE asset = ?")
            .bind(asset)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_reference(&r)?)),
            None => Ok(None),
        }
    }

    /// Get all reference price rows
    pub async fn get_all_reference_prices(&self) -> Result<Vec<ReferencePrice>> {
        let rows = sqlx::query("SELECT * FROM reference_prices ORDER BY asset")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_reference).collect()
    }

    /// Apply a committed trade to an asset's thresholds.
    ///
    /// Reads the current row, runs the threshold transition, and writes the
    /// full row back inside one transaction, so concurrent trades can never
    /// interleave partial states. Returns the row as written.
    pub async fn apply_trade_to_reference(
        &self,
        asset: &str,
        action: TradeAction,
        price: Decimal,
        buy_pct: Decimal,
        sell_pct: Decimal,
    ) -> Result<ReferencePrice> {
        // Open as a writer up front. A deferred transaction takes a read
        // snapshot first, and in WAL mode the upgrade to write fails
        // outright once any other connection commits in between.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let row = sqlx::query("SELECT * FROM reference_prices WHERE asset = ?")
            .bind(asset)
            .fetch_optional(&mut *tx)
            .await?;

        let mut reference = match row {
            Some(r) => row_to_reference(&r)?,
            None => ReferencePrice::new(asset),
        };

        match action {
            TradeAction::Buy => reference.apply_buy(price, buy_pct, sell_pct),
            TradeAction::Sell => reference.apply_sell_all(price, buy_pct),
        }

        upsert_reference(&mut tx, &reference).await?;

        tx.commit().await?;
        Ok(reference)
    }

    /// Apply an operator-supplied partial update inside one transaction.
    /// Arms a fresh asset's first buy trigger, which executed trades alone
    /// never do.
    pub async fn update_reference_price(
        &self,
        asset: &str,
        update: &ReferencePriceUpdate,
    ) -> Result<ReferencePrice> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let row = sqlx::query("SELECT * FROM reference_prices WHERE asset = ?")
            .bind(asset)
            .fetch_optional(&mut *tx)
            .await?;

        let mut reference = match row {
            Some(r) => row_to_reference(&r)?,
            None => ReferencePrice::new(asset),
        };
        reference.apply_update(update);

        upsert_reference(&mut tx, &reference).await?;

        tx.commit().await?;
        Ok(reference)
    }

    /// Append a trade to the ledger and return its row id. Returns None when
    /// the exchange trade id was already recorded, so replays and retries
    /// cannot double-count.
    pub async fn record_trade(
        &self,
        exchange_trade_id: &str,
        symbol: &str,
        action: TradeAction,
        quantity: Decimal,
        price: Decimal,
        quote_amount: Decimal,
        trade_time: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO trades (exchange_trade_id, symbol, action, quantity, price, quote_amount, trade_time)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(exchange_trade_id)
        .bind(symbol)
        .bind(action.to_string())
        .bind(quantity.to_string())
        .bind(price.to_string())
        .bind(quote_amount.to_string())
        .bind(trade_time.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(Some(result.last_insert_rowid()))
        } else {
            Ok(None)
        }
    }

    /// Most recent trades, newest first
    pub async fn get_trades(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_trade).collect()
    }

    /// Net holdings for a symbol, aggregated from the ledger.
    ///
    /// Decimal columns are TEXT, so the sums run here rather than in SQL
    /// where SQLite would fall back to float arithmetic.
    pub async fn get_current_holdings(&self, symbol: &str) -> Result<Holdings> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT action, quantity, quote_amount FROM trades WHERE symbol = ?")
                .bind(symbol)
                .fetch_all(&self.pool)
                .await?;

        let mut quantity = Decimal::ZERO;
        let mut buy_quantity = Decimal::ZERO;
        let mut buy_quote = Decimal::ZERO;

        for (action, qty_str, quote_str) in rows {
            let qty = Decimal::from_str(&qty_str).context("Invalid quantity in ledger")?;
            let quote = Decimal::from_str(&quote_str).context("Invalid quote amount in ledger")?;
            match action.parse::<TradeAction>() {
                Ok(TradeAction::Buy) => {
                    quantity += qty;
                    buy_quantity += qty;
                    buy_quote += quote;
                }
                Ok(TradeAction::Sell) => quantity -= qty,
                Err(e) => anyhow::bail!("Invalid action in ledger: {}", e),
            }
        }

        let avg_buy_price = if buy_quantity > Decimal::ZERO {
            buy_quote / buy_quantity
        } else {
            Decimal::ZERO
        };

        Ok(Holdings {
            quantity,
            avg_buy_price,
        })
    }

    /// Replace the stored balance snapshot
    pub async fn update_account_balances(&self, balances: &[AssetBalance]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM account_balances")
            .execute(&mut *tx)
            .await?;

        for balance in balances {
            sqlx::query(
                "INSERT INTO account_balances (asset, free, locked, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&balance.asset)
            .bind(balance.free.to_string())
            .bind(balance.locked.to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All balances from the latest snapshot
    pub async fn get_account_balances(&self) -> Result<Vec<AssetBalance>> {
        let rows = sqlx::query("SELECT * FROM account_balances ORDER BY asset")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_balance).collect()
    }

    /// Balance of a single asset from the latest snapshot
    pub async fn get_balance(&self, asset: &str) -> Result<Option<AssetBalance>> {
        let row = sqlx::query("SELECT * FROM account_balances WHERE asset = ?")
            .bind(asset)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_balance(&r)?)),
            None => Ok(None),
        }
    }

    /// Close the pool so every later query fails
    #[cfg(test)]
    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}

/// Write a full reference row inside the caller's transaction
async fn upsert_reference(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    reference: &ReferencePrice,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO reference_prices
            (asset, first_transaction_price, last_transaction_price, next_buy_price, next_sell_price, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&reference.asset)
    .bind(reference.first_transaction_price.to_string())
    .bind(reference.last_transaction_price.to_string())
    .bind(reference.next_buy_price.to_string())
    .bind(reference.next_sell_price.to_string())
    .bind(reference.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn get_decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let text: String = row.get(column);
    Decimal::from_str(&text).with_context(|| format!("Invalid decimal in column {}", column))
}

fn get_datetime(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let text: String = row.get(column);
    Ok(DateTime::parse_from_rfc3339(&text)
        .with_context(|| format!("Invalid timestamp in column {}", column))?
        .with_timezone(&Utc))
}

fn row_to_reference(row: &SqliteRow) -> Result<ReferencePrice> {
    Ok(ReferencePrice {
        asset: row.get("asset"),
        first_transaction_price: get_decimal(row, "first_transaction_price")?,
        last_transaction_price: get_decimal(row, "last_transaction_price")?,
        next_buy_price: get_decimal(row, "next_buy_price")?,
        next_sell_price: get_decimal(row, "next_sell_price")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

fn row_to_trade(row: &SqliteRow) -> Result<TradeRecord> {
    let action: String = row.get("action");
    Ok(TradeRecord {
        id: row.get("id"),
        exchange_trade_id: row.get("exchange_trade_id"),
        symbol: row.get("symbol"),
        action: action
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("Invalid action in ledger")?,
        quantity: get_decimal(row, "quantity")?,
        price: get_decimal(row, "price")?,
        quote_amount: get_decimal(row, "quote_amount")?,
        trade_time: get_datetime(row, "trade_time")?,
    })
}

fn row_to_balance(row: &SqliteRow) -> Result<AssetBalance> {
    Ok(AssetBalance {
        asset: row.get("asset"),
        free: get_decimal(row, "free")?,
        locked: get_decimal(row, "locked")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    async fn test_db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn frac(v: &str) -> Decimal {
        v.parse().unwrap()
    }

    #[tokio::test]
    async fn ensure_rows_is_idempotent() {
        let (db, _dir) = test_db().await;
        let assets = vec!["BTC".to_string(), "ETH".to_string()];

        db.ensure_reference_rows(&assets).await.unwrap();
        let rp = db.get_reference_price("BTC").await.unwrap().unwrap();
        assert_eq!(rp.next_buy_price, Decimal::ZERO);

        // mutate, then ensure again; the row must survive
        db.apply_trade_to_reference("BTC", TradeAction::Buy, dec!(100), frac("0.01"), frac("0.02"))
            .await
            .unwrap();
        db.ensure_reference_rows(&assets).await.unwrap();

        let rp = db.get_reference_price("BTC").await.unwrap().unwrap();
        assert_eq!(rp.first_transaction_price, dec!(100));
        assert_eq!(db.get_all_reference_prices().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn buy_then_sell_transitions_round_trip() {
        let (db, _dir) = test_db().await;
        db.ensure_reference_rows(&["BTC".to_string()]).await.unwrap();

        let after_buy = db
            .apply_trade_to_reference("BTC", TradeAction::Buy, dec!(50000), frac("0.01"), frac("0.02"))
            .await
            .unwrap();
        assert_eq!(after_buy.next_buy_price, dec!(49500.00));
        assert_eq!(after_buy.next_sell_price, dec!(51000.00));

        let stored = db.get_reference_price("BTC").await.unwrap().unwrap();
        assert_eq!(stored.next_sell_price, after_buy.next_sell_price);

        let after_sell = db
            .apply_trade_to_reference("BTC", TradeAction::Sell, dec!(51000), frac("0.01"), frac("0.02"))
            .await
            .unwrap();
        assert_eq!(after_sell.first_transaction_price, Decimal::ZERO);
        assert_eq!(after_sell.next_sell_price, Decimal::ZERO);
        assert_eq!(after_sell.next_buy_price, dec!(50490.00));
    }

    #[tokio::test]
    async fn operator_patch_arms_a_fresh_cycle() {
        let (db, _dir) = test_db().await;
        db.ensure_reference_rows(&["BTC".to_string()]).await.unwrap();

        let patched = db
            .update_reference_price(
                "BTC",
                &ReferencePriceUpdate {
                    next_buy_price: Some(dec!(48000)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(patched.next_buy_price, dec!(48000));
        assert_eq!(patched.next_sell_price, Decimal::ZERO);
        assert_eq!(patched.first_transaction_price, Decimal::ZERO);

        let stored = db.get_reference_price("BTC").await.unwrap().unwrap();
        assert_eq!(stored.next_buy_price, dec!(48000));
    }

    #[tokio::test]
    async fn concurrent_writers_on_distinct_assets_all_commit() {
        let (db, _dir) = test_db().await;
        let db = std::sync::Arc::new(db);
        let assets = ["BTC", "ETH", "SOL"];
        let rows: Vec<String> = assets.iter().map(|a| a.to_string()).collect();
        db.ensure_reference_rows(&rows).await.unwrap();

        let mut tasks = Vec::new();
        for asset in assets {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    db.apply_trade_to_reference(
                        asset,
                        TradeAction::Buy,
                        Decimal::from(100 + i),
                        frac("0.01"),
                        frac("0.02"),
                    )
                    .await?;
                }
                Ok::<_, anyhow::Error>(())
            }));
        }

        // Ledger commits land between the threshold transactions.
        let ledger_db = db.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                ledger_db
                    .record_trade(
                        &format!("{}", 9000 + i),
                        "BTCUSDT",
                        TradeAction::Buy,
                        dec!(0.001),
                        dec!(100),
                        dec!(0.1),
                        Utc::now(),
                    )
                    .await?;
            }
            Ok::<_, anyhow::Error>(())
        }));

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        for asset in assets {
            let row = db.get_reference_price(asset).await.unwrap().unwrap();
            assert_eq!(row.last_transaction_price, dec!(109));
            assert_eq!(row.next_buy_price, dec!(107.91));
        }
        assert_eq!(db.get_trades(20).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn ledger_insert_is_idempotent() {
        let (db, _dir) = test_db().await;
        let now = Utc::now();

        let first = db
            .record_trade("12345", "BTCUSDT", TradeAction::Buy, dec!(0.001), dec!(50000), dec!(50), now)
            .await
            .unwrap();
        let second = db
            .record_trade("12345", "BTCUSDT", TradeAction::Buy, dec!(0.001), dec!(50000), dec!(50), now)
            .await
            .unwrap();

        assert_eq!(first, Some(1));
        assert!(second.is_none());

        let trades = db.get_trades(10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id, 1);
    }

    #[tokio::test]
    async fn holdings_aggregate_buys_minus_sells() {
        let (db, _dir) = test_db().await;
        let now = Utc::now();

        db.record_trade("1", "BTCUSDT", TradeAction::Buy, dec!(1), dec!(100), dec!(100), now)
            .await
            .unwrap();
        db.record_trade("2", "BTCUSDT", TradeAction::Buy, dec!(1), dec!(110), dec!(110), now)
            .await
            .unwrap();
        db.record_trade("3", "BTCUSDT", TradeAction::Sell, dec!(0.5), dec!(120), dec!(60), now)
            .await
            .unwrap();
        // other symbols must not leak in
        db.record_trade("4", "ETHUSDT", TradeAction::Buy, dec!(10), dec!(50), dec!(500), now)
            .await
            .unwrap();

        let holdings = db.get_current_holdings("BTCUSDT").await.unwrap();
        assert_eq!(holdings.quantity, dec!(1.5));
        assert_eq!(holdings.avg_buy_price, dec!(105));
        assert!(holdings.has_position());

        let empty = db.get_current_holdings("SOLUSDT").await.unwrap();
        assert_eq!(empty.quantity, Decimal::ZERO);
        assert_eq!(empty.avg_buy_price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn balance_snapshot_replaces_previous() {
        let (db, _dir) = test_db().await;

        db.update_account_balances(&[
            AssetBalance { asset: "BTC".to_string(), free: dec!(1), locked: dec!(0) },
            AssetBalance { asset: "USDT".to_string(), free: dec!(500), locked: dec!(10) },
        ])
        .await
        .unwrap();

        db.update_account_balances(&[AssetBalance {
            asset: "USDT".to_string(),
            free: dec!(400),
            locked: dec!(0),
        }])
        .await
        .unwrap();

        let balances = db.get_account_balances().await.unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].free, dec!(400));

        assert!(db.get_balance("BTC").await.unwrap().is_none());
        let usdt = db.get_balance("USDT").await.unwrap().unwrap();
        assert_eq!(usdt.total(), dec!(400));
    }
}
