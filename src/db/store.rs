use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::db::models::{BalanceHistoryRow, TokenRow, WalletRow};
use crate::error::{AppError, Result};
use crate::types::{BalanceRow, PreviousSnapshot, Snapshot, Token, Trade, Wallet};

/// Source of the tracked wallet and token sets.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn list_wallets(&self) -> Result<Vec<Wallet>>;
    async fn list_tokens(&self) -> Result<Vec<Token>>;
}

/// Append-only balance history plus the set of reported trades.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest stored row per key. Keys without a row are implicitly zero.
    async fn previous_snapshot(&self) -> Result<PreviousSnapshot>;

    /// Writes the whole snapshot atomically: either every row and check marker
    /// lands, or none does. Returns the timestamp it was stored under, which is
    /// strictly later than any earlier snapshot.
    async fn append_snapshot(&self, snapshot: &Snapshot) -> Result<DateTime<Utc>>;

    async fn persisted_trade_hashes(&self) -> Result<HashSet<String>>;

    /// Inserts trades keyed by tx hash. Already-stored hashes are skipped
    /// without error. Returns the number of rows actually inserted.
    async fn append_trades(&self, trades: &[Trade]) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqliteStore {
    pool: sqlx::SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistrySource for SqliteStore {
    async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let rows = sqlx::query_as::<_, WalletRow>(
            "SELECT wallet_address, alias FROM wallets ORDER BY wallet_address",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Wallet {
                address: r.wallet_address,
                alias: r.alias,
            })
            .collect())
    }

    async fn list_tokens(&self) -> Result<Vec<Token>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT token_address, name, symbol FROM tokens ORDER BY token_address",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Token {
                address: r.token_address,
                name: r.name,
                symbol: r.symbol,
            })
            .collect())
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn previous_snapshot(&self) -> Result<PreviousSnapshot> {
        // A wallet's previous snapshot is whatever its most recent check wrote.
        let rows = sqlx::query_as::<_, BalanceHistoryRow>(
            r#"
            SELECT h.wallet_address, h.token_address, h.balance, h.value
            FROM wallet_balance_history h
            JOIN (
                SELECT wallet_address, MAX(timestamp) AS checked_at
                FROM wallet_checks
                GROUP BY wallet_address
            ) c ON c.wallet_address = h.wallet_address AND c.checked_at = h.timestamp
            ORDER BY h.wallet_address, h.token_address
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let last_check: Option<i64> =
            sqlx::query_scalar("SELECT MAX(timestamp) FROM wallet_checks")
                .fetch_one(&self.pool)
                .await?;

        let rows = rows
            .into_iter()
            .map(|r| {
                Ok(BalanceRow {
                    balance: parse_stored_decimal(&r.balance)?,
                    value: parse_stored_decimal(&r.value)?,
                    wallet_address: r.wallet_address,
                    token_address: r.token_address,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PreviousSnapshot {
            rows,
            previous_check_time: last_check.and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }

    async fn append_snapshot(&self, snapshot: &Snapshot) -> Result<DateTime<Utc>> {
        let mut tx = self.pool.begin().await?;

        // Two cycles inside one millisecond must still get distinct keys.
        let last: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(ts) FROM (
                SELECT MAX(timestamp) AS ts FROM wallet_checks
                UNION ALL
                SELECT MAX(timestamp) AS ts FROM wallet_balance_history
            )
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;
        let ts = match last {
            Some(last) => snapshot.taken_at.timestamp_millis().max(last + 1),
            None => snapshot.taken_at.timestamp_millis(),
        };

        for row in &snapshot.rows {
            sqlx::query(
                r#"
                INSERT INTO wallet_balance_history (wallet_address, token_address, timestamp, balance, value)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.wallet_address)
            .bind(&row.token_address)
            .bind(ts)
            .bind(row.balance.to_string())
            .bind(row.value.to_string())
            .execute(&mut *tx)
            .await?;
        }

        for wallet in &snapshot.wallets {
            sqlx::query("INSERT INTO wallet_checks (wallet_address, timestamp) VALUES (?, ?)")
                .bind(wallet)
                .bind(ts)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        DateTime::<Utc>::from_timestamp_millis(ts)
            .ok_or(AppError::InvalidTimestamp(ts))
    }

    async fn persisted_trade_hashes(&self) -> Result<HashSet<String>> {
        let hashes: Vec<String> = sqlx::query_scalar("SELECT tx_hash FROM trades")
            .fetch_all(&self.pool)
            .await?;
        Ok(hashes.into_iter().collect())
    }

    async fn append_trades(&self, trades: &[Trade]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for trade in trades {
            let result = sqlx::query(
                r#"
                INSERT INTO trades (
                    tx_hash, wallet_address, from_token_symbol, to_token_symbol,
                    price_usd, volume_usd, timestamp
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(tx_hash) DO NOTHING
                "#,
            )
            .bind(&trade.tx_hash)
            .bind(&trade.wallet_address)
            .bind(&trade.from_token_symbol)
            .bind(&trade.to_token_symbol)
            .bind(trade.price_usd.to_string())
            .bind(trade.volume_usd.to_string())
            .bind(trade.timestamp.timestamp_millis())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

fn parse_stored_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|_| AppError::InvalidDecimal(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SqliteStore {
        // Every in-memory connection is its own database; pin the pool to one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn row(wallet: &str, token: &str, balance: &str) -> BalanceRow {
        BalanceRow {
            wallet_address: wallet.to_string(),
            token_address: token.to_string(),
            balance: dec(balance),
            value: dec(balance) * dec("0.5"),
        }
    }

    fn snapshot(ms: i64, wallets: &[&str], rows: Vec<BalanceRow>) -> Snapshot {
        Snapshot {
            taken_at: Utc.timestamp_millis_opt(ms).unwrap(),
            wallets: wallets.iter().map(|w| w.to_string()).collect(),
            rows,
        }
    }

    fn trade(tx: &str) -> Trade {
        Trade {
            tx_hash: tx.to_string(),
            wallet_address: "w1".to_string(),
            from_token_symbol: "SOL".to_string(),
            to_token_symbol: "WIF".to_string(),
            price_usd: dec("2.35"),
            volume_usd: dec("470.0"),
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        }
    }

    #[tokio::test]
    async fn registry_lists_are_sorted_by_address() {
        let store = test_store().await;
        sqlx::query("INSERT INTO wallets (wallet_address, alias) VALUES ('w2', 'Two'), ('w1', 'One')")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO tokens (token_address, name, symbol) VALUES ('t1', 'Bonk', 'BONK')")
            .execute(&store.pool)
            .await
            .unwrap();

        let wallets = store.list_wallets().await.unwrap();
        assert_eq!(wallets[0].address, "w1");
        assert_eq!(wallets[1].alias, "Two");
        let tokens = store.list_tokens().await.unwrap();
        assert_eq!(tokens[0].symbol, "BONK");
    }

    #[tokio::test]
    async fn empty_history_has_no_previous_time() {
        let store = test_store().await;
        let previous = store.previous_snapshot().await.unwrap();
        assert!(previous.rows.is_empty());
        assert!(previous.previous_check_time.is_none());
    }

    #[tokio::test]
    async fn previous_is_each_wallets_latest_check() {
        let store = test_store().await;
        store
            .append_snapshot(&snapshot(1_000, &["w1", "w2"], vec![
                row("w1", "A", "10"),
                row("w1", "B", "3"),
                row("w2", "A", "7"),
            ]))
            .await
            .unwrap();
        // w1 sold all of B; w2 could not be checked this time.
        store
            .append_snapshot(&snapshot(2_000, &["w1"], vec![row("w1", "A", "12")]))
            .await
            .unwrap();

        let previous = store.previous_snapshot().await.unwrap();
        assert_eq!(previous.rows, vec![row("w1", "A", "12"), row("w2", "A", "7")]);
        assert_eq!(
            previous.previous_check_time.map(|t| t.timestamp_millis()),
            Some(2_000)
        );
    }

    #[tokio::test]
    async fn decimals_round_trip_exactly() {
        let store = test_store().await;
        let rows = vec![
            row("w1", "A", "0.000000001"),
            row("w1", "B", "123456789.987654321"),
        ];
        store
            .append_snapshot(&snapshot(1_000, &["w1"], rows.clone()))
            .await
            .unwrap();
        assert_eq!(store.previous_snapshot().await.unwrap().rows, rows);
    }

    #[tokio::test]
    async fn corrupt_stored_decimal_is_reported() {
        let store = test_store().await;
        sqlx::query("INSERT INTO wallet_checks (wallet_address, timestamp) VALUES ('w1', 5)")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO wallet_balance_history VALUES ('w1', 'A', 5, 'NaN-ish', '0')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store.previous_snapshot().await.unwrap_err();
        assert!(matches!(err, AppError::InvalidDecimal(_)));
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_no_rows() {
        let store = test_store().await;
        store
            .append_snapshot(&snapshot(1_000, &["w1"], vec![row("w1", "A", "1")]))
            .await
            .unwrap();
        // The repeated check marker collides after the history row is written.
        let err = store
            .append_snapshot(&snapshot(2_000, &["w1", "w1"], vec![row("w1", "B", "2")]))
            .await;
        assert!(err.is_err());

        let previous = store.previous_snapshot().await.unwrap();
        assert_eq!(previous.rows, vec![row("w1", "A", "1")]);
        assert_eq!(
            previous.previous_check_time.map(|t| t.timestamp_millis()),
            Some(1_000)
        );
    }

    #[tokio::test]
    async fn snapshots_in_the_same_millisecond_get_distinct_timestamps() {
        let store = test_store().await;
        let first = store
            .append_snapshot(&snapshot(1_000, &["w1"], vec![row("w1", "A", "1")]))
            .await
            .unwrap();
        let second = store
            .append_snapshot(&snapshot(1_000, &["w1"], vec![row("w1", "A", "2")]))
            .await
            .unwrap();
        // A clock that stepped backwards is pushed forward too.
        let third = store
            .append_snapshot(&snapshot(500, &["w1"], vec![row("w1", "A", "3")]))
            .await
            .unwrap();

        assert_eq!(first.timestamp_millis(), 1_000);
        assert_eq!(second.timestamp_millis(), 1_001);
        assert_eq!(third.timestamp_millis(), 1_002);

        let previous = store.previous_snapshot().await.unwrap();
        assert_eq!(previous.rows, vec![row("w1", "A", "3")]);
        assert_eq!(previous.previous_check_time, Some(third));
    }

    #[tokio::test]
    async fn reinserting_a_trade_is_a_no_op() {
        let store = test_store().await;
        assert_eq!(store.append_trades(&[trade("tx1"), trade("tx2")]).await.unwrap(), 2);
        assert_eq!(store.append_trades(&[trade("tx1")]).await.unwrap(), 0);

        let hashes = store.persisted_trade_hashes().await.unwrap();
        assert_eq!(hashes, HashSet::from(["tx1".to_string(), "tx2".to_string()]));

        let stored_volume: String =
            sqlx::query_scalar("SELECT volume_usd FROM trades WHERE tx_hash = 'tx1'")
                .fetch_one(&store.pool)
                .await
                .unwrap();
        assert_eq!(stored_volume, "470.0");
    }
}
