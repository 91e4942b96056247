//! SQLite bar store.
//!
//! Reads the `bars` table filled by external pollers. `upsert_bars`
//! exists for fixtures and backfills; the scanner itself only reads.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePool, Row};

use crate::data::BarStore;
use crate::storage::sqlite::open_pool;
use crate::types::{Bar, Timeframe};

pub struct SqliteBarStore {
    pool: SqlitePool,
}

impl SqliteBarStore {
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = open_pool(db_path).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                ts INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (symbol, timeframe, ts)
            );",
        )
        .execute(&pool)
        .await
        .context("Failed to create bars table")?;

        Ok(Self { pool })
    }

    pub async fn upsert_bars(&self, symbol: &str, timeframe: Timeframe, bars: &[Bar]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO bars (symbol, timeframe, ts, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, timeframe, ts) DO UPDATE SET
                    open = excluded.open, high = excluded.high, low = excluded.low,
                    close = excluded.close, volume = excluded.volume
                "#,
            )
            .bind(symbol)
            .bind(timeframe.as_str())
            .bind(bar.timestamp_ms)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to upsert bar for {symbol} {timeframe}"))?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl BarStore for SqliteBarStore {
    async fn last_n(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Result<Vec<Bar>> {
        let rows = sqlx::query(
            "SELECT ts, open, high, low, close, volume FROM bars
             WHERE symbol = ? AND timeframe = ?
             ORDER BY ts DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to read bars for {symbol} {timeframe}"))?;

        let mut bars: Vec<Bar> = rows
            .iter()
            .map(|row| Bar {
                timestamp_ms: row.get("ts"),
                open: row.get("open"),
                high: row.get("high"),
                low: row.get("low"),
                close: row.get("close"),
                volume: row.get("volume"),
            })
            .collect();
        bars.reverse();
        Ok(bars)
    }
}
