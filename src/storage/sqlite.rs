//! SQLite-backed diagnostics and forecast logs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
        SqliteSynchronous,
    },
    QueryBuilder, Row, Sqlite,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::storage::{
    DiagnosticsLog, ForecastLog, ForecastQuery, ForecastRecord, SnapshotOrder, SnapshotQuery,
};
use crate::types::DiagnosticsSnapshot;

/// Open (creating if missing) a WAL-mode SQLite database.
pub async fn open_pool(db_path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for {db_path}"))?;
        }
    }

    let connection_options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10))
        .synchronous(SqliteSynchronous::Normal);

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(connection_options)
        .await
        .with_context(|| format!("Failed to connect to {db_path}"))
}

// ---------------------------------------------------------------------------
// Diagnostics log
// ---------------------------------------------------------------------------

pub struct SqliteDiagnosticsLog {
    pool: SqlitePool,
}

const SNAPSHOT_COLUMNS: &str = "id, ts, symbol, timeframe, phase, trend, volatility, liquidity, \
     structure, regime, pump_score, risk_score, close_price, strategy_mode, metrics_json, pattern_key, \
     reliability_score";

impl SqliteDiagnosticsLog {
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = open_pool(db_path).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                phase TEXT NOT NULL,
                trend TEXT NOT NULL,
                volatility TEXT NOT NULL,
                liquidity TEXT NOT NULL,
                structure TEXT NOT NULL,
                regime TEXT,
                pump_score REAL NOT NULL,
                risk_score REAL NOT NULL,
                close_price REAL NOT NULL,
                strategy_mode TEXT NOT NULL,
                metrics_json TEXT NOT NULL,
                pattern_key TEXT NOT NULL,
                reliability_score REAL,
                UNIQUE (symbol, timeframe, ts)
            );",
        )
        .execute(&pool)
        .await
        .context("Failed to create snapshots table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_pattern ON snapshots (pattern_key);")
            .execute(&pool)
            .await
            .context("Failed to create pattern index")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_regime ON snapshots (regime, ts);")
            .execute(&pool)
            .await
            .context("Failed to create regime index")?;

        Ok(Self { pool })
    }

    async fn existing_id(&self, snapshot: &DiagnosticsSnapshot) -> Result<i64> {
        let row = sqlx::query("SELECT id FROM snapshots WHERE symbol = ? AND timeframe = ? AND ts = ?")
            .bind(&snapshot.symbol)
            .bind(snapshot.timeframe.as_str())
            .bind(snapshot.timestamp_ms)
            .fetch_one(&self.pool)
            .await
            .context("Failed to look up existing snapshot")?;
        Ok(row.get("id"))
    }
}

fn snapshot_from_row(row: &SqliteRow) -> Result<DiagnosticsSnapshot> {
    let metrics_json: String = row.get("metrics_json");
    let timeframe: String = row.get("timeframe");
    let phase: String = row.get("phase");
    let trend: String = row.get("trend");
    let volatility: String = row.get("volatility");
    let liquidity: String = row.get("liquidity");
    let structure: String = row.get("structure");

    Ok(DiagnosticsSnapshot {
        id: Some(row.get("id")),
        timestamp_ms: row.get("ts"),
        symbol: row.get("symbol"),
        timeframe: timeframe.parse()?,
        phase: phase.parse()?,
        trend: trend.parse()?,
        volatility: volatility.parse()?,
        liquidity: liquidity.parse()?,
        structure: structure.parse()?,
        pump_score: row.get("pump_score"),
        risk_score: row.get("risk_score"),
        close_price: row.get("close_price"),
        strategy_mode: row.get("strategy_mode"),
        metrics: serde_json::from_str(&metrics_json).context("Corrupt snapshot metrics")?,
        pattern_key: row.get("pattern_key"),
        reliability_score: row.get("reliability_score"),
    })
}

#[async_trait]
impl DiagnosticsLog for SqliteDiagnosticsLog {
    async fn save_snapshot(&self, snapshot: &DiagnosticsSnapshot) -> Result<i64> {
        let metrics_json =
            serde_json::to_string(&snapshot.metrics).context("Failed to serialise metrics")?;

        let result = sqlx::query(
            r#"
            INSERT INTO snapshots (ts, symbol, timeframe, phase, trend, volatility, liquidity,
                structure, regime, pump_score, risk_score, close_price, strategy_mode, metrics_json,
                pattern_key, reliability_score)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, timeframe, ts) DO NOTHING
            "#,
        )
        .bind(snapshot.timestamp_ms)
        .bind(&snapshot.symbol)
        .bind(snapshot.timeframe.as_str())
        .bind(snapshot.phase.as_str())
        .bind(snapshot.trend.as_str())
        .bind(snapshot.volatility.as_str())
        .bind(snapshot.liquidity.as_str())
        .bind(snapshot.structure.as_str())
        .bind(snapshot.regime().map(|r| r.as_str()))
        .bind(snapshot.pump_score)
        .bind(snapshot.risk_score)
        .bind(snapshot.close_price)
        .bind(&snapshot.strategy_mode)
        .bind(&metrics_json)
        .bind(&snapshot.pattern_key)
        .bind(snapshot.reliability_score)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save snapshot for {}", snapshot.symbol))?;

        if result.rows_affected() == 0 {
            debug!(symbol = %snapshot.symbol, ts = snapshot.timestamp_ms, "Snapshot already logged");
            return self.existing_id(snapshot).await;
        }
        Ok(result.last_insert_rowid())
    }

    async fn get_snapshots(&self, query: &SnapshotQuery) -> Result<Vec<DiagnosticsSnapshot>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE 1 = 1"));

        if let Some(symbol) = &query.symbol {
            qb.push(" AND symbol = ").push_bind(symbol.clone());
        }
        if let Some(timeframe) = query.timeframe {
            qb.push(" AND timeframe = ").push_bind(timeframe.as_str());
        }
        if let Some(phase) = query.phase {
            qb.push(" AND phase = ").push_bind(phase.as_str());
        }
        if let Some(regime) = query.regime {
            qb.push(" AND regime = ").push_bind(regime.as_str());
        }
        if let Some(key) = &query.pattern_key {
            qb.push(" AND pattern_key = ").push_bind(key.clone());
        }
        if let Some(min) = query.min_pump_score {
            qb.push(" AND pump_score >= ").push_bind(min);
        }
        if let Some(max) = query.max_pump_score {
            qb.push(" AND pump_score <= ").push_bind(max);
        }
        if let Some(since) = query.since_ms {
            qb.push(" AND ts >= ").push_bind(since);
        }
        if let Some(until) = query.until_ms {
            qb.push(" AND ts <= ").push_bind(until);
        }
        qb.push(match query.order {
            SnapshotOrder::OldestFirst => " ORDER BY ts ASC, id ASC",
            SnapshotOrder::NewestFirst => " ORDER BY ts DESC, id DESC",
        });
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query snapshots")?;
        rows.iter().map(snapshot_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Forecast log
// ---------------------------------------------------------------------------

pub struct SqliteForecastLog {
    pool: SqlitePool,
}

impl SqliteForecastLog {
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = open_pool(db_path).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS forecasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                horizon_bars INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL,
                target_ms INTEGER NOT NULL,
                entry_price REAL NOT NULL,
                predicted_return REAL NOT NULL,
                raw_p_up REAL NOT NULL,
                calibrated_p_up REAL NOT NULL,
                setup_type TEXT,
                grade TEXT,
                realized_return REAL,
                resolved_at_ms INTEGER
            );",
        )
        .execute(&pool)
        .await
        .context("Failed to create forecasts table")?;

        Ok(Self { pool })
    }
}

fn forecast_from_row(row: &SqliteRow) -> Result<ForecastRecord> {
    let timeframe: String = row.get("timeframe");
    let horizon_bars: i64 = row.get("horizon_bars");
    Ok(ForecastRecord {
        id: Some(row.get("id")),
        symbol: row.get("symbol"),
        timeframe: timeframe.parse()?,
        horizon_bars: u32::try_from(horizon_bars).context("Corrupt horizon")?,
        created_at_ms: row.get("created_at_ms"),
        target_ms: row.get("target_ms"),
        entry_price: row.get("entry_price"),
        predicted_return: row.get("predicted_return"),
        raw_p_up: row.get("raw_p_up"),
        calibrated_p_up: row.get("calibrated_p_up"),
        setup_type: row.get("setup_type"),
        grade: row.get("grade"),
        realized_return: row.get("realized_return"),
        resolved_at_ms: row.get("resolved_at_ms"),
    })
}

#[async_trait]
impl ForecastLog for SqliteForecastLog {
    async fn record_forecast(&self, record: &ForecastRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO forecasts (symbol, timeframe, horizon_bars, created_at_ms, target_ms,
                entry_price, predicted_return, raw_p_up, calibrated_p_up, setup_type, grade,
                realized_return, resolved_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.symbol)
        .bind(record.timeframe.as_str())
        .bind(i64::from(record.horizon_bars))
        .bind(record.created_at_ms)
        .bind(record.target_ms)
        .bind(record.entry_price)
        .bind(record.predicted_return)
        .bind(record.raw_p_up)
        .bind(record.calibrated_p_up)
        .bind(&record.setup_type)
        .bind(&record.grade)
        .bind(record.realized_return)
        .bind(record.resolved_at_ms)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record forecast for {}", record.symbol))?;
        Ok(result.last_insert_rowid())
    }

    async fn record_outcome(&self, id: i64, realized_return: f64, resolved_at_ms: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE forecasts SET realized_return = ?, resolved_at_ms = ? WHERE id = ?",
        )
        .bind(realized_return)
        .bind(resolved_at_ms)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record outcome for forecast {id}"))?;
        if result.rows_affected() == 0 {
            anyhow::bail!("Unknown forecast id {id}");
        }
        Ok(())
    }

    async fn resolved(&self, query: &ForecastQuery) -> Result<Vec<ForecastRecord>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM forecasts WHERE realized_return IS NOT NULL");
        if let Some(symbol) = &query.symbol {
            qb.push(" AND symbol = ").push_bind(symbol.clone());
        }
        if let Some(timeframe) = query.timeframe {
            qb.push(" AND timeframe = ").push_bind(timeframe.as_str());
        }
        if let Some(horizon) = query.horizon_bars {
            qb.push(" AND horizon_bars = ").push_bind(i64::from(horizon));
        }
        if let Some(setup) = &query.setup_type {
            qb.push(" AND setup_type = ").push_bind(setup.clone());
        }
        if let Some(grade) = &query.grade {
            qb.push(" AND grade = ").push_bind(grade.clone());
        }
        qb.push(" ORDER BY created_at_ms DESC, id DESC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query resolved forecasts")?;
        rows.iter().map(forecast_from_row).collect()
    }

    async fn pending(&self, before_ms: i64) -> Result<Vec<ForecastRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM forecasts WHERE realized_return IS NULL AND target_ms <= ?
             ORDER BY target_ms ASC",
        )
        .bind(before_ms)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query pending forecasts")?;
        rows.iter().map(forecast_from_row).collect()
    }
}
