//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults, so a missing section or key falls back
//! to the values documented on each struct.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::scoring::GroupWeights;
use crate::types::{Timeframe, UserProfile};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub regime: RegimeConfig,
    pub calibration: CalibrationConfig,
    pub scoring: GroupWeights,
    pub storage: StorageConfig,
    pub dashboard: DashboardConfig,
    pub forecast: ForecastConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub min_score: f64,
    pub max_risk: f64,
    pub limit: usize,
    pub filter_illiquid: bool,
    pub user_profile: UserProfile,
    /// Worker-pool ceiling for per-symbol pipelines.
    pub max_concurrency: usize,
    pub bars_limit: usize,
    pub scan_interval_secs: u64,
    pub target_timeframe: Timeframe,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            symbols: ["BTC", "ETH", "SOL", "BNB", "XRP", "ADA", "DOGE", "AVAX", "LINK", "TON"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeframes: vec![Timeframe::H4, Timeframe::D1],
            min_score: 0.0,
            max_risk: 0.7,
            limit: 10,
            filter_illiquid: true,
            user_profile: UserProfile::Balanced,
            max_concurrency: 5,
            bars_limit: 500,
            scan_interval_secs: 900,
            target_timeframe: Timeframe::D1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegimeConfig {
    pub anchor_symbol: String,
    /// Alt-market proxies, tried in order.
    pub alt_proxies: Vec<String>,
    pub stable_dominance_symbol: Option<String>,
    pub cache_ttl_secs: u64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            anchor_symbol: "BTC".to_string(),
            alt_proxies: vec!["TOTAL2".to_string(), "TOTAL3".to_string()],
            stable_dominance_symbol: Some("USDT.D".to_string()),
            cache_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CalibrationConfig {
    pub min_hit_rate: f64,
    /// Percent.
    pub min_avg_return: f64,
    pub horizon_hours: f64,
    pub min_group_samples: usize,
    pub reliability_min_samples: usize,
    /// Effective thresholds are recomputed once this old.
    pub threshold_cache_ttl_secs: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_hit_rate: 0.55,
            min_avg_return: 2.0,
            horizon_hours: 24.0,
            min_group_samples: 10,
            reliability_min_samples: 10,
            threshold_cache_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
    pub weights_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "data/scanner.db".to_string(),
            weights_path: "data/weights.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ForecastConfig {
    pub model_cache_capacity: usize,
    pub forecast_ttl_secs: u64,
    /// Forecasts issued every scan cycle for the anchor and each candidate.
    pub timeframe: Timeframe,
    pub horizon_bars: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            model_cache_capacity: 10,
            forecast_ttl_secs: 1200,
            timeframe: Timeframe::H1,
            horizon_bars: 24,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
