//! Setup scanner: multi-timeframe diagnostics scoring, market regime
//! classification and outcome-calibrated thresholds.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod backtest;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod engine;
pub mod scoring;
pub mod storage;
pub mod types;
