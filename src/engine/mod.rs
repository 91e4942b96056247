//! Core engine: diagnostics, regime, tradability, the universe scan and
//! the forecast service.

pub mod diagnostics;
pub mod forecast;
pub mod regime;
pub mod scanner;
pub mod tradability;

pub use diagnostics::{DiagnosticsAnalyzer, Diagnosis};
pub use forecast::{CalibratedForecast, ForecastService};
pub use regime::RegimeClassifier;
pub use scanner::{ScanComponents, ScanReport, ScanRequest, ScanSummary, ScannerOrchestrator};
pub use tradability::TradabilityAnalyzer;
