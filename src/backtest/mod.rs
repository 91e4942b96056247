//! Outcome replay and calibration.

pub mod calibration;
pub mod reliability;
pub mod replay;
pub mod scorecard;
pub mod stats;

pub use calibration::{CalibrationBin, CalibrationService, SetupStats};
pub use reliability::{Reliability, ReliabilityIndex};
pub use replay::{OutcomeReplayer, OutcomeSample, RegimeStats};
pub use scorecard::{ForecastScorecard, ScorecardDiagnosis, ScorecardReport};
pub use stats::GroupStats;
