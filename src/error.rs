//! Engine error types
//!
//! Only input problems are fatal. Market outcomes (no zones, no breakout,
//! a flat range day) are normal results, and degraded inputs are reported
//! through [`Degradation`] on the report instead of failing the call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal errors, raised before any computation starts
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Bars out of order at index {index}: {current} is not after {previous}")]
    UnorderedBars {
        index: usize,
        previous: String,
        current: String,
    },

    #[error("Invalid bar at index {index}: {reason}")]
    InvalidBar { index: usize, reason: String },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Non-fatal conditions that degrade the analysis but still yield a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// Fewer bars than the swing/ATR windows need; the report is partial
    InsufficientData { required: usize, available: usize },
    /// Time gaps larger than the timeframe allows between consecutive bars
    DataGapDetected { count: usize },
    /// Bars in the recent window carry no usable volume
    VolumeUnavailable { bars: usize },
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Degradation::InsufficientData { required, available } => {
                write!(f, "InsufficientData({}/{} bars)", available, required)
            }
            Degradation::DataGapDetected { count } => write!(f, "DataGapDetected({} gaps)", count),
            Degradation::VolumeUnavailable { bars } => {
                write!(f, "VolumeUnavailable({} bars)", bars)
            }
        }
    }
}
