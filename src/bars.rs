//! OHLCV bar intake: bar and timeframe types, validation, gap detection

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// A single OHLCV bar. `v` is `None` when the provider has no volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub t: DateTime<Utc>,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    #[serde(default)]
    pub v: Option<f64>,
}

impl Bar {
    pub fn new(t: DateTime<Utc>, o: f64, h: f64, l: f64, c: f64, v: Option<f64>) -> Self {
        Self { t, o, h, l, c, v }
    }

    /// Volume if it is usable (present and positive)
    pub fn known_volume(&self) -> Option<f64> {
        self.v.filter(|v| *v > 0.0 && v.is_finite())
    }

    pub fn range(&self) -> f64 {
        self.h - self.l
    }

    pub fn body_low(&self) -> f64 {
        self.o.min(self.c)
    }

    pub fn body_high(&self) -> f64 {
        self.o.max(self.c)
    }
}

/// Bar interval of the analyzed series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn interval(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M30 => Duration::minutes(30),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }

    pub fn is_intraday(&self) -> bool {
        !matches!(self, Timeframe::D1)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1m" | "1min" => Ok(Timeframe::M1),
            "5m" | "5min" => Ok(Timeframe::M5),
            "15m" | "15min" => Ok(Timeframe::M15),
            "30m" | "30min" => Ok(Timeframe::M30),
            "1h" | "60m" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" | "d" | "daily" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe '{}'", other)),
        }
    }
}

/// Reject input the provider contract forbids: unordered/duplicate
/// timestamps, non-finite prices, inverted highs and lows.
pub fn validate_bars(bars: &[Bar]) -> EngineResult<()> {
    for (i, bar) in bars.iter().enumerate() {
        if ![bar.o, bar.h, bar.l, bar.c].iter().all(|p| p.is_finite()) {
            return Err(EngineError::InvalidBar {
                index: i,
                reason: "non-finite price".to_string(),
            });
        }
        if bar.h < bar.l {
            return Err(EngineError::InvalidBar {
                index: i,
                reason: format!("high {} below low {}", bar.h, bar.l),
            });
        }
        if let Some(v) = bar.v {
            if v < 0.0 || !v.is_finite() {
                return Err(EngineError::InvalidBar {
                    index: i,
                    reason: format!("invalid volume {}", v),
                });
            }
        }
        if i > 0 && bar.t <= bars[i - 1].t {
            return Err(EngineError::UnorderedBars {
                index: i,
                previous: bars[i - 1].t.to_rfc3339(),
                current: bar.t.to_rfc3339(),
            });
        }
    }
    Ok(())
}

/// Indices `i` where the step from bar `i-1` to bar `i` is a data gap.
///
/// Intraday: a step longer than `multiplier` intervals within the same UTC
/// day (session breaks across days are expected). Daily: more than four
/// calendar days, so weekends and single holidays are not gaps.
pub fn detect_gaps(bars: &[Bar], timeframe: Timeframe, multiplier: f64) -> Vec<usize> {
    let interval_secs = timeframe.interval().num_seconds() as f64;
    let mut gaps = Vec::new();

    for i in 1..bars.len() {
        let prev = bars[i - 1].t;
        let curr = bars[i].t;
        let step = (curr - prev).num_seconds() as f64;

        let is_gap = if timeframe.is_intraday() {
            prev.date_naive() == curr.date_naive() && step > interval_secs * multiplier
        } else {
            step > Duration::days(4).num_seconds() as f64
        };

        if is_gap {
            gaps.push(i);
        }
    }

    gaps
}
