//! Evidence: traceable observations behind a behavior classification
//!
//! Each kind carries a fixed metrics schema, so evidence of one behavior
//! can never pick up another's fields.

use serde::{Deserialize, Serialize};

use super::behavior::Behavior;
use super::zones::ZoneId;

/// Severity ranking shared by evidence and timeline events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Grade a magnitude where larger is more severe
    pub fn grade(value: f64, medium: f64, high: f64) -> Self {
        if value >= high {
            Severity::High
        } else if value >= medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "metrics", rename_all = "snake_case")]
pub enum EvidenceKind {
    SupportSweep {
        zone_id: ZoneId,
        level: f64,
        low: f64,
        depth_atr: f64,
    },
    Reclaim {
        zone_id: ZoneId,
        level: f64,
        close: f64,
        bars_to_reclaim: usize,
    },
    ResistanceSweep {
        zone_id: ZoneId,
        level: f64,
        high: f64,
        excess_atr: f64,
    },
    Rejection {
        zone_id: ZoneId,
        level: f64,
        close: f64,
        bars_to_reject: usize,
    },
    LowerWickRejection {
        wick_ratio: f64,
    },
    UpperWickRejection {
        wick_ratio: f64,
    },
    VolumeSpike {
        rvol: f64,
    },
    VolumeDryUp {
        rvol: f64,
    },
    SupportHold {
        zone_id: ZoneId,
        low: f64,
        high: f64,
        rejections: u32,
    },
    ResistanceHold {
        zone_id: ZoneId,
        low: f64,
        high: f64,
        rejections: u32,
    },
    BreakoutConfirmed {
        zone_id: ZoneId,
        level: f64,
        rvol: f64,
        result: f64,
    },
    BreakdownConfirmed {
        zone_id: ZoneId,
        level: f64,
        rvol: f64,
        result: f64,
    },
    HigherHigh {
        price: f64,
        previous: f64,
        change_atr: f64,
    },
    HigherLow {
        price: f64,
        previous: f64,
        change_atr: f64,
    },
    LowerHigh {
        price: f64,
        previous: f64,
        change_atr: f64,
    },
    LowerLow {
        price: f64,
        previous: f64,
        change_atr: f64,
    },
}

impl EvidenceKind {
    pub fn severity(&self) -> Severity {
        match self {
            EvidenceKind::SupportSweep { depth_atr, .. } => Severity::grade(*depth_atr, 0.2, 0.5),
            EvidenceKind::ResistanceSweep { excess_atr, .. } => {
                Severity::grade(*excess_atr, 0.2, 0.5)
            }
            EvidenceKind::Reclaim { bars_to_reclaim: n, .. }
            | EvidenceKind::Rejection { bars_to_reject: n, .. } => match n {
                0 | 1 => Severity::High,
                2 => Severity::Medium,
                _ => Severity::Low,
            },
            EvidenceKind::LowerWickRejection { wick_ratio }
            | EvidenceKind::UpperWickRejection { wick_ratio } => {
                Severity::grade(*wick_ratio, 0.5, 0.66)
            }
            EvidenceKind::VolumeSpike { rvol } => Severity::grade(*rvol, 2.0, 3.0),
            // smaller RVOL is a deeper dry-up
            EvidenceKind::VolumeDryUp { rvol } => Severity::grade(-rvol, -0.5, -0.3),
            EvidenceKind::SupportHold { rejections, .. }
            | EvidenceKind::ResistanceHold { rejections, .. } => {
                Severity::grade(*rejections as f64, 1.0, 3.0)
            }
            EvidenceKind::BreakoutConfirmed { .. } | EvidenceKind::BreakdownConfirmed { .. } => {
                Severity::High
            }
            EvidenceKind::HigherHigh { change_atr, .. }
            | EvidenceKind::HigherLow { change_atr, .. }
            | EvidenceKind::LowerHigh { change_atr, .. }
            | EvidenceKind::LowerLow { change_atr, .. } => {
                Severity::grade(change_atr.abs(), 1.0, f64::INFINITY)
            }
        }
    }

    /// One-line description with the triggering numbers
    pub fn note(&self) -> String {
        match self {
            EvidenceKind::SupportSweep { level, low, depth_atr, .. } => format!(
                "Low {:.2} swept {:.2} ATR below support {:.2}",
                low, depth_atr, level
            ),
            EvidenceKind::Reclaim { level, close, bars_to_reclaim, .. } => format!(
                "Closed {:.2} back above support {:.2} after {} bar(s)",
                close, level, bars_to_reclaim
            ),
            EvidenceKind::ResistanceSweep { level, high, excess_atr, .. } => format!(
                "High {:.2} ran {:.2} ATR above resistance {:.2}",
                high, excess_atr, level
            ),
            EvidenceKind::Rejection { level, close, bars_to_reject, .. } => format!(
                "Closed {:.2} back below resistance {:.2} after {} bar(s)",
                close, level, bars_to_reject
            ),
            EvidenceKind::LowerWickRejection { wick_ratio } => {
                format!("Lower wick {:.0}% of range", wick_ratio * 100.0)
            }
            EvidenceKind::UpperWickRejection { wick_ratio } => {
                format!("Upper wick {:.0}% of range", wick_ratio * 100.0)
            }
            EvidenceKind::VolumeSpike { rvol } => format!("Volume spike RVOL {:.2}", rvol),
            EvidenceKind::VolumeDryUp { rvol } => format!("Volume dry-up RVOL {:.2}", rvol),
            EvidenceKind::SupportHold { low, high, rejections, .. } => format!(
                "Support {:.2}-{:.2} held with {} rejection(s)",
                low, high, rejections
            ),
            EvidenceKind::ResistanceHold { low, high, rejections, .. } => format!(
                "Resistance {:.2}-{:.2} held with {} rejection(s)",
                low, high, rejections
            ),
            EvidenceKind::BreakoutConfirmed { level, rvol, result, .. } => format!(
                "Breakout above {:.2} confirmed (RVOL {:.2}, result {:.2} ATR)",
                level, rvol, result
            ),
            EvidenceKind::BreakdownConfirmed { level, rvol, result, .. } => format!(
                "Breakdown below {:.2} confirmed (RVOL {:.2}, result {:.2} ATR)",
                level, rvol, result
            ),
            EvidenceKind::HigherHigh { price, previous, .. } => {
                format!("Higher high {:.2} over {:.2}", price, previous)
            }
            EvidenceKind::HigherLow { price, previous, .. } => {
                format!("Higher low {:.2} over {:.2}", price, previous)
            }
            EvidenceKind::LowerHigh { price, previous, .. } => {
                format!("Lower high {:.2} under {:.2}", price, previous)
            }
            EvidenceKind::LowerLow { price, previous, .. } => {
                format!("Lower low {:.2} under {:.2}", price, previous)
            }
        }
    }
}

/// A single observation, tied to the bar that triggered it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub behavior: Behavior,
    pub severity: Severity,
    pub bar_index: usize,
    #[serde(flatten)]
    pub kind: EvidenceKind,
    pub note: String,
}

impl Evidence {
    pub fn new(behavior: Behavior, bar_index: usize, kind: EvidenceKind) -> Self {
        Self {
            behavior,
            severity: kind.severity(),
            bar_index,
            note: kind.note(),
            kind,
        }
    }
}

/// Rank by severity, then recency, and keep at most `limit` items
pub fn select_evidence(mut candidates: Vec<Evidence>, limit: usize) -> Vec<Evidence> {
    candidates.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.bar_index.cmp(&a.bar_index))
    });
    candidates.truncate(limit);
    candidates
}
