//! Analysis report: the single output artifact of one cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::behavior::BehaviorResult;
use super::breakout::{Signal, SignalType};
use super::playbook::PlaybookPlan;
use super::regime::MarketState;
use super::timeline::TimelineEvent;
use super::zones::ZoneSet;
use crate::bars::Timeframe;
use crate::error::Degradation;

/// Degradation flags, mirrored from `issues` for quick checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFlags {
    pub insufficient_data: bool,
    pub data_gaps: bool,
    pub volume_unavailable: bool,
}

impl ReportFlags {
    pub fn from_issues(issues: &[Degradation]) -> Self {
        let mut flags = Self::default();
        for issue in issues {
            match issue {
                Degradation::InsufficientData { .. } => flags.insufficient_data = true,
                Degradation::DataGapDetected { .. } => flags.data_gaps = true,
                Degradation::VolumeUnavailable { .. } => flags.volume_unavailable = true,
            }
        }
        flags
    }

    pub fn is_degraded(&self) -> bool {
        self.insufficient_data || self.data_gaps || self.volume_unavailable
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub ticker: String,
    pub timeframe: Timeframe,
    /// Time of the last bar analyzed; `None` only for an empty window
    pub generated_at: Option<DateTime<Utc>>,
    pub bar_count: usize,
    pub market_state: MarketState,
    pub zones: ZoneSet,
    pub signals: Vec<Signal>,
    pub behavior: BehaviorResult,
    pub timeline: Vec<TimelineEvent>,
    pub playbook: Vec<PlaybookPlan>,
    pub flags: ReportFlags,
    pub issues: Vec<Degradation>,
    pub gap_indices: Vec<usize>,
}

impl AnalysisReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Most recent signal of a given type
    pub fn latest_signal(&self, signal_type: SignalType) -> Option<&Signal> {
        self.signals
            .iter()
            .filter(|s| s.signal_type == signal_type)
            .max_by_key(|s| s.bar_index)
    }

    /// One-line summary for logs and the CLI
    pub fn summary(&self) -> String {
        format!(
            "{} {} | {} bars | {} ({:.2}) | {} p={:.2} | {}S/{}R zones | {} signals | {} events{}",
            self.ticker,
            self.timeframe,
            self.bar_count,
            self.market_state.regime,
            self.market_state.confidence,
            self.behavior.dominant,
            self.behavior.probability(self.behavior.dominant),
            self.zones.support.len(),
            self.zones.resistance.len(),
            self.signals.len(),
            self.timeline.len(),
            if self.flags.is_degraded() { " | degraded" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_from_issues() {
        let flags = ReportFlags::from_issues(&[
            Degradation::DataGapDetected { count: 2 },
            Degradation::VolumeUnavailable { bars: 3 },
        ]);
        assert!(!flags.insufficient_data);
        assert!(flags.data_gaps);
        assert!(flags.volume_unavailable);
        assert!(flags.is_degraded());
        assert!(!ReportFlags::default().is_degraded());
    }
}
