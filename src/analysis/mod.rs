//! Analysis - the market-structure pipeline
//!
//! Stages, leaf to root:
//! - Feature extraction (ATR, RVOL, candle ratios)
//! - Swing detection
//! - Zone clustering and scoring
//! - Regime classification
//! - Breakout / fakeout state machines
//! - Behavior inference with evidence
//! - Timeline diffing against the prior cycle
//! - Playbook generation

pub mod features;
pub mod swings;
pub mod zones;
pub mod regime;
pub mod breakout;
pub mod patterns;
pub mod evidence;
pub mod behavior;
pub mod timeline;
pub mod playbook;
pub mod report;
pub mod engine;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use features::{compute_features, BarFeatures, FeatureSet, Rvol};
pub use swings::{detect_swings, SwingPoint};
pub use zones::{build_zones, EhLevel, ExtendedHoursLevels, Zone, ZoneId, ZoneOrigin, ZoneSet, ZoneSide};
pub use regime::{classify_regime, MarketState, Regime};
pub use breakout::{
    advance_breakouts, BreakDirection, BreakoutBook, BreakoutFsm, BreakoutPhase, Signal,
    SignalType, VolumeQuality,
};
pub use patterns::{find_sweeps, PatternKind, SweepPattern};
pub use evidence::{Evidence, EvidenceKind, Severity};
pub use behavior::{infer_behavior, Behavior, BehaviorResult};
pub use timeline::{diff_timeline, TimelineEvent, TimelineEventType, TimelineState};
pub use playbook::{generate_playbook, Bias, PlanKind, PlaybookPlan};
pub use report::{AnalysisReport, ReportFlags};
pub use engine::{analyze, AnalysisInput, AnalysisOutcome, EngineState};
