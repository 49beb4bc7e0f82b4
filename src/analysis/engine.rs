//! Engine facade: one deterministic analysis cycle
//!
//! `analyze` wires the stages leaf to root:
//! features → swings → zones → regime → breakout FSMs → behavior →
//! timeline → playbook. It is a pure function of its arguments. The caller
//! owns the persisted [`EngineState`] and hands it back on the next cycle.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::behavior::{infer_behavior, BehaviorInput, BehaviorResult};
use super::breakout::{advance_breakouts, BreakoutBook};
use super::features::{compute_features, reference_atr};
use super::playbook::generate_playbook;
use super::regime::{classify_regime, MarketState};
use super::report::{AnalysisReport, ReportFlags};
use super::swings::detect_swings;
use super::timeline::{diff_timeline, TimelineSnapshot, TimelineState};
use super::zones::{build_zones, ExtendedHoursLevels, ZoneSet};
use crate::bars::{detect_gaps, validate_bars, Bar, Timeframe};
use crate::config::EngineConfig;
use crate::error::{Degradation, EngineResult};

/// Bars plus context for one (ticker, timeframe) cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub ticker: String,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
    #[serde(default)]
    pub extended_hours: Option<ExtendedHoursLevels>,
}

impl AnalysisInput {
    pub fn new(ticker: impl Into<String>, timeframe: Timeframe, bars: Vec<Bar>) -> Self {
        Self {
            ticker: ticker.into(),
            timeframe,
            bars,
            extended_hours: None,
        }
    }

    pub fn with_extended_hours(mut self, levels: ExtendedHoursLevels) -> Self {
        self.extended_hours = Some(levels);
        self
    }
}

/// Per-key state persisted between cycles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineState {
    pub timeline: TimelineState,
    pub breakouts: BreakoutBook,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub report: AnalysisReport,
    pub state: EngineState,
}

/// Run one analysis cycle.
///
/// Fails only on invalid configuration or malformed bars. Too few bars
/// yield a partial report and leave the prior state untouched.
pub fn analyze(
    input: &AnalysisInput,
    config: &EngineConfig,
    prior: &EngineState,
) -> EngineResult<AnalysisOutcome> {
    config.validate()?;
    validate_bars(&input.bars)?;

    let bars = &input.bars;
    let mut issues = Vec::new();

    let gap_indices = detect_gaps(bars, input.timeframe, config.gap_multiplier);
    if !gap_indices.is_empty() {
        warn!("{} {}: {} data gap(s) detected", input.ticker, input.timeframe, gap_indices.len());
        issues.push(Degradation::DataGapDetected {
            count: gap_indices.len(),
        });
    }

    let recent = bars.len().saturating_sub(config.rvol_window);
    let missing_volume = bars[recent..].iter().filter(|b| b.known_volume().is_none()).count();
    if missing_volume > 0 {
        issues.push(Degradation::VolumeUnavailable {
            bars: missing_volume,
        });
    }

    let required = config.min_bars();
    if bars.len() < required {
        warn!(
            "{} {}: insufficient data ({} of {} bars), returning partial report",
            input.ticker,
            input.timeframe,
            bars.len(),
            required
        );
        issues.insert(
            0,
            Degradation::InsufficientData {
                required,
                available: bars.len(),
            },
        );
        return Ok(AnalysisOutcome {
            report: AnalysisReport {
                ticker: input.ticker.clone(),
                timeframe: input.timeframe,
                generated_at: bars.last().map(|b| b.t),
                bar_count: bars.len(),
                market_state: MarketState::undecided(),
                zones: ZoneSet::default(),
                signals: Vec::new(),
                behavior: BehaviorResult::uniform(),
                timeline: Vec::new(),
                playbook: Vec::new(),
                flags: ReportFlags::from_issues(&issues),
                issues,
                gap_indices,
            },
            state: prior.clone(),
        });
    }

    let features = compute_features(bars, config.atr_period, config.rvol_window);
    let swings = detect_swings(bars, config.swing_order);
    let atr = reference_atr(bars, &features);
    debug!("{} bars, {} swings, ATR {:.4}", bars.len(), swings.len(), atr);

    let zones = build_zones(
        bars,
        &features,
        &swings,
        input.extended_hours.as_ref(),
        atr,
        config,
    );
    let market_state = classify_regime(&swings, config.regime_lookback, config.regime_threshold);
    let run = advance_breakouts(&prior.breakouts, &zones, bars, &features, atr, config);

    let behavior = infer_behavior(
        &BehaviorInput {
            bars,
            features: &features,
            swings: &swings,
            zones: &zones,
            market_state,
            book: &run.book,
            signals: &run.signals,
            atr,
        },
        config,
    );

    let phases = run.book.phases();
    let diff = diff_timeline(
        &prior.timeline,
        &TimelineSnapshot {
            bars,
            features: &features,
            swings: &swings,
            zones: &zones,
            market_state,
            behavior: &behavior,
            phases: &phases,
            inherited: &run.inherited,
            atr,
        },
        config,
    );

    let last_close = bars[bars.len() - 1].c;
    let playbook = generate_playbook(&zones, &market_state, last_close, atr);

    let report = AnalysisReport {
        ticker: input.ticker.clone(),
        timeframe: input.timeframe,
        generated_at: bars.last().map(|b| b.t),
        bar_count: bars.len(),
        market_state,
        zones,
        signals: run.signals,
        behavior,
        timeline: diff.events,
        playbook,
        flags: ReportFlags::from_issues(&issues),
        issues,
        gap_indices,
    };
    info!("{}", report.summary());

    Ok(AnalysisOutcome {
        report,
        state: EngineState {
            timeline: diff.state,
            breakouts: run.book,
        },
    })
}
