//! Behavior inference: five Wyckoff classes scored from structure,
//! turned into probabilities, and backed by evidence for the dominant one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::breakout::{BreakDirection, BreakoutBook, Signal, SignalType};
use super::evidence::{select_evidence, Evidence, EvidenceKind};
use super::features::{FeatureSet, Rvol};
use super::patterns::{find_sweeps, SweepPattern};
use super::regime::{MarketState, Regime};
use super::swings::SwingPoint;
use super::zones::{cmp_f64, Zone, ZoneSet, ZoneSide};
use crate::bars::Bar;
use crate::config::{BehaviorWeights, EngineConfig};

/// Evidence items kept per report
pub const MAX_EVIDENCE: usize = 3;

/// Behavior class. Declaration order is the canonical tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Accumulation,
    Shakeout,
    Markup,
    Distribution,
    Markdown,
}

impl Behavior {
    pub const ALL: [Behavior; 5] = [
        Behavior::Accumulation,
        Behavior::Shakeout,
        Behavior::Markup,
        Behavior::Distribution,
        Behavior::Markdown,
    ];
}

impl std::fmt::Display for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Behavior::Accumulation => write!(f, "accumulation"),
            Behavior::Shakeout => write!(f, "shakeout"),
            Behavior::Markup => write!(f, "markup"),
            Behavior::Distribution => write!(f, "distribution"),
            Behavior::Markdown => write!(f, "markdown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorResult {
    pub probabilities: BTreeMap<Behavior, f64>,
    pub dominant: Behavior,
    pub evidence: Vec<Evidence>,
    /// Raw weighted scores before normalization
    pub scores: BTreeMap<Behavior, f64>,
}

impl BehaviorResult {
    /// Uniform distribution with no evidence
    pub fn uniform() -> Self {
        let p = 1.0 / Behavior::ALL.len() as f64;
        Self {
            probabilities: Behavior::ALL.iter().map(|b| (*b, p)).collect(),
            dominant: Behavior::ALL[0],
            evidence: Vec::new(),
            scores: Behavior::ALL.iter().map(|b| (*b, 0.0)).collect(),
        }
    }

    pub fn probability(&self, behavior: Behavior) -> f64 {
        self.probabilities.get(&behavior).copied().unwrap_or(0.0)
    }
}

/// Everything the scorer reads for one cycle
pub struct BehaviorInput<'a> {
    pub bars: &'a [Bar],
    pub features: &'a FeatureSet,
    pub swings: &'a [SwingPoint],
    pub zones: &'a ZoneSet,
    pub market_state: MarketState,
    pub book: &'a BreakoutBook,
    pub signals: &'a [Signal],
    pub atr: f64,
}

/// Score terms, each in [0, 1] or a 0/1 flag
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Observations {
    pub sweep_below_support: f64,
    pub reclaim: f64,
    pub lower_wick: f64,
    pub rvol_factor: f64,
    pub range_regime: f64,
    pub near_support: f64,
    pub volume_dry_up: f64,
    pub higher_low: f64,
    pub near_resistance: f64,
    pub upthrust: f64,
    pub upper_wick: f64,
    pub uptrend_confidence: f64,
    pub downtrend_confidence: f64,
    pub breakout_confirmed: f64,
    pub breakdown_confirmed: f64,
}

/// Fixed linear combinations; markup/markdown intentionally use two terms
pub(crate) fn score_behaviors(obs: &Observations, w: &BehaviorWeights) -> BTreeMap<Behavior, f64> {
    let mut scores = BTreeMap::new();
    scores.insert(
        Behavior::Shakeout,
        w.sweep_below_support * obs.sweep_below_support
            + w.reclaim * obs.reclaim
            + w.lower_wick * obs.lower_wick
            + w.rvol * obs.rvol_factor,
    );
    scores.insert(
        Behavior::Accumulation,
        w.range_regime * obs.range_regime
            + w.near_support * obs.near_support
            + w.volume_dry_up * obs.volume_dry_up
            + w.higher_low * obs.higher_low,
    );
    scores.insert(
        Behavior::Distribution,
        w.range_regime * obs.range_regime
            + w.near_resistance * obs.near_resistance
            + w.upthrust * obs.upthrust
            + w.upper_wick * obs.upper_wick,
    );
    scores.insert(
        Behavior::Markup,
        w.trend_confidence * obs.uptrend_confidence + w.breakout_confirmed * obs.breakout_confirmed,
    );
    scores.insert(
        Behavior::Markdown,
        w.trend_confidence * obs.downtrend_confidence
            + w.breakout_confirmed * obs.breakdown_confirmed,
    );
    scores
}

/// Min-max normalize the scores, then softmax at `temperature`.
/// Equal scores give a uniform distribution.
pub fn softmax_probabilities(
    scores: &BTreeMap<Behavior, f64>,
    temperature: f64,
) -> BTreeMap<Behavior, f64> {
    let min = scores.values().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.values().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;

    let normalized: BTreeMap<Behavior, f64> = scores
        .iter()
        .map(|(b, s)| {
            let v = if span > f64::EPSILON { (s - min) / span } else { 0.0 };
            (*b, v)
        })
        .collect();

    // shift by the max (1.0 after normalization) for numerical stability
    let exps: BTreeMap<Behavior, f64> = normalized
        .iter()
        .map(|(b, v)| (*b, ((v - 1.0) / temperature).exp()))
        .collect();
    let total: f64 = exps.values().sum();

    exps.into_iter().map(|(b, e)| (b, e / total)).collect()
}

/// Argmax with ties resolved by canonical class order
pub fn dominant_behavior(probabilities: &BTreeMap<Behavior, f64>) -> Behavior {
    let mut best = Behavior::ALL[0];
    let mut best_p = f64::NEG_INFINITY;
    for behavior in Behavior::ALL {
        let p = probabilities.get(&behavior).copied().unwrap_or(0.0);
        if p > best_p + 1e-12 {
            best = behavior;
            best_p = p;
        }
    }
    best
}

/// What the window shows around the nearest zones
struct Context<'a> {
    support: Option<&'a Zone>,
    resistance: Option<&'a Zone>,
    spring: Option<SweepPattern>,
    upthrust: Option<SweepPattern>,
    start: usize,
}

/// Nearest zone on the expected side of price, else the closest one
fn pick_zone<'a>(
    preferred: Option<&'a Zone>,
    side: &'a [Zone],
    price: f64,
) -> Option<&'a Zone> {
    preferred.or_else(|| {
        side.iter()
            .min_by(|a, b| cmp_f64(a.distance_to(price), b.distance_to(price)))
    })
}

fn last_sweep(patterns: Vec<SweepPattern>) -> Option<SweepPattern> {
    patterns.into_iter().max_by_key(|p| p.reclaim_index)
}

/// Distance-based proximity: 1 inside the band, 0 at two ATR or more
fn proximity(zone: Option<&Zone>, price: f64, atr: f64) -> f64 {
    match zone {
        Some(z) if atr > 0.0 => (1.0 - z.distance_to(price) / (2.0 * atr)).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

fn rvol_factor(rvol: Rvol, confirm: f64) -> f64 {
    match rvol.value() {
        Some(r) if confirm > 0.0 => (r / confirm).min(1.5) / 1.5,
        _ => 0.0,
    }
}

/// Last two swing prices of one kind, oldest first
fn last_two(swings: &[SwingPoint], is_high: bool) -> Option<(&SwingPoint, &SwingPoint)> {
    let mut iter = swings.iter().rev().filter(|s| s.is_high == is_high);
    let last = iter.next()?;
    let prev = iter.next()?;
    Some((prev, last))
}

fn observe(input: &BehaviorInput, ctx: &Context, config: &EngineConfig) -> Observations {
    let bars = input.bars;
    let features = input.features;
    let last = bars.len() - 1;
    let close = bars[last].c;
    let tail = bars.len().saturating_sub(3);

    let swept_below = ctx
        .support
        .map(|s| bars[ctx.start..].iter().any(|b| b.l < s.low))
        .unwrap_or(false);

    let lower_wick = match &ctx.spring {
        Some(p) => p.wick_ratio,
        None => features.bars[tail..].iter().map(|f| f.lower_wick_ratio).fold(0.0, f64::max),
    };
    let upper_wick = match &ctx.upthrust {
        Some(p) => p.wick_ratio,
        None => features.bars[tail..].iter().map(|f| f.upper_wick_ratio).fold(0.0, f64::max),
    };
    let spike_rvol = match &ctx.spring {
        Some(p) => p.rvol,
        None => features.bars[last].rvol,
    };

    // dry-up: mean known RVOL of the last 5 bars against the dry threshold
    let recent: Vec<f64> = features.bars[bars.len().saturating_sub(5)..]
        .iter()
        .filter_map(|f| f.rvol.value())
        .collect();
    let volume_dry_up = if recent.is_empty() || config.volume_dry_rvol >= 1.0 {
        0.0
    } else {
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        ((1.0 - mean) / (1.0 - config.volume_dry_rvol)).clamp(0.0, 1.0)
    };

    let higher_low = last_two(input.swings, false)
        .map(|(prev, last)| if last.price > prev.price { 1.0 } else { 0.0 })
        .unwrap_or(0.0);

    let state = input.market_state;
    let trend = |regime: Regime| {
        if state.regime == regime {
            state.confidence
        } else {
            0.0
        }
    };

    // FSM state only; a replayed cycle carries no new signals
    let confirmed = |direction: BreakDirection| {
        if input.book.has_confirmed(direction) {
            1.0
        } else {
            0.0
        }
    };

    Observations {
        sweep_below_support: if swept_below { 1.0 } else { 0.0 },
        reclaim: if ctx.spring.is_some() { 1.0 } else { 0.0 },
        lower_wick,
        rvol_factor: rvol_factor(spike_rvol, config.rvol_confirm),
        range_regime: if state.regime == Regime::Range { 1.0 } else { 0.0 },
        near_support: proximity(ctx.support, close, input.atr),
        volume_dry_up,
        higher_low,
        near_resistance: proximity(ctx.resistance, close, input.atr),
        upthrust: if ctx.upthrust.is_some() { 1.0 } else { 0.0 },
        upper_wick,
        uptrend_confidence: trend(Regime::Uptrend),
        downtrend_confidence: trend(Regime::Downtrend),
        breakout_confirmed: confirmed(BreakDirection::Up),
        breakdown_confirmed: confirmed(BreakDirection::Down),
    }
}

/// Score, normalize and explain market behavior for one cycle
pub fn infer_behavior(input: &BehaviorInput, config: &EngineConfig) -> BehaviorResult {
    let Some(last_bar) = input.bars.last() else {
        return BehaviorResult::uniform();
    };
    let close = last_bar.c;
    let start = input.bars.len().saturating_sub(config.behavior_lookback);

    let support = pick_zone(input.zones.nearest_support(close), &input.zones.support, close);
    let resistance = pick_zone(
        input.zones.nearest_resistance(close),
        &input.zones.resistance,
        close,
    );

    let ctx = Context {
        support,
        resistance,
        spring: support.and_then(|z| {
            last_sweep(find_sweeps(input.bars, input.features, z, start, config.reclaim_bars))
        }),
        upthrust: resistance.and_then(|z| {
            last_sweep(find_sweeps(input.bars, input.features, z, start, config.reclaim_bars))
        }),
        start,
    };

    let obs = observe(input, &ctx, config);
    let scores = score_behaviors(&obs, &config.behavior_weights);
    let probabilities = softmax_probabilities(&scores, config.softmax_temperature);
    let dominant = dominant_behavior(&probabilities);
    let evidence = select_evidence(collect_evidence(dominant, input, &ctx, config), MAX_EVIDENCE);

    debug!(
        "Behavior {} p={:.3} with {} evidence item(s)",
        dominant,
        probabilities.get(&dominant).copied().unwrap_or(0.0),
        evidence.len()
    );

    BehaviorResult {
        probabilities,
        dominant,
        evidence,
        scores,
    }
}

fn swing_evidence(
    behavior: Behavior,
    swings: &[SwingPoint],
    is_high: bool,
    rising: bool,
    atr: f64,
    start: usize,
) -> Option<Evidence> {
    let (prev, last) = last_two(swings, is_high)?;
    if last.index < start {
        return None;
    }
    if (rising && last.price <= prev.price) || (!rising && last.price >= prev.price) {
        return None;
    }
    let change_atr = if atr > 0.0 { (last.price - prev.price) / atr } else { 0.0 };
    let (price, previous) = (last.price, prev.price);
    let kind = match (is_high, rising) {
        (true, true) => EvidenceKind::HigherHigh { price, previous, change_atr },
        (false, true) => EvidenceKind::HigherLow { price, previous, change_atr },
        (true, false) => EvidenceKind::LowerHigh { price, previous, change_atr },
        (false, false) => EvidenceKind::LowerLow { price, previous, change_atr },
    };
    Some(Evidence::new(behavior, last.index, kind))
}

/// Most recent bar in `[start, end)` whose wick (lower or upper) is long
fn wick_evidence(
    behavior: Behavior,
    features: &FeatureSet,
    start: usize,
    end: usize,
    lower: bool,
    min_ratio: f64,
) -> Option<Evidence> {
    (start..end.min(features.len())).rev().find_map(|i| {
        let f = &features.bars[i];
        let ratio = if lower { f.lower_wick_ratio } else { f.upper_wick_ratio };
        (ratio >= min_ratio).then(|| {
            let kind = if lower {
                EvidenceKind::LowerWickRejection { wick_ratio: ratio }
            } else {
                EvidenceKind::UpperWickRejection { wick_ratio: ratio }
            };
            Evidence::new(behavior, i, kind)
        })
    })
}

fn spike_evidence(
    behavior: Behavior,
    features: &FeatureSet,
    start: usize,
    end: usize,
    threshold: f64,
) -> Option<Evidence> {
    (start..end.min(features.len()))
        .filter_map(|i| features.bars[i].rvol.value().map(|r| (i, r)))
        .filter(|(_, r)| *r >= threshold)
        .max_by(|a, b| cmp_f64(a.1, b.1).then(a.0.cmp(&b.0)))
        .map(|(i, rvol)| Evidence::new(behavior, i, EvidenceKind::VolumeSpike { rvol }))
}

fn hold_evidence(behavior: Behavior, zone: Option<&Zone>, start: usize) -> Option<Evidence> {
    let zone = zone?;
    let idx = zone.last_test_index?;
    if zone.rejections == 0 || idx < start {
        return None;
    }
    let kind = match zone.side {
        ZoneSide::Support => EvidenceKind::SupportHold {
            zone_id: zone.id,
            low: zone.low,
            high: zone.high,
            rejections: zone.rejections,
        },
        ZoneSide::Resistance => EvidenceKind::ResistanceHold {
            zone_id: zone.id,
            low: zone.low,
            high: zone.high,
            rejections: zone.rejections,
        },
    };
    Some(Evidence::new(behavior, idx, kind))
}

fn confirmed_evidence(
    behavior: Behavior,
    input: &BehaviorInput,
    direction: BreakDirection,
) -> Option<Evidence> {
    let signal = input
        .signals
        .iter()
        .filter(|s| s.signal_type == SignalType::Confirmed && s.direction == direction)
        .max_by_key(|s| s.bar_index)?;
    let f = input.features.get(signal.bar_index)?;
    let (zone_id, level) = (signal.zone_id, signal.level);
    let rvol = f.rvol.or_zero();
    let result = f.result();
    let kind = match direction {
        BreakDirection::Up => EvidenceKind::BreakoutConfirmed { zone_id, level, rvol, result },
        BreakDirection::Down => EvidenceKind::BreakdownConfirmed { zone_id, level, rvol, result },
    };
    Some(Evidence::new(behavior, signal.bar_index, kind))
}

/// Candidate evidence for the dominant class; every item comes from an
/// observed threshold breach at a real bar.
fn collect_evidence(
    dominant: Behavior,
    input: &BehaviorInput,
    ctx: &Context,
    config: &EngineConfig,
) -> Vec<Evidence> {
    let bars = input.bars;
    let features = input.features;
    let atr = input.atr;
    let end = bars.len();
    let mut out: Vec<Option<Evidence>> = Vec::new();

    match dominant {
        Behavior::Shakeout => {
            if let (Some(zone), Some(p)) = (ctx.support, &ctx.spring) {
                let depth_atr = if atr > 0.0 { p.depth() / atr } else { 0.0 };
                out.push(Some(Evidence::new(
                    dominant,
                    p.sweep_index,
                    EvidenceKind::SupportSweep {
                        zone_id: zone.id,
                        level: p.level,
                        low: p.extreme,
                        depth_atr,
                    },
                )));
                out.push(Some(Evidence::new(
                    dominant,
                    p.reclaim_index,
                    EvidenceKind::Reclaim {
                        zone_id: zone.id,
                        level: p.level,
                        close: bars[p.reclaim_index].c,
                        bars_to_reclaim: p.reclaim_index - p.sweep_index,
                    },
                )));
                out.push(spike_evidence(
                    dominant,
                    features,
                    p.sweep_index,
                    p.reclaim_index + 1,
                    config.volume_spike_rvol,
                ));
                out.push(wick_evidence(
                    dominant,
                    features,
                    p.sweep_index,
                    p.reclaim_index + 1,
                    true,
                    config.long_wick_ratio,
                ));
            } else {
                out.push(wick_evidence(dominant, features, ctx.start, end, true, config.long_wick_ratio));
                out.push(spike_evidence(dominant, features, ctx.start, end, config.volume_spike_rvol));
            }
        }
        Behavior::Accumulation => {
            out.push(hold_evidence(dominant, ctx.support, ctx.start));
            let dry = (ctx.start..end).rev().find_map(|i| {
                features.bars[i]
                    .rvol
                    .value()
                    .filter(|r| *r <= config.volume_dry_rvol)
                    .map(|rvol| Evidence::new(dominant, i, EvidenceKind::VolumeDryUp { rvol }))
            });
            out.push(dry);
            out.push(swing_evidence(dominant, input.swings, false, true, atr, ctx.start));
        }
        Behavior::Distribution => {
            if let (Some(zone), Some(p)) = (ctx.resistance, &ctx.upthrust) {
                let excess_atr = if atr > 0.0 { p.depth() / atr } else { 0.0 };
                out.push(Some(Evidence::new(
                    dominant,
                    p.sweep_index,
                    EvidenceKind::ResistanceSweep {
                        zone_id: zone.id,
                        level: p.level,
                        high: p.extreme,
                        excess_atr,
                    },
                )));
                out.push(Some(Evidence::new(
                    dominant,
                    p.reclaim_index,
                    EvidenceKind::Rejection {
                        zone_id: zone.id,
                        level: p.level,
                        close: bars[p.reclaim_index].c,
                        bars_to_reject: p.reclaim_index - p.sweep_index,
                    },
                )));
            }
            out.push(hold_evidence(dominant, ctx.resistance, ctx.start));
            out.push(wick_evidence(dominant, features, ctx.start, end, false, config.long_wick_ratio));
            out.push(swing_evidence(dominant, input.swings, true, false, atr, ctx.start));
        }
        Behavior::Markup => {
            out.push(confirmed_evidence(dominant, input, BreakDirection::Up));
            out.push(swing_evidence(dominant, input.swings, true, true, atr, ctx.start));
            out.push(swing_evidence(dominant, input.swings, false, true, atr, ctx.start));
        }
        Behavior::Markdown => {
            out.push(confirmed_evidence(dominant, input, BreakDirection::Down));
            out.push(swing_evidence(dominant, input.swings, false, false, atr, ctx.start));
            out.push(swing_evidence(dominant, input.swings, true, false, atr, ctx.start));
        }
    }

    out.into_iter().flatten().collect()
}
