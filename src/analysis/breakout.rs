//! Breakout / Fakeout State Machine
//!
//! One small FSM per zone boundary:
//! 1. IDLE - price respects the zone
//! 2. ATTEMPT - a close (or a wick) went beyond the boundary
//! 3. CONFIRMED - consecutive closes outside, volume and range agree
//! 4. FAKEOUT - the attempt failed; lasts one bar, then back to IDLE
//!
//! Resistance zones watch their upper boundary for an upward breakout,
//! support zones their lower boundary for a downward breakdown. IDLE never
//! jumps straight to CONFIRMED. Instances live in an explicit
//! [`BreakoutBook`] keyed by zone id that the caller persists between
//! cycles; nothing is shared between zones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::features::{BarFeatures, FeatureSet};
use super::zones::{Zone, ZoneId, ZoneSet, ZoneSide};
use crate::bars::Bar;
use crate::config::EngineConfig;

/// State of one breakout FSM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakoutPhase {
    Idle,
    Attempt,
    Confirmed,
    Fakeout,
}

impl std::fmt::Display for BreakoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakoutPhase::Idle => write!(f, "IDLE"),
            BreakoutPhase::Attempt => write!(f, "ATTEMPT"),
            BreakoutPhase::Confirmed => write!(f, "CONFIRMED"),
            BreakoutPhase::Fakeout => write!(f, "FAKEOUT"),
        }
    }
}

/// Which edge of the zone the FSM watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    Upper,
    Lower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakDirection {
    Up,
    Down,
}

/// Whether volume backs the signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeQuality {
    Confirmed,
    Pending,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Attempt,
    Confirmed,
    Fakeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FakeoutReason {
    /// Closed back inside the zone
    ClosedInside,
    /// High effort, low result
    Absorption,
    /// Long wick on high volume without follow-through
    WickRejection,
}

/// Breakout/fakeout event emitted by a transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub direction: BreakDirection,
    pub zone_id: ZoneId,
    pub level: f64,
    pub confidence: f64,
    pub bar_index: usize,
    pub time: DateTime<Utc>,
    pub volume_quality: VolumeQuality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FakeoutReason>,
}

/// A state change observed while stepping bars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub zone_id: ZoneId,
    pub bar_index: usize,
    pub from: BreakoutPhase,
    pub to: BreakoutPhase,
}

/// Per-zone FSM; persisted by the caller between cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutFsm {
    pub zone_id: ZoneId,
    pub side: ZoneSide,
    pub boundary: Boundary,
    pub level: f64,
    pub state: BreakoutPhase,
    pub consecutive_confirm_closures: u32,
    pub bars_since_attempt: u32,
    pub volume_quality: VolumeQuality,
    pub attempt_time: Option<DateTime<Utc>>,
    /// Last bar this FSM has consumed; later cycles only step newer bars
    pub last_bar_time: Option<DateTime<Utc>>,
}

impl BreakoutFsm {
    pub fn new(zone: &Zone) -> Self {
        Self {
            zone_id: zone.id,
            side: zone.side,
            boundary: match zone.side {
                ZoneSide::Support => Boundary::Lower,
                ZoneSide::Resistance => Boundary::Upper,
            },
            level: zone.breakout_level(),
            state: BreakoutPhase::Idle,
            consecutive_confirm_closures: 0,
            bars_since_attempt: 0,
            volume_quality: VolumeQuality::Pending,
            attempt_time: None,
            last_bar_time: None,
        }
    }

    /// Carry a prior instance over to this cycle's (possibly re-banded) zone
    fn rebind(mut self, zone: &Zone) -> Self {
        self.zone_id = zone.id;
        self.level = zone.breakout_level();
        self
    }

    pub fn direction(&self) -> BreakDirection {
        match self.boundary {
            Boundary::Upper => BreakDirection::Up,
            Boundary::Lower => BreakDirection::Down,
        }
    }

    fn is_outside(&self, price: f64) -> bool {
        match self.boundary {
            Boundary::Upper => price > self.level,
            Boundary::Lower => price < self.level,
        }
    }

    fn wick_beyond(&self, bar: &Bar) -> bool {
        match self.boundary {
            Boundary::Upper => bar.h > self.level,
            Boundary::Lower => bar.l < self.level,
        }
    }

    fn breakout_wick_ratio(&self, f: &BarFeatures) -> f64 {
        match self.boundary {
            Boundary::Upper => f.upper_wick_ratio,
            Boundary::Lower => f.lower_wick_ratio,
        }
    }

    fn reset(&mut self) {
        self.state = BreakoutPhase::Idle;
        self.consecutive_confirm_closures = 0;
        self.bars_since_attempt = 0;
        self.volume_quality = VolumeQuality::Pending;
        self.attempt_time = None;
    }

    /// Process one bar and return the signal of any transition it caused
    pub fn step(
        &mut self,
        idx: usize,
        bars: &[Bar],
        features: &FeatureSet,
        zone: &Zone,
        config: &EngineConfig,
    ) -> Option<Signal> {
        let bar = &bars[idx];
        let f = features.bars[idx];
        self.last_bar_time = Some(bar.t);

        if self.state == BreakoutPhase::Fakeout {
            self.reset();
        }

        match self.state {
            BreakoutPhase::Idle => self.process_idle(idx, bar, &f, zone, config),
            BreakoutPhase::Attempt => self.process_attempt(idx, bars, features, zone, config),
            BreakoutPhase::Confirmed => {
                if self.is_outside(bar.c) {
                    self.consecutive_confirm_closures += 1;
                } else {
                    self.reset();
                }
                None
            }
            BreakoutPhase::Fakeout => None,
        }
    }

    fn process_idle(
        &mut self,
        idx: usize,
        bar: &Bar,
        f: &BarFeatures,
        zone: &Zone,
        config: &EngineConfig,
    ) -> Option<Signal> {
        let closed_outside = self.is_outside(bar.c);
        if !closed_outside && !self.wick_beyond(bar) {
            return None;
        }

        self.state = BreakoutPhase::Attempt;
        self.consecutive_confirm_closures = u32::from(closed_outside);
        self.bars_since_attempt = 0;
        self.attempt_time = Some(bar.t);
        self.volume_quality = if f.rvol.is_unknown() {
            VolumeQuality::Unavailable
        } else {
            VolumeQuality::Pending
        };

        Some(self.signal(SignalType::Attempt, idx, bar, f, zone, None, config))
    }

    fn process_attempt(
        &mut self,
        idx: usize,
        bars: &[Bar],
        features: &FeatureSet,
        zone: &Zone,
        config: &EngineConfig,
    ) -> Option<Signal> {
        let bar = &bars[idx];
        let f = features.bars[idx];
        self.bars_since_attempt += 1;

        if self.is_outside(bar.c) {
            self.consecutive_confirm_closures += 1;
        } else {
            self.consecutive_confirm_closures = 0;
        }

        // Every bar of the confirmation window must carry volume
        let window = config.confirm_closes as usize;
        let window_start = (idx + 1).saturating_sub(window);
        let volume_missing = features.unknown_volume_count(window_start, idx + 1) > 0;
        self.volume_quality = if volume_missing {
            VolumeQuality::Unavailable
        } else {
            VolumeQuality::Pending
        };

        let closes_ok = self.consecutive_confirm_closures >= config.confirm_closes;
        let result_ok = f.result() >= config.result_confirm;
        let rvol_ok = !volume_missing && f.rvol.at_least(config.rvol_confirm) == Some(true);

        if closes_ok && result_ok && rvol_ok {
            self.state = BreakoutPhase::Confirmed;
            self.volume_quality = VolumeQuality::Confirmed;
            return Some(self.signal(SignalType::Confirmed, idx, bar, &f, zone, None, config));
        }

        if self.bars_since_attempt <= config.fakeout_bars {
            if let Some(reason) = self.fakeout_reason(idx, bars, &f, config) {
                self.state = BreakoutPhase::Fakeout;
                return Some(self.signal(SignalType::Fakeout, idx, bar, &f, zone, Some(reason), config));
            }
        } else if !self.is_outside(bar.c) || self.bars_since_attempt >= config.attempt_timeout_bars {
            debug!(
                "Breakout attempt on {} expired after {} bars",
                self.zone_id, self.bars_since_attempt
            );
            self.reset();
        }

        None
    }

    fn fakeout_reason(
        &self,
        idx: usize,
        bars: &[Bar],
        f: &BarFeatures,
        config: &EngineConfig,
    ) -> Option<FakeoutReason> {
        let bar = &bars[idx];
        if !self.is_outside(bar.c) {
            return Some(FakeoutReason::ClosedInside);
        }

        let high_effort = f.rvol.at_least(config.rvol_confirm) == Some(true);
        if high_effort && f.result() < config.absorption_result_max {
            return Some(FakeoutReason::Absorption);
        }

        let no_follow_through = idx > 0
            && match self.boundary {
                Boundary::Upper => bar.c <= bars[idx - 1].c,
                Boundary::Lower => bar.c >= bars[idx - 1].c,
            };
        if high_effort && no_follow_through && self.breakout_wick_ratio(f) >= config.long_wick_ratio {
            return Some(FakeoutReason::WickRejection);
        }

        None
    }

    #[allow(clippy::too_many_arguments)]
    fn signal(
        &self,
        signal_type: SignalType,
        idx: usize,
        bar: &Bar,
        f: &BarFeatures,
        zone: &Zone,
        reason: Option<FakeoutReason>,
        config: &EngineConfig,
    ) -> Signal {
        let vol = f
            .rvol
            .value()
            .map(|r| (r / config.rvol_confirm).min(1.0))
            .unwrap_or(0.0);
        let res = if config.result_confirm > 0.0 {
            (f.result() / config.result_confirm).min(1.0)
        } else {
            1.0
        };
        let closes =
            (self.consecutive_confirm_closures as f64 / config.confirm_closes as f64).min(1.0);

        let confidence = match signal_type {
            SignalType::Attempt | SignalType::Confirmed => {
                0.3 * closes + 0.3 * vol + 0.2 * res + 0.2 * zone.score
            }
            SignalType::Fakeout => 0.4 + 0.3 * vol + 0.3 * zone.score,
        };

        Signal {
            signal_type,
            direction: self.direction(),
            zone_id: self.zone_id,
            level: self.level,
            confidence: confidence.clamp(0.0, 1.0),
            bar_index: idx,
            time: bar.t,
            volume_quality: self.volume_quality,
            reason,
        }
    }
}

/// All breakout FSMs of one (ticker, timeframe), keyed by zone id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakoutBook {
    pub machines: BTreeMap<ZoneId, BreakoutFsm>,
}

impl BreakoutBook {
    pub fn get(&self, id: &ZoneId) -> Option<&BreakoutFsm> {
        self.machines.get(id)
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Current phase per zone
    pub fn phases(&self) -> BTreeMap<ZoneId, BreakoutPhase> {
        self.machines.iter().map(|(id, fsm)| (*id, fsm.state)).collect()
    }

    /// Any FSM currently confirmed in `direction`
    pub fn has_confirmed(&self, direction: BreakDirection) -> bool {
        self.machines
            .values()
            .any(|fsm| fsm.state == BreakoutPhase::Confirmed && fsm.direction() == direction)
    }
}

/// Output of advancing every zone's FSM over the bar window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreakoutRun {
    pub book: BreakoutBook,
    pub signals: Vec<Signal>,
    pub transitions: Vec<Transition>,
    /// Current zone id -> prior id, for FSMs carried over from a zone whose
    /// id changed
    pub inherited: BTreeMap<ZoneId, ZoneId>,
}

/// Find the prior FSM for `zone`: same id, or else the closest unclaimed
/// instance on the same side within a quarter ATR of the boundary.
/// `claimed` starts with every id of the current zone set, so a fallback
/// never steals an instance that still has its own zone.
fn match_prior<'a>(
    prior: &'a BreakoutBook,
    zone: &Zone,
    claimed: &[ZoneId],
    atr: f64,
) -> Option<&'a BreakoutFsm> {
    if let Some(fsm) = prior.get(&zone.id) {
        return Some(fsm);
    }
    let level = zone.breakout_level();
    prior
        .machines
        .values()
        .filter(|fsm| fsm.side == zone.side && !claimed.contains(&fsm.zone_id))
        .filter(|fsm| (fsm.level - level).abs() <= 0.25 * atr)
        .min_by(|a, b| {
            super::zones::cmp_f64((a.level - level).abs(), (b.level - level).abs())
                .then(a.zone_id.cmp(&b.zone_id))
        })
}

/// Step every zone's FSM over the bars it has not seen yet.
///
/// Prior instances resume after their `last_bar_time`; zones without one
/// replay the last `fsm_replay_bars` bars from idle. FSMs of zones that no
/// longer exist are dropped. Instances re-keyed to a new zone id are
/// listed in [`BreakoutRun::inherited`].
pub fn advance_breakouts(
    prior: &BreakoutBook,
    zones: &ZoneSet,
    bars: &[Bar],
    features: &FeatureSet,
    atr: f64,
    config: &EngineConfig,
) -> BreakoutRun {
    let mut run = BreakoutRun::default();
    let mut claimed: Vec<ZoneId> = zones.all().map(|z| z.id).collect();

    for zone in zones.all() {
        let (mut fsm, start) = match match_prior(prior, zone, &claimed, atr) {
            Some(existing) => {
                claimed.push(existing.zone_id);
                if existing.zone_id != zone.id {
                    run.inherited.insert(zone.id, existing.zone_id);
                }
                let start = match existing.last_bar_time {
                    Some(t) => bars.partition_point(|b| b.t <= t),
                    None => bars.len().saturating_sub(config.fsm_replay_bars),
                };
                (existing.clone().rebind(zone), start)
            }
            None => (
                BreakoutFsm::new(zone),
                bars.len().saturating_sub(config.fsm_replay_bars),
            ),
        };

        for idx in start..bars.len() {
            let from = fsm.state;
            let signal = fsm.step(idx, bars, features, zone, config);
            if fsm.state != from {
                run.transitions.push(Transition {
                    zone_id: zone.id,
                    bar_index: idx,
                    from,
                    to: fsm.state,
                });
            }
            if let Some(signal) = signal {
                debug!(
                    "{:?} {:?} signal at bar {} on {} zone {:.4}",
                    signal.signal_type, signal.direction, idx, zone.side, signal.level
                );
                run.signals.push(signal);
            }
        }

        run.book.machines.insert(zone.id, fsm);
    }

    run.signals.sort_by(|a, b| a.bar_index.cmp(&b.bar_index).then(a.zone_id.cmp(&b.zone_id)));
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::compute_features;
    use crate::analysis::test_support::{breakout_bars, test_zone, time_at};
    use uuid::Uuid;

    fn single_set(zone: &Zone) -> ZoneSet {
        match zone.side {
            ZoneSide::Support => ZoneSet {
                support: vec![zone.clone()],
                resistance: vec![],
            },
            ZoneSide::Resistance => ZoneSet {
                support: vec![],
                resistance: vec![zone.clone()],
            },
        }
    }

    fn run_single(bars: &[Bar], zone: &Zone) -> BreakoutRun {
        let config = EngineConfig::default();
        let features = compute_features(bars, config.atr_period, config.rvol_window);
        advance_breakouts(&BreakoutBook::default(), &single_set(zone), bars, &features, 1.0, &config)
    }

    /// Quiet bars around 106 and a low-volume close above 110 at bar 25
    fn attempt_bars() -> Vec<Bar> {
        let mut bars = breakout_bars(Some(1.0));
        bars.truncate(26);
        bars
    }

    /// `n` more low-volume bars drifting up outside the zone
    fn drift_up(bars: &mut Vec<Bar>, n: usize) {
        for _ in 0..n {
            let i = bars.len();
            let prev = bars[i - 1].c;
            let c = prev + 0.1;
            bars.push(Bar::new(time_at(i), prev, c + 0.2, prev - 0.1, c, Some(1000.0)));
        }
    }

    fn kinds(run: &BreakoutRun) -> Vec<(SignalType, Option<FakeoutReason>)> {
        run.signals.iter().map(|s| (s.signal_type, s.reason)).collect()
    }

    #[test]
    fn test_confirmed_breakout_with_volume() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        let bars = breakout_bars(Some(2.1));
        let run = run_single(&bars, &zone);

        let fsm = run.book.get(&zone.id).unwrap();
        assert_eq!(fsm.state, BreakoutPhase::Confirmed);
        let confirmed = run
            .signals
            .iter()
            .find(|s| s.signal_type == SignalType::Confirmed)
            .expect("confirmed signal");
        assert_eq!(confirmed.volume_quality, VolumeQuality::Confirmed);
        assert_eq!(confirmed.direction, BreakDirection::Up);
        assert!(confirmed.bar_index < bars.len());
    }

    #[test]
    fn test_unknown_volume_blocks_confirmation() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        let bars = breakout_bars(None);
        let run = run_single(&bars, &zone);

        let fsm = run.book.get(&zone.id).unwrap();
        assert_eq!(fsm.state, BreakoutPhase::Attempt);
        assert_eq!(fsm.volume_quality, VolumeQuality::Unavailable);
        assert!(run.signals.iter().all(|s| s.signal_type != SignalType::Confirmed));
        let last = run.signals.last().unwrap();
        assert_eq!(last.signal_type, SignalType::Attempt);
        assert_eq!(last.volume_quality, VolumeQuality::Unavailable);
    }

    #[test]
    fn test_low_volume_stays_pending() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        let bars = breakout_bars(Some(1.2));
        let run = run_single(&bars, &zone);
        let fsm = run.book.get(&zone.id).unwrap();
        assert_eq!(fsm.state, BreakoutPhase::Attempt);
        assert_eq!(fsm.volume_quality, VolumeQuality::Pending);
    }

    #[test]
    fn test_close_back_inside_is_fakeout() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        let mut bars = breakout_bars(Some(1.0));
        // the bar after the attempt closes back inside the zone
        let last = bars.len() - 1;
        bars[last].c = 109.0;
        bars[last].o = 110.5;
        bars[last].l = 108.8;
        let run = run_single(&bars, &zone);
        let fake = run
            .signals
            .iter()
            .find(|s| s.signal_type == SignalType::Fakeout)
            .expect("fakeout signal");
        assert_eq!(fake.reason, Some(FakeoutReason::ClosedInside));
        assert_eq!(run.book.get(&zone.id).unwrap().state, BreakoutPhase::Fakeout);
    }

    #[test]
    fn test_never_idle_to_confirmed() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        for rvol in [Some(2.1), Some(5.0), None, Some(1.0)] {
            let run = run_single(&breakout_bars(rvol), &zone);
            for t in &run.transitions {
                assert!(
                    !(t.from == BreakoutPhase::Idle && t.to == BreakoutPhase::Confirmed),
                    "illegal transition {:?}",
                    t
                );
            }
        }
    }

    #[test]
    fn test_resume_from_prior_consumes_only_new_bars() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        let bars = breakout_bars(Some(2.1));
        let config = EngineConfig::default();
        let features = compute_features(&bars, config.atr_period, config.rvol_window);
        let set = single_set(&zone);
        let first = advance_breakouts(&BreakoutBook::default(), &set, &bars, &features, 1.0, &config);
        let second = advance_breakouts(&first.book, &set, &bars, &features, 1.0, &config);
        assert!(second.signals.is_empty());
        assert!(second.transitions.is_empty());
        assert_eq!(first.book, second.book);
    }

    #[test]
    fn test_book_roundtrip() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        let run = run_single(&breakout_bars(Some(2.1)), &zone);
        let json = serde_json::to_string(&run.book).unwrap();
        let back: BreakoutBook = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run.book);
    }

    #[test]
    fn test_support_breakdown_direction() {
        let zone = test_zone(ZoneSide::Support, 100.0, 102.0);
        let fsm = BreakoutFsm::new(&zone);
        assert_eq!(fsm.boundary, Boundary::Lower);
        assert_eq!(fsm.direction(), BreakDirection::Down);
        assert_eq!(fsm.level, 100.0);
    }

    #[test]
    fn test_support_breakdown_confirms() {
        let zone = test_zone(ZoneSide::Support, 100.0, 102.0);
        let mut bars: Vec<Bar> = (0..25)
            .map(|i| {
                let c = if i % 2 == 0 { 103.0 } else { 102.7 };
                Bar::new(time_at(i), c, c + 0.5, c - 0.5, c, Some(1000.0))
            })
            .collect();
        bars.push(Bar::new(time_at(25), 103.0, 103.1, 99.2, 99.4, Some(2100.0)));
        bars.push(Bar::new(time_at(26), 99.4, 99.5, 98.4, 98.6, Some(2100.0)));

        let run = run_single(&bars, &zone);
        assert_eq!(
            kinds(&run),
            vec![(SignalType::Attempt, None), (SignalType::Confirmed, None)]
        );
        let confirmed = &run.signals[1];
        assert_eq!(confirmed.direction, BreakDirection::Down);
        assert_eq!(confirmed.bar_index, 26);
        assert_eq!(confirmed.volume_quality, VolumeQuality::Confirmed);

        let steps: Vec<(usize, BreakoutPhase, BreakoutPhase)> =
            run.transitions.iter().map(|t| (t.bar_index, t.from, t.to)).collect();
        assert_eq!(
            steps,
            vec![
                (25, BreakoutPhase::Idle, BreakoutPhase::Attempt),
                (26, BreakoutPhase::Attempt, BreakoutPhase::Confirmed),
            ]
        );
    }

    #[test]
    fn test_high_volume_without_range_is_absorption() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        let mut bars = attempt_bars();
        // 2.5x volume, true range a fifth of ATR, still closed outside
        bars.push(Bar::new(time_at(26), 110.6, 110.75, 110.5, 110.7, Some(2500.0)));

        let run = run_single(&bars, &zone);
        assert_eq!(
            kinds(&run),
            vec![
                (SignalType::Attempt, None),
                (SignalType::Fakeout, Some(FakeoutReason::Absorption)),
            ]
        );
        assert_eq!(run.book.get(&zone.id).unwrap().state, BreakoutPhase::Fakeout);
    }

    #[test]
    fn test_long_wick_on_volume_without_follow_through() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        let mut bars = attempt_bars();
        // closes outside but below the attempt close, upper wick ~54% of range
        bars.push(Bar::new(time_at(26), 110.6, 110.95, 110.3, 110.4, Some(2500.0)));

        let run = run_single(&bars, &zone);
        assert_eq!(
            kinds(&run),
            vec![
                (SignalType::Attempt, None),
                (SignalType::Fakeout, Some(FakeoutReason::WickRejection)),
            ]
        );
    }

    #[test]
    fn test_fakeout_resets_on_next_bar() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        let mut bars = attempt_bars();
        bars.push(Bar::new(time_at(26), 110.6, 110.75, 110.5, 110.7, Some(2500.0)));
        bars.push(Bar::new(time_at(27), 109.5, 109.8, 108.9, 109.0, Some(1000.0)));

        let run = run_single(&bars, &zone);
        let fsm = run.book.get(&zone.id).unwrap();
        assert_eq!(fsm.state, BreakoutPhase::Idle);
        assert_eq!(fsm.attempt_time, None);
        let last = run.transitions.last().unwrap();
        assert_eq!((last.bar_index, last.from, last.to), (27, BreakoutPhase::Fakeout, BreakoutPhase::Idle));
    }

    #[test]
    fn test_attempt_expires_after_fakeout_window() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        let config = EngineConfig::default();

        // back inside once the fakeout window is over: quiet reset, no signal
        let mut bars = attempt_bars();
        drift_up(&mut bars, config.fakeout_bars as usize);
        let i = bars.len();
        let prev = bars[i - 1].c;
        bars.push(Bar::new(time_at(i), prev, prev + 0.1, 109.4, 109.5, Some(1000.0)));

        let run = run_single(&bars, &zone);
        assert_eq!(kinds(&run), vec![(SignalType::Attempt, None)]);
        assert_eq!(run.book.get(&zone.id).unwrap().state, BreakoutPhase::Idle);
        let last = run.transitions.last().unwrap();
        assert_eq!((last.bar_index, last.from, last.to), (i, BreakoutPhase::Attempt, BreakoutPhase::Idle));

        // still outside but never confirmed: times out
        let mut bars = attempt_bars();
        drift_up(&mut bars, config.attempt_timeout_bars as usize - 1);
        let run = run_single(&bars, &zone);
        let fsm = run.book.get(&zone.id).unwrap();
        assert_eq!(fsm.state, BreakoutPhase::Attempt);
        assert_eq!(fsm.bars_since_attempt, config.attempt_timeout_bars - 1);

        drift_up(&mut bars, 1);
        let run = run_single(&bars, &zone);
        assert_eq!(kinds(&run), vec![(SignalType::Attempt, None)]);
        assert_eq!(run.book.get(&zone.id).unwrap().state, BreakoutPhase::Idle);
        let last = run.transitions.last().unwrap();
        assert_eq!(last.bar_index, bars.len() - 1);
        assert_eq!(last.to, BreakoutPhase::Idle);
    }

    #[test]
    fn test_rekeyed_zone_inherits_prior_fsm() {
        let zone = test_zone(ZoneSide::Resistance, 108.0, 110.0);
        let bars = breakout_bars(Some(2.1));
        let config = EngineConfig::default();
        let features = compute_features(&bars, config.atr_period, config.rvol_window);
        let set = single_set(&zone);
        let first = advance_breakouts(&BreakoutBook::default(), &set, &bars, &features, 1.0, &config);
        assert!(first.inherited.is_empty());

        let old_id = ZoneId(Uuid::from_u128(42));
        let mut prior = first.book.clone();
        let mut fsm = prior.machines.remove(&zone.id).unwrap();
        fsm.zone_id = old_id;
        prior.machines.insert(old_id, fsm);

        let second = advance_breakouts(&prior, &set, &bars, &features, 1.0, &config);
        assert_eq!(second.inherited.get(&zone.id), Some(&old_id));
        assert!(second.transitions.is_empty());
        assert_eq!(second.book, first.book);
    }
}
