//! Timeline differ
//!
//! Compares a fresh cycle against the caller's persisted [`TimelineState`]
//! and emits only what is new. The differ holds no state of its own: it
//! returns the events to append and the state to persist for next time.
//!
//! Hard events (regime, dominant behavior, probability shift, breakout
//! phase) are always recorded. Soft events (zone contact, spring/upthrust,
//! volume, new swings) only look at bars newer than the last bar seen, so
//! feeding the same cycle twice yields nothing the second time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::behavior::{Behavior, BehaviorResult};
use super::breakout::BreakoutPhase;
use super::evidence::Severity;
use super::features::{FeatureSet, Rvol};
use super::patterns::{find_sweeps, PatternKind};
use super::regime::{MarketState, Regime};
use super::swings::SwingPoint;
use super::zones::{Zone, ZoneId, ZoneSet, ZoneSide};
use crate::bars::Bar;
use crate::config::EngineConfig;

/// Last contact state emitted for a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneContact {
    #[default]
    Clear,
    Approached,
    Tested,
    Rejected,
    Accepted,
}

/// Persisted per (ticker, timeframe); owned by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineState {
    pub last_regime: Option<Regime>,
    pub last_dominant_behavior: Option<Behavior>,
    pub last_probabilities: BTreeMap<Behavior, f64>,
    pub last_breakout_state: BTreeMap<ZoneId, BreakoutPhase>,
    pub last_zones_fingerprint: Option<String>,
    pub last_bar_time: Option<DateTime<Utc>>,
    pub last_swing_time: Option<DateTime<Utc>>,
    pub last_swing_high: Option<f64>,
    pub last_swing_low: Option<f64>,
    pub zone_contacts: BTreeMap<ZoneId, ZoneContact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    RegimeEstablished,
    RegimeChange,
    BehaviorEstablished,
    DominantChange,
    ProbabilityShift,
    BreakoutStateChange,
    ZoneApproached,
    ZoneTested,
    ZoneRejected,
    ZoneAccepted,
    Spring,
    Upthrust,
    VolumeSpike,
    VolumeDryUp,
    NewSwingHigh,
    NewSwingLow,
    ZonesShifted,
}

impl TimelineEventType {
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            TimelineEventType::RegimeEstablished
                | TimelineEventType::RegimeChange
                | TimelineEventType::BehaviorEstablished
                | TimelineEventType::DominantChange
                | TimelineEventType::ProbabilityShift
                | TimelineEventType::BreakoutStateChange
        )
    }
}

/// What changed, with a fixed schema per event family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDelta {
    Regime {
        from: Option<Regime>,
        to: Regime,
        confidence: f64,
    },
    Behavior {
        from: Option<Behavior>,
        to: Behavior,
        probability: f64,
    },
    Probability {
        behavior: Behavior,
        from: f64,
        to: f64,
        change: f64,
    },
    Breakout {
        zone_id: ZoneId,
        from: BreakoutPhase,
        to: BreakoutPhase,
    },
    Zone {
        zone_id: ZoneId,
        side: ZoneSide,
        low: f64,
        high: f64,
        close: f64,
    },
    Pattern {
        zone_id: ZoneId,
        level: f64,
        extreme: f64,
        rvol: Rvol,
    },
    Volume {
        rvol: f64,
    },
    Swing {
        price: f64,
        previous: Option<f64>,
    },
    Zones {
        from: Option<String>,
        to: String,
    },
}

/// Append-only timeline entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub ts: DateTime<Utc>,
    pub event_type: TimelineEventType,
    pub delta: EventDelta,
    pub reason: String,
    pub bar_index: usize,
    pub severity: Severity,
}

/// The fresh cycle as the differ sees it
pub struct TimelineSnapshot<'a> {
    pub bars: &'a [Bar],
    pub features: &'a FeatureSet,
    pub swings: &'a [SwingPoint],
    pub zones: &'a ZoneSet,
    pub market_state: MarketState,
    pub behavior: &'a BehaviorResult,
    pub phases: &'a BTreeMap<ZoneId, BreakoutPhase>,
    /// Current zone id -> the prior id its FSM was carried over from
    pub inherited: &'a BTreeMap<ZoneId, ZoneId>,
    pub atr: f64,
}

impl TimelineSnapshot<'_> {
    /// Look `id` up in a prior per-zone map, following a re-keyed zone
    /// back to its previous id
    fn prior_entry<'m, V>(&self, map: &'m BTreeMap<ZoneId, V>, id: &ZoneId) -> Option<&'m V> {
        map.get(id)
            .or_else(|| self.inherited.get(id).and_then(|old| map.get(old)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineDiff {
    pub events: Vec<TimelineEvent>,
    pub state: TimelineState,
}

struct Emitter<'a> {
    bars: &'a [Bar],
    events: Vec<TimelineEvent>,
}

impl Emitter<'_> {
    fn push(
        &mut self,
        bar_index: usize,
        event_type: TimelineEventType,
        severity: Severity,
        delta: EventDelta,
        reason: String,
    ) {
        self.events.push(TimelineEvent {
            ts: self.bars[bar_index].t,
            event_type,
            delta,
            reason,
            bar_index,
            severity,
        });
    }
}

fn classify_contact(zone: &Zone, bar: &Bar, atr: f64, approach_atr: f64) -> ZoneContact {
    if zone.is_touched_by(bar) {
        let (defended, broken) = match zone.side {
            ZoneSide::Support => (bar.c > zone.high, bar.c < zone.low),
            ZoneSide::Resistance => (bar.c < zone.low, bar.c > zone.high),
        };
        if defended {
            ZoneContact::Rejected
        } else if broken {
            ZoneContact::Accepted
        } else {
            ZoneContact::Tested
        }
    } else if zone.distance_to(bar.c) <= approach_atr * atr {
        ZoneContact::Approached
    } else {
        ZoneContact::Clear
    }
}

fn breakout_severity(phase: BreakoutPhase) -> Severity {
    match phase {
        BreakoutPhase::Confirmed | BreakoutPhase::Fakeout => Severity::High,
        BreakoutPhase::Attempt => Severity::Medium,
        BreakoutPhase::Idle => Severity::Low,
    }
}

fn hard_events(prior: &TimelineState, snap: &TimelineSnapshot, config: &EngineConfig, out: &mut Emitter) {
    let last = snap.bars.len() - 1;
    let state = snap.market_state;

    match prior.last_regime {
        None => out.push(
            last,
            TimelineEventType::RegimeEstablished,
            Severity::Medium,
            EventDelta::Regime {
                from: None,
                to: state.regime,
                confidence: state.confidence,
            },
            format!("Regime established as {} ({:.2})", state.regime, state.confidence),
        ),
        Some(previous) if previous != state.regime => out.push(
            last,
            TimelineEventType::RegimeChange,
            Severity::High,
            EventDelta::Regime {
                from: Some(previous),
                to: state.regime,
                confidence: state.confidence,
            },
            format!("Regime changed {} -> {} ({:.2})", previous, state.regime, state.confidence),
        ),
        Some(_) => {}
    }

    let dominant = snap.behavior.dominant;
    let p_now = snap.behavior.probability(dominant);
    match prior.last_dominant_behavior {
        None => out.push(
            last,
            TimelineEventType::BehaviorEstablished,
            Severity::Medium,
            EventDelta::Behavior {
                from: None,
                to: dominant,
                probability: p_now,
            },
            format!("Dominant behavior established as {} (p={:.2})", dominant, p_now),
        ),
        Some(previous) if previous != dominant => out.push(
            last,
            TimelineEventType::DominantChange,
            Severity::High,
            EventDelta::Behavior {
                from: Some(previous),
                to: dominant,
                probability: p_now,
            },
            format!("Dominant behavior {} -> {} (p={:.2})", previous, dominant, p_now),
        ),
        Some(_) => {
            if let Some(p_prev) = prior.last_probabilities.get(&dominant) {
                let change = p_now - p_prev;
                if change.abs() >= config.timeline_delta {
                    out.push(
                        last,
                        TimelineEventType::ProbabilityShift,
                        Severity::Medium,
                        EventDelta::Probability {
                            behavior: dominant,
                            from: *p_prev,
                            to: p_now,
                            change,
                        },
                        format!("{} probability {:.2} -> {:.2}", dominant, p_prev, p_now),
                    );
                }
            }
        }
    }

    for (zone_id, phase) in snap.phases {
        let previous = snap
            .prior_entry(&prior.last_breakout_state, zone_id)
            .copied()
            .unwrap_or(BreakoutPhase::Idle);
        if previous == *phase {
            continue;
        }
        let side = snap
            .zones
            .get(zone_id)
            .map(|z| z.side.to_string())
            .unwrap_or_else(|| "zone".to_string());
        out.push(
            last,
            TimelineEventType::BreakoutStateChange,
            breakout_severity(*phase),
            EventDelta::Breakout {
                zone_id: *zone_id,
                from: previous,
                to: *phase,
            },
            format!("Breakout FSM on {} {}: {} -> {}", side, zone_id, previous, phase),
        );
    }
}

/// Update zone contacts bar by bar, emitting on every change to a
/// non-clear state
fn contact_events(
    prior: &TimelineState,
    snap: &TimelineSnapshot,
    start: usize,
    config: &EngineConfig,
    out: &mut Emitter,
) -> BTreeMap<ZoneId, ZoneContact> {
    let mut contacts = BTreeMap::new();

    for zone in snap.zones.all() {
        let mut contact = snap
            .prior_entry(&prior.zone_contacts, &zone.id)
            .copied()
            .unwrap_or_default();

        for i in start..snap.bars.len() {
            let bar = &snap.bars[i];
            let now = classify_contact(zone, bar, snap.atr, config.approach_atr);
            if now == contact {
                continue;
            }
            contact = now;

            let (event_type, severity, verb) = match now {
                ZoneContact::Clear => continue,
                ZoneContact::Approached => (TimelineEventType::ZoneApproached, Severity::Low, "approached"),
                ZoneContact::Tested => (TimelineEventType::ZoneTested, Severity::Low, "tested"),
                ZoneContact::Rejected => (TimelineEventType::ZoneRejected, Severity::Medium, "rejected from"),
                ZoneContact::Accepted => (TimelineEventType::ZoneAccepted, Severity::Medium, "accepted through"),
            };
            out.push(
                i,
                event_type,
                severity,
                EventDelta::Zone {
                    zone_id: zone.id,
                    side: zone.side,
                    low: zone.low,
                    high: zone.high,
                    close: bar.c,
                },
                format!(
                    "Price {} {} {:.2}-{:.2} (close {:.2})",
                    verb, zone.side, zone.low, zone.high, bar.c
                ),
            );
        }

        contacts.insert(zone.id, contact);
    }

    contacts
}

fn pattern_events(snap: &TimelineSnapshot, start: usize, config: &EngineConfig, out: &mut Emitter) {
    let scan_from = start.saturating_sub(config.reclaim_bars);

    for zone in snap.zones.all() {
        for p in find_sweeps(snap.bars, snap.features, zone, scan_from, config.reclaim_bars) {
            if p.reclaim_index < start {
                continue;
            }
            let (event_type, name) = match p.kind {
                PatternKind::Spring => (TimelineEventType::Spring, "Spring"),
                PatternKind::Upthrust => (TimelineEventType::Upthrust, "Upthrust"),
            };
            let severity = match p.rvol.at_least(config.volume_spike_rvol) {
                Some(true) => Severity::High,
                _ => Severity::Medium,
            };
            out.push(
                p.reclaim_index,
                event_type,
                severity,
                EventDelta::Pattern {
                    zone_id: p.zone_id,
                    level: p.level,
                    extreme: p.extreme,
                    rvol: p.rvol,
                },
                format!(
                    "{} at {:.2}: swept to {:.2} and closed back after {} bar(s)",
                    name,
                    p.level,
                    p.extreme,
                    p.reclaim_index - p.sweep_index
                ),
            );
        }
    }
}

fn volume_events(snap: &TimelineSnapshot, start: usize, config: &EngineConfig, out: &mut Emitter) {
    let is_dry = |i: usize| {
        snap.features.bars[i].rvol.value().map(|r| r <= config.volume_dry_rvol) == Some(true)
    };

    for i in start..snap.bars.len() {
        let Some(rvol) = snap.features.bars[i].rvol.value() else {
            continue;
        };
        if rvol >= config.volume_spike_rvol {
            out.push(
                i,
                TimelineEventType::VolumeSpike,
                Severity::grade(rvol, config.volume_spike_rvol, 1.5 * config.volume_spike_rvol),
                EventDelta::Volume { rvol },
                format!("Volume spike RVOL {:.2}", rvol),
            );
        } else if is_dry(i) && !(i > 0 && is_dry(i - 1)) {
            out.push(
                i,
                TimelineEventType::VolumeDryUp,
                Severity::Low,
                EventDelta::Volume { rvol },
                format!("Volume dried up, RVOL {:.2}", rvol),
            );
        }
    }
}

/// New swing extremes since the last swing seen; returns the updated
/// (time, high, low) markers
fn swing_events(
    prior: &TimelineState,
    snap: &TimelineSnapshot,
    start: usize,
    config: &EngineConfig,
    out: &mut Emitter,
) -> (Option<DateTime<Utc>>, Option<f64>, Option<f64>) {
    let mut last_time = prior.last_swing_time;
    let mut last_high = prior.last_swing_high;
    let mut last_low = prior.last_swing_low;
    // a swing is confirmed `swing_order` bars after it prints
    let floor = start.saturating_sub(config.swing_order);

    for swing in snap.swings {
        if prior.last_swing_time.is_some_and(|t| swing.time <= t) {
            continue;
        }
        let previous = if swing.is_high { last_high } else { last_low };

        if swing.index >= floor {
            let (event_type, label) = if swing.is_high {
                (TimelineEventType::NewSwingHigh, "high")
            } else {
                (TimelineEventType::NewSwingLow, "low")
            };
            let reason = match previous {
                Some(p) => format!("New swing {} {:.2} (previous {:.2})", label, swing.price, p),
                None => format!("New swing {} {:.2}", label, swing.price),
            };
            out.push(
                swing.index,
                event_type,
                Severity::Low,
                EventDelta::Swing {
                    price: swing.price,
                    previous,
                },
                reason,
            );
        }

        if swing.is_high {
            last_high = Some(swing.price);
        } else {
            last_low = Some(swing.price);
        }
        last_time = Some(last_time.map_or(swing.time, |t| t.max(swing.time)));
    }

    (last_time, last_high, last_low)
}

/// Diff a fresh cycle against the prior state
pub fn diff_timeline(
    prior: &TimelineState,
    snap: &TimelineSnapshot,
    config: &EngineConfig,
) -> TimelineDiff {
    let Some(last_bar) = snap.bars.last() else {
        return TimelineDiff {
            events: Vec::new(),
            state: prior.clone(),
        };
    };
    let len = snap.bars.len();

    // soft events only for unseen bars, and never further back than the
    // behavior window
    let first_new = match prior.last_bar_time {
        Some(t) => snap.bars.partition_point(|b| b.t <= t),
        None => 0,
    };
    let start = first_new.max(len.saturating_sub(config.behavior_lookback));

    let mut hard = Emitter {
        bars: snap.bars,
        events: Vec::new(),
    };
    hard_events(prior, snap, config, &mut hard);

    let mut soft = Emitter {
        bars: snap.bars,
        events: Vec::new(),
    };
    let zone_contacts = contact_events(prior, snap, start, config, &mut soft);
    pattern_events(snap, start, config, &mut soft);
    volume_events(snap, start, config, &mut soft);
    let (last_swing_time, last_swing_high, last_swing_low) =
        swing_events(prior, snap, start, config, &mut soft);

    let fingerprint = snap.zones.fingerprint();
    if let Some(previous) = &prior.last_zones_fingerprint {
        if *previous != fingerprint {
            soft.push(
                len - 1,
                TimelineEventType::ZonesShifted,
                Severity::Low,
                EventDelta::Zones {
                    from: Some(previous.clone()),
                    to: fingerprint.clone(),
                },
                format!(
                    "Zone layout changed ({} support, {} resistance)",
                    snap.zones.support.len(),
                    snap.zones.resistance.len()
                ),
            );
        }
    }

    soft.events.sort_by_key(|e| e.bar_index);
    let mut events = hard.events;
    events.extend(soft.events);

    let state = TimelineState {
        last_regime: Some(snap.market_state.regime),
        last_dominant_behavior: Some(snap.behavior.dominant),
        last_probabilities: snap.behavior.probabilities.clone(),
        last_breakout_state: snap.phases.clone(),
        last_zones_fingerprint: Some(fingerprint),
        last_bar_time: Some(prior.last_bar_time.map_or(last_bar.t, |t| t.max(last_bar.t))),
        last_swing_time,
        last_swing_high,
        last_swing_low,
        zone_contacts,
    };

    TimelineDiff { events, state }
}
