//! Conditional trade templates keyed by regime

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::regime::{MarketState, Regime};
use super::zones::{Zone, ZoneSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    PullbackContinuation,
    ResistanceBreakout,
    RallyRejection,
    SupportBreakdown,
    SupportBounce,
    ResistanceFade,
}

impl PlanKind {
    pub fn bias(&self) -> Bias {
        match self {
            PlanKind::PullbackContinuation | PlanKind::ResistanceBreakout | PlanKind::SupportBounce => {
                Bias::Long
            }
            PlanKind::RallyRejection | PlanKind::SupportBreakdown | PlanKind::ResistanceFade => {
                Bias::Short
            }
        }
    }
}

impl std::fmt::Display for PlanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanKind::PullbackContinuation => write!(f, "pullback continuation"),
            PlanKind::ResistanceBreakout => write!(f, "resistance breakout"),
            PlanKind::RallyRejection => write!(f, "rally rejection"),
            PlanKind::SupportBreakdown => write!(f, "support breakdown"),
            PlanKind::SupportBounce => write!(f, "support bounce"),
            PlanKind::ResistanceFade => write!(f, "resistance fade"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Long,
    Short,
}

/// One conditional plan with explicit invalidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookPlan {
    /// "Plan A" / "Plan B"
    pub name: String,
    pub kind: PlanKind,
    pub bias: Bias,
    pub condition: String,
    pub level: f64,
    pub target: f64,
    pub invalidation: f64,
    pub risk: String,
    pub reward_risk: f64,
}

/// Entry/target/invalidation before validation
struct Levels {
    level: f64,
    target: f64,
    invalidation: Option<f64>,
    /// Zone the plan trades around, for the condition text
    zone: Option<(f64, f64)>,
}

fn band(zone: Option<&Zone>) -> Option<(f64, f64)> {
    zone.map(|z| (z.low, z.high))
}

/// ATR if it can size a fallback level
fn usable_atr(atr: f64) -> Option<f64> {
    (atr.is_finite() && atr > 0.0).then_some(atr)
}

/// Long from support: buy the top of the nearest support, aim for the next
/// resistance
fn long_from_support(zones: &ZoneSet, price: f64, atr: f64) -> Levels {
    let support = zones.nearest_support(price);
    let level = support.map(|s| s.high.min(price)).unwrap_or(price - atr);
    let target = zones
        .nearest_resistance(price)
        .map(|r| r.low)
        .filter(|t| *t > level)
        .unwrap_or(level + 2.0 * atr);
    let invalidation = match support {
        Some(s) => Some(s.low - 0.25 * atr),
        None => usable_atr(atr).map(|a| price - 2.0 * a),
    };
    Levels {
        level,
        target,
        invalidation,
        zone: band(support),
    }
}

/// Long on a break above the nearest resistance
fn long_breakout(zones: &ZoneSet, price: f64, atr: f64) -> Levels {
    let resistance = zones.nearest_resistance(price);
    let level = resistance.map(|r| r.high).unwrap_or(price + atr);
    let target = zones
        .resistance_above(level)
        .map(|r| r.low)
        .filter(|t| *t > level)
        .unwrap_or(level + 2.0 * atr);
    let invalidation = match resistance {
        Some(r) => Some(r.low - 0.25 * atr),
        None => usable_atr(atr).map(|a| price - 2.0 * a),
    };
    Levels {
        level,
        target,
        invalidation,
        zone: band(resistance),
    }
}

/// Short from resistance: sell the bottom of the nearest resistance, aim
/// for the next support
fn short_from_resistance(zones: &ZoneSet, price: f64, atr: f64) -> Levels {
    let resistance = zones.nearest_resistance(price);
    let level = resistance.map(|r| r.low.max(price)).unwrap_or(price + atr);
    let target = zones
        .nearest_support(price)
        .map(|s| s.high)
        .filter(|t| *t < level)
        .unwrap_or(level - 2.0 * atr);
    let invalidation = match resistance {
        Some(r) => Some(r.high + 0.25 * atr),
        None => usable_atr(atr).map(|a| price + 2.0 * a),
    };
    Levels {
        level,
        target,
        invalidation,
        zone: band(resistance),
    }
}

/// Short on a break below the nearest support
fn short_breakdown(zones: &ZoneSet, price: f64, atr: f64) -> Levels {
    let support = zones.nearest_support(price);
    let level = support.map(|s| s.low).unwrap_or(price - atr);
    let target = zones
        .support_below(level)
        .map(|s| s.high)
        .filter(|t| *t < level)
        .unwrap_or(level - 2.0 * atr);
    let invalidation = match support {
        Some(s) => Some(s.high + 0.25 * atr),
        None => usable_atr(atr).map(|a| price + 2.0 * a),
    };
    Levels {
        level,
        target,
        invalidation,
        zone: band(support),
    }
}

fn condition(kind: PlanKind, levels: &Levels) -> String {
    let zone = match levels.zone {
        Some((low, high)) => format!("{:.2}-{:.2}", low, high),
        None => format!("{:.2} (ATR fallback)", levels.level),
    };
    match kind {
        PlanKind::PullbackContinuation => {
            format!("Pullback into support {} holds with a close back above {:.2}", zone, levels.level)
        }
        PlanKind::ResistanceBreakout => format!(
            "Consecutive closes above resistance {} on high relative volume confirm the breakout over {:.2}",
            zone, levels.level
        ),
        PlanKind::RallyRejection => format!(
            "Rally into resistance {} rejects with a close back below {:.2}",
            zone, levels.level
        ),
        PlanKind::SupportBreakdown => format!(
            "Consecutive closes below support {} on high relative volume confirm the breakdown under {:.2}",
            zone, levels.level
        ),
        PlanKind::SupportBounce => {
            format!("Range low {} holds; long on a rejection above {:.2}", zone, levels.level)
        }
        PlanKind::ResistanceFade => {
            format!("Range high {} caps price; short on a rejection below {:.2}", zone, levels.level)
        }
    }
}

fn risk_note(kind: PlanKind, invalidation: f64, reward_risk: f64) -> String {
    let base = match kind {
        PlanKind::PullbackContinuation => "Trend may be rolling over",
        PlanKind::ResistanceBreakout => "Breakout may fail as a fakeout or absorption",
        PlanKind::RallyRejection => "Downtrend may be reversing",
        PlanKind::SupportBreakdown => "Breakdown may be a spring that gets reclaimed",
        PlanKind::SupportBounce => "Range may resolve lower",
        PlanKind::ResistanceFade => "Range may resolve higher",
    };
    let side = match kind.bias() {
        Bias::Long => "below",
        Bias::Short => "above",
    };
    format!(
        "{}; a close {} {:.2} invalidates (reward/risk {:.2})",
        base, side, invalidation, reward_risk
    )
}

/// Validate the levels and build the plan. Plans without a usable
/// invalidation on the correct side are dropped: no zone and no usable ATR
/// leaves nothing to invalidate against.
fn build_plan(name: &str, kind: PlanKind, levels: Levels) -> Option<PlaybookPlan> {
    let invalidation = levels.invalidation.filter(|v| v.is_finite())?;
    let (level, target) = (levels.level, levels.target);
    if !level.is_finite() || !target.is_finite() {
        return None;
    }

    let ordered = match kind.bias() {
        Bias::Long => invalidation < level && level < target,
        Bias::Short => target < level && level < invalidation,
    };
    if !ordered {
        debug!("Skipping {} plan: invalidation {:.4} vs level {:.4}", kind, invalidation, level);
        return None;
    }

    let reward_risk = (target - level).abs() / (level - invalidation).abs();

    Some(PlaybookPlan {
        name: name.to_string(),
        kind,
        bias: kind.bias(),
        condition: condition(kind, &levels),
        level,
        target,
        invalidation,
        risk: risk_note(kind, invalidation, reward_risk),
        reward_risk,
    })
}

/// Plan A and Plan B for the current regime
pub fn generate_playbook(
    zones: &ZoneSet,
    market_state: &MarketState,
    price: f64,
    atr: f64,
) -> Vec<PlaybookPlan> {
    let (a, b) = match market_state.regime {
        Regime::Uptrend => (
            (PlanKind::PullbackContinuation, long_from_support(zones, price, atr)),
            (PlanKind::ResistanceBreakout, long_breakout(zones, price, atr)),
        ),
        Regime::Downtrend => (
            (PlanKind::RallyRejection, short_from_resistance(zones, price, atr)),
            (PlanKind::SupportBreakdown, short_breakdown(zones, price, atr)),
        ),
        Regime::Range => (
            (PlanKind::SupportBounce, long_from_support(zones, price, atr)),
            (PlanKind::ResistanceFade, short_from_resistance(zones, price, atr)),
        ),
    };

    [("Plan A", a), ("Plan B", b)]
        .into_iter()
        .filter_map(|(name, (kind, levels))| build_plan(name, kind, levels))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::test_zone;
    use crate::analysis::zones::ZoneSide;

    fn range_zones() -> ZoneSet {
        ZoneSet {
            support: vec![test_zone(ZoneSide::Support, 99.0, 100.5)],
            resistance: vec![test_zone(ZoneSide::Resistance, 109.5, 111.0)],
        }
    }

    fn state(regime: Regime) -> MarketState {
        MarketState {
            regime,
            confidence: 0.8,
        }
    }

    fn assert_well_formed(plan: &PlaybookPlan) {
        assert!(!plan.risk.is_empty());
        assert!(!plan.condition.is_empty());
        assert!(plan.reward_risk > 0.0);
        match plan.bias {
            Bias::Long => assert!(plan.invalidation < plan.level && plan.level < plan.target),
            Bias::Short => assert!(plan.target < plan.level && plan.level < plan.invalidation),
        }
    }

    #[test]
    fn test_range_templates_use_zones() {
        let plans = generate_playbook(&range_zones(), &state(Regime::Range), 104.0, 2.0);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].name, "Plan A");
        assert_eq!(plans[0].kind, PlanKind::SupportBounce);
        assert_eq!(plans[0].level, 100.5);
        assert_eq!(plans[0].target, 109.5);
        assert_eq!(plans[0].invalidation, 98.5);
        assert_eq!(plans[1].kind, PlanKind::ResistanceFade);
        assert_eq!(plans[1].level, 109.5);
        assert_eq!(plans[1].invalidation, 111.5);
        plans.iter().for_each(assert_well_formed);
    }

    #[test]
    fn test_trend_templates() {
        let up = generate_playbook(&range_zones(), &state(Regime::Uptrend), 104.0, 2.0);
        let kinds: Vec<PlanKind> = up.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PlanKind::PullbackContinuation, PlanKind::ResistanceBreakout]);
        assert_eq!(up[1].level, 111.0);
        // no resistance above: ATR fallback target
        assert_eq!(up[1].target, 115.0);

        let down = generate_playbook(&range_zones(), &state(Regime::Downtrend), 104.0, 2.0);
        let kinds: Vec<PlanKind> = down.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PlanKind::RallyRejection, PlanKind::SupportBreakdown]);
        up.iter().chain(down.iter()).for_each(assert_well_formed);
    }

    #[test]
    fn test_atr_fallbacks_without_zones() {
        let plans = generate_playbook(&ZoneSet::default(), &state(Regime::Uptrend), 50.0, 1.0);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].level, 49.0);
        assert_eq!(plans[0].target, 51.0);
        assert_eq!(plans[0].invalidation, 48.0);
        plans.iter().for_each(assert_well_formed);
    }

    #[test]
    fn test_invalidation_needs_zone_or_atr() {
        let empty = ZoneSet::default();
        for atr in [0.0, -1.0, f64::NAN] {
            assert_eq!(long_from_support(&empty, 50.0, atr).invalidation, None);
            assert_eq!(long_breakout(&empty, 50.0, atr).invalidation, None);
            assert_eq!(short_from_resistance(&empty, 50.0, atr).invalidation, None);
            assert_eq!(short_breakdown(&empty, 50.0, atr).invalidation, None);
        }
        assert_eq!(long_from_support(&empty, 50.0, 1.0).invalidation, Some(48.0));
        // a zone alone is enough
        assert_eq!(long_from_support(&range_zones(), 104.0, 0.0).invalidation, Some(99.0));
        assert_eq!(short_breakdown(&range_zones(), 104.0, 0.0).invalidation, Some(100.5));
    }

    #[test]
    fn test_no_invalidation_no_plan() {
        // zero ATR and no zones: every level collapses onto price
        let plans = generate_playbook(&ZoneSet::default(), &state(Regime::Range), 50.0, 0.0);
        assert!(plans.is_empty());
    }
}
