//! Wyckoff spring / upthrust detection around zone boundaries

use serde::{Deserialize, Serialize};

use super::features::{FeatureSet, Rvol};
use super::zones::{cmp_f64, Zone, ZoneId, ZoneSide};
use crate::bars::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Break below support that is reclaimed
    Spring,
    /// Break above resistance that is rejected
    Upthrust,
}

/// A sweep beyond a zone boundary followed by a close back on the
/// defended side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPattern {
    pub kind: PatternKind,
    pub zone_id: ZoneId,
    pub level: f64,
    /// First bar beyond the boundary
    pub sweep_index: usize,
    /// Bar that closed back on the defended side (== sweep_index for a
    /// single-bar wick-and-close)
    pub reclaim_index: usize,
    /// Lowest low (spring) or highest high (upthrust) of the pattern
    pub extreme: f64,
    /// Highest known RVOL over the pattern bars
    pub rvol: Rvol,
    /// Longest wick toward the sweep over the pattern bars
    pub wick_ratio: f64,
}

impl SweepPattern {
    /// Depth of the sweep past the level
    pub fn depth(&self) -> f64 {
        (self.level - self.extreme).abs()
    }
}

/// Find springs (support zones) or upthrusts (resistance zones) whose
/// sweep starts at or after `start`.
///
/// A close beyond the boundary must be reclaimed within `reclaim_bars`
/// bars; a bar that only wicks beyond and closes back counts on its own.
pub fn find_sweeps(
    bars: &[Bar],
    features: &FeatureSet,
    zone: &Zone,
    start: usize,
    reclaim_bars: usize,
) -> Vec<SweepPattern> {
    let (kind, level) = match zone.side {
        ZoneSide::Support => (PatternKind::Spring, zone.low),
        ZoneSide::Resistance => (PatternKind::Upthrust, zone.high),
    };
    let beyond = |price: f64| match kind {
        PatternKind::Spring => price < level,
        PatternKind::Upthrust => price > level,
    };
    let wick_beyond = |bar: &Bar| match kind {
        PatternKind::Spring => bar.l < level,
        PatternKind::Upthrust => bar.h > level,
    };

    let mut found = Vec::new();
    let mut j = start;

    while j < bars.len() {
        let bar = &bars[j];

        if beyond(bar.c) {
            // only the first close of a run beyond the level opens a pattern
            if j > 0 && beyond(bars[j - 1].c) {
                j += 1;
                continue;
            }
            let last = (j + reclaim_bars).min(bars.len() - 1);
            if let Some(k) = (j + 1..=last).find(|&k| !beyond(bars[k].c)) {
                found.push(build(bars, features, zone, kind, level, j, k));
                j = k + 1;
                continue;
            }
        } else if wick_beyond(bar) {
            found.push(build(bars, features, zone, kind, level, j, j));
        }

        j += 1;
    }

    found
}

fn build(
    bars: &[Bar],
    features: &FeatureSet,
    zone: &Zone,
    kind: PatternKind,
    level: f64,
    sweep_index: usize,
    reclaim_index: usize,
) -> SweepPattern {
    let span = &bars[sweep_index..=reclaim_index];
    let extreme = match kind {
        PatternKind::Spring => span.iter().map(|b| b.l).fold(f64::INFINITY, f64::min),
        PatternKind::Upthrust => span.iter().map(|b| b.h).fold(f64::NEG_INFINITY, f64::max),
    };

    let feats = &features.bars[sweep_index..=reclaim_index.min(features.len().saturating_sub(1))];
    let rvol = feats
        .iter()
        .filter_map(|f| f.rvol.value())
        .max_by(|a, b| cmp_f64(*a, *b));
    let wick_ratio = feats
        .iter()
        .map(|f| match kind {
            PatternKind::Spring => f.lower_wick_ratio,
            PatternKind::Upthrust => f.upper_wick_ratio,
        })
        .fold(0.0, f64::max);

    SweepPattern {
        kind,
        zone_id: zone.id,
        level,
        sweep_index,
        reclaim_index,
        extreme,
        rvol: Rvol(rvol),
        wick_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::compute_features;
    use crate::analysis::test_support::{bars_from, test_zone};

    #[test]
    fn test_close_below_then_reclaim_is_spring() {
        let bars = bars_from(&[
            (101.0, 101.5, 100.5, 101.0),
            (101.0, 101.2, 98.5, 99.0),
            (99.0, 99.5, 98.8, 99.2),
            (99.2, 101.5, 99.1, 101.2),
        ]);
        let features = compute_features(&bars, 14, 30);
        let zone = test_zone(ZoneSide::Support, 100.0, 101.0);
        let found = find_sweeps(&bars, &features, &zone, 0, 2);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, PatternKind::Spring);
        assert_eq!(found[0].sweep_index, 1);
        assert_eq!(found[0].reclaim_index, 3);
        assert_eq!(found[0].extreme, 98.5);
        assert!((found[0].depth() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_reclaim_too_late_is_not_spring() {
        let bars = bars_from(&[
            (101.0, 101.5, 100.5, 101.0),
            (101.0, 101.2, 98.5, 99.0),
            (99.0, 99.5, 98.8, 99.2),
            (99.2, 99.6, 98.9, 99.3),
            (100.2, 101.5, 100.1, 101.2),
        ]);
        let features = compute_features(&bars, 14, 30);
        let zone = test_zone(ZoneSide::Support, 100.0, 101.0);
        assert!(find_sweeps(&bars, &features, &zone, 0, 2).is_empty());
    }

    #[test]
    fn test_wick_above_resistance_is_upthrust() {
        let bars = bars_from(&[(109.0, 109.5, 108.5, 109.2), (109.2, 111.0, 109.0, 109.4)]);
        let features = compute_features(&bars, 14, 30);
        let zone = test_zone(ZoneSide::Resistance, 109.5, 110.0);
        let found = find_sweeps(&bars, &features, &zone, 0, 2);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, PatternKind::Upthrust);
        assert_eq!(found[0].sweep_index, 1);
        assert_eq!(found[0].reclaim_index, 1);
        assert!(found[0].wick_ratio > 0.5);
    }

    #[test]
    fn test_start_skips_older_sweeps() {
        let bars = bars_from(&[(101.0, 101.2, 99.0, 100.8), (100.8, 101.0, 100.2, 100.5)]);
        let features = compute_features(&bars, 14, 30);
        let zone = test_zone(ZoneSide::Support, 100.0, 101.0);
        assert_eq!(find_sweeps(&bars, &features, &zone, 0, 2).len(), 1);
        assert!(find_sweeps(&bars, &features, &zone, 1, 2).is_empty());
    }
}
