//! Feature layer: ATR, relative volume, wick ratios, effort/result
//!
//! Every later stage reads these values; nothing here has side effects.

use serde::{Deserialize, Serialize};

use crate::bars::Bar;

/// Relative volume. `None` means unknown: the bar has no usable volume or
/// there is no volume history to compare against. Unknown is a first-class
/// value that disables every volume-gated confirmation downstream.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rvol(pub Option<f64>);

impl Rvol {
    pub const UNKNOWN: Rvol = Rvol(None);

    pub fn value(&self) -> Option<f64> {
        self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_none()
    }

    /// `Some(true)` if known and at least `threshold`, `None` if unknown
    pub fn at_least(&self, threshold: f64) -> Option<bool> {
        self.0.map(|v| v >= threshold)
    }

    /// Known value, or 0.0 for scoring terms that treat unknown as "no signal"
    pub fn or_zero(&self) -> f64 {
        self.0.unwrap_or(0.0)
    }
}

/// Per-bar features
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarFeatures {
    pub true_range: f64,
    pub atr: f64,
    pub rvol: Rvol,
    pub body_ratio: f64,
    pub upper_wick_ratio: f64,
    pub lower_wick_ratio: f64,
}

impl BarFeatures {
    /// Result: true range in ATR units
    pub fn result(&self) -> f64 {
        if self.atr > 0.0 {
            self.true_range / self.atr
        } else {
            0.0
        }
    }
}

/// Features for a whole bar window, index-aligned with the bars
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub bars: Vec<BarFeatures>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&BarFeatures> {
        self.bars.get(idx)
    }

    /// ATR of the last bar, 0.0 for an empty window
    pub fn latest_atr(&self) -> f64 {
        self.bars.last().map(|f| f.atr).unwrap_or(0.0)
    }

    /// Number of bars in `[start, end)` whose RVOL is unknown
    pub fn unknown_volume_count(&self, start: usize, end: usize) -> usize {
        let end = end.min(self.bars.len());
        if start >= end {
            return 0;
        }
        self.bars[start..end].iter().filter(|f| f.rvol.is_unknown()).count()
    }
}

/// Calculate true range per bar; the first bar falls back to high-low
pub fn true_ranges(bars: &[Bar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    let mut prev_close: Option<f64> = None;

    for bar in bars {
        let tr = match prev_close {
            Some(pc) => bar
                .range()
                .max((bar.h - pc).abs())
                .max((bar.l - pc).abs()),
            None => bar.range(),
        };
        out.push(tr);
        prev_close = Some(bar.c);
    }

    out
}

/// Wilder ATR seeded with the simple mean of the first `period` true
/// ranges. Before `period` bars exist the running mean is used.
pub fn average_true_range(true_ranges: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(true_ranges.len());
    if period == 0 {
        return vec![0.0; true_ranges.len()];
    }

    let mut running_sum = 0.0;
    let mut atr = 0.0;
    let p = period as f64;

    for (i, &tr) in true_ranges.iter().enumerate() {
        if i < period {
            running_sum += tr;
            atr = running_sum / (i + 1) as f64;
        } else {
            atr = (atr * (p - 1.0) + tr) / p;
        }
        out.push(atr);
    }

    out
}

/// RVOL = volume / mean(known volumes of the previous `window` bars)
pub fn relative_volumes(bars: &[Bar], window: usize) -> Vec<Rvol> {
    let mut out = Vec::with_capacity(bars.len());

    for (i, bar) in bars.iter().enumerate() {
        let Some(volume) = bar.known_volume() else {
            out.push(Rvol::UNKNOWN);
            continue;
        };

        let start = i.saturating_sub(window);
        let (sum, count) = bars[start..i]
            .iter()
            .filter_map(|b| b.known_volume())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));

        if count == 0 || sum <= 0.0 {
            out.push(Rvol::UNKNOWN);
            continue;
        }

        out.push(Rvol(Some(volume / (sum / count as f64))));
    }

    out
}

/// Body, upper wick and lower wick as fractions of the bar range
pub fn candle_ratios(bar: &Bar) -> (f64, f64, f64) {
    let range = bar.range();
    if range <= 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let body = (bar.c - bar.o).abs() / range;
    let upper = (bar.h - bar.body_high()) / range;
    let lower = (bar.body_low() - bar.l) / range;
    (body, upper, lower)
}

/// ATR the structural stages measure distances in: the latest ATR, or 0.1%
/// of the last close when the window has no range at all.
pub fn reference_atr(bars: &[Bar], features: &FeatureSet) -> f64 {
    let atr = features.latest_atr();
    if atr > 0.0 {
        return atr;
    }
    match bars.last() {
        Some(bar) if bar.c.abs() > 0.0 => bar.c.abs() * 0.001,
        _ => f64::EPSILON,
    }
}

/// Compute the full feature set for a bar window
pub fn compute_features(bars: &[Bar], atr_period: usize, rvol_window: usize) -> FeatureSet {
    let trs = true_ranges(bars);
    let atrs = average_true_range(&trs, atr_period);
    let rvols = relative_volumes(bars, rvol_window);

    let features = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let (body_ratio, upper_wick_ratio, lower_wick_ratio) = candle_ratios(bar);
            BarFeatures {
                true_range: trs[i],
                atr: atrs[i],
                rvol: rvols[i],
                body_ratio,
                upper_wick_ratio,
                lower_wick_ratio,
            }
        })
        .collect();

    FeatureSet { bars: features }
}
