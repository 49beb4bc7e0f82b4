//! Regime classification from recent swing geometry

use serde::{Deserialize, Serialize};

use super::swings::SwingPoint;

/// Market regime label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Uptrend,
    Downtrend,
    Range,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Uptrend => write!(f, "uptrend"),
            Regime::Downtrend => write!(f, "downtrend"),
            Regime::Range => write!(f, "range"),
        }
    }
}

/// Regime with its confidence in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub regime: Regime,
    pub confidence: f64,
}

impl MarketState {
    /// Undecided: range at 0.5, used for ties and missing structure
    pub fn undecided() -> Self {
        Self {
            regime: Regime::Range,
            confidence: 0.5,
        }
    }
}

/// Counts of swing-to-swing comparisons in the lookback window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwingVotes {
    pub higher_highs: u32,
    pub lower_highs: u32,
    pub higher_lows: u32,
    pub lower_lows: u32,
    pub comparisons: u32,
}

impl SwingVotes {
    pub fn up_fraction(&self) -> f64 {
        if self.comparisons == 0 {
            return 0.0;
        }
        (self.higher_highs + self.higher_lows) as f64 / self.comparisons as f64
    }

    pub fn down_fraction(&self) -> f64 {
        if self.comparisons == 0 {
            return 0.0;
        }
        (self.lower_highs + self.lower_lows) as f64 / self.comparisons as f64
    }
}

/// Compare each swing high with the previous swing high and each swing low
/// with the previous swing low, over the last `lookback` swings.
pub fn count_swing_votes(swings: &[SwingPoint], lookback: usize) -> SwingVotes {
    let start = swings.len().saturating_sub(lookback);
    let window = &swings[start..];
    let mut votes = SwingVotes::default();

    let mut prev_high: Option<f64> = None;
    let mut prev_low: Option<f64> = None;

    for swing in window {
        let prev = if swing.is_high { &mut prev_high } else { &mut prev_low };
        if let Some(p) = *prev {
            votes.comparisons += 1;
            match (swing.is_high, swing.price > p, swing.price < p) {
                (true, true, _) => votes.higher_highs += 1,
                (true, _, true) => votes.lower_highs += 1,
                (false, true, _) => votes.higher_lows += 1,
                (false, _, true) => votes.lower_lows += 1,
                _ => {} // equal: counted, votes for neither side
            }
        }
        *prev = Some(swing.price);
    }

    votes
}

/// Label the regime. A direction needs `threshold` consistency and must
/// beat the other; otherwise the result is range. Ties are always range 0.5.
pub fn classify_regime(swings: &[SwingPoint], lookback: usize, threshold: f64) -> MarketState {
    let votes = count_swing_votes(swings, lookback);
    let up = votes.up_fraction();
    let down = votes.down_fraction();

    if (up - down).abs() <= f64::EPSILON {
        return MarketState::undecided();
    }

    if up >= threshold && up > down {
        MarketState {
            regime: Regime::Uptrend,
            confidence: up.clamp(0.0, 1.0),
        }
    } else if down >= threshold && down > up {
        MarketState {
            regime: Regime::Downtrend,
            confidence: down.clamp(0.0, 1.0),
        }
    } else {
        MarketState {
            regime: Regime::Range,
            confidence: (1.0 - up.max(down)).clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::swings::detect_swings;
    use crate::analysis::test_support::{bars_from_closes, staircase_up_closes};
    use chrono::Utc;

    fn swing(index: usize, price: f64, is_high: bool) -> SwingPoint {
        SwingPoint {
            index,
            price,
            time: Utc::now(),
            is_high,
        }
    }

    #[test]
    fn test_strict_uptrend_swings() {
        let swings = vec![
            swing(1, 10.0, true),
            swing(2, 8.0, false),
            swing(3, 12.0, true),
            swing(4, 9.0, false),
            swing(5, 14.0, true),
            swing(6, 10.0, false),
        ];
        let state = classify_regime(&swings, 8, 0.7);
        assert_eq!(state.regime, Regime::Uptrend);
        assert_eq!(state.confidence, 1.0);
    }

    #[test]
    fn test_downtrend() {
        let swings = vec![
            swing(1, 14.0, true),
            swing(2, 10.0, false),
            swing(3, 12.0, true),
            swing(4, 8.0, false),
            swing(5, 11.0, true),
            swing(6, 7.0, false),
        ];
        let state = classify_regime(&swings, 8, 0.7);
        assert_eq!(state.regime, Regime::Downtrend);
        assert!(state.confidence >= 0.7);
    }

    #[test]
    fn test_tie_resolves_to_range_half() {
        // HH + LL: one vote each way
        let swings = vec![
            swing(1, 10.0, true),
            swing(2, 8.0, false),
            swing(3, 12.0, true),
            swing(4, 6.0, false),
        ];
        assert_eq!(classify_regime(&swings, 8, 0.7), MarketState::undecided());
    }

    #[test]
    fn test_no_swings_is_undecided() {
        assert_eq!(classify_regime(&[], 8, 0.7), MarketState::undecided());
    }

    #[test]
    fn test_mixed_structure_is_range() {
        let swings = vec![
            swing(1, 10.0, true),
            swing(2, 8.0, false),
            swing(3, 11.0, true),
            swing(4, 7.0, false),
            swing(5, 12.0, true),
            swing(6, 9.0, false),
        ];
        // HH, LL, HH, HL -> up 0.75 passes; drop one HH to fall under threshold
        let state = classify_regime(&swings[..5], 8, 0.7);
        assert_eq!(state.regime, Regime::Range);
        assert!((0.0..=1.0).contains(&state.confidence));
    }

    #[test]
    fn test_staircase_bars_classify_as_uptrend() {
        let bars = bars_from_closes(&staircase_up_closes());
        assert!(bars.len() >= 20);
        let swings = detect_swings(&bars, 2);
        let state = classify_regime(&swings, 8, 0.7);
        assert_eq!(state.regime, Regime::Uptrend);
        assert!(state.confidence >= 0.7);
    }
}
