//! Fractal swing point detection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bars::Bar;

/// A confirmed local extreme
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    pub time: DateTime<Utc>,
    pub is_high: bool,
}

/// Detect swing highs and lows of order `n`.
///
/// Bar i is a swing high when its high is the maximum of `[i-n, i+n]`:
/// strictly above every high to its left and not below any high to its
/// right, so a flat top produces a single swing at its first bar. Lows are
/// symmetric. The last `n` bars lack the lookahead and are never swings.
/// Output is chronological; a bar that is both a high and a low yields the
/// high first.
pub fn detect_swings(bars: &[Bar], n: usize) -> Vec<SwingPoint> {
    let mut swings = Vec::new();
    if n == 0 || bars.len() < 2 * n + 1 {
        return swings;
    }

    for i in n..bars.len() - n {
        let bar = &bars[i];
        let left = &bars[i - n..i];
        let right = &bars[i + 1..=i + n];

        let is_high = left.iter().all(|b| b.h < bar.h) && right.iter().all(|b| b.h <= bar.h);
        let is_low = left.iter().all(|b| b.l > bar.l) && right.iter().all(|b| b.l >= bar.l);

        if is_high {
            swings.push(SwingPoint {
                index: i,
                price: bar.h,
                time: bar.t,
                is_high: true,
            });
        }
        if is_low {
            swings.push(SwingPoint {
                index: i,
                price: bar.l,
                time: bar.t,
                is_high: false,
            });
        }
    }

    swings
}
