//! Support/resistance zone engine
//!
//! Swing lows seed support, swing highs seed resistance. Candidates are
//! clustered into ATR-width bins, each cluster becomes a padded price band,
//! and every band is scored from how price has interacted with it.
//! A zone set is rebuilt from scratch every cycle and never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;
use uuid::Uuid;

use super::features::FeatureSet;
use super::swings::SwingPoint;
use crate::bars::Bar;
use crate::config::EngineConfig;

/// Stable zone identifier: UUID v5 of the zone's side and its seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub Uuid);

impl ZoneId {
    fn derive(side: ZoneSide, seed: &str) -> Self {
        let name = format!("{}|{}", side, seed);
        ZoneId(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneSide {
    Support,
    Resistance,
}

impl std::fmt::Display for ZoneSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneSide::Support => write!(f, "support"),
            ZoneSide::Resistance => write!(f, "resistance"),
        }
    }
}

/// Externally computed extended-hours reference level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EhLevel {
    YesterdayClose,
    YesterdayHigh,
    YesterdayLow,
    PremarketHigh,
    PremarketLow,
    AfterhoursHigh,
    AfterhoursLow,
}

impl std::fmt::Display for EhLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EhLevel::YesterdayClose => write!(f, "YC"),
            EhLevel::YesterdayHigh => write!(f, "YH"),
            EhLevel::YesterdayLow => write!(f, "YL"),
            EhLevel::PremarketHigh => write!(f, "PMH"),
            EhLevel::PremarketLow => write!(f, "PML"),
            EhLevel::AfterhoursHigh => write!(f, "AHH"),
            EhLevel::AfterhoursLow => write!(f, "AHL"),
        }
    }
}

/// Extended-hours context injected by the caller as pre-seeded zones
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtendedHoursLevels {
    pub yesterday_close: Option<f64>,
    pub yesterday_high: Option<f64>,
    pub yesterday_low: Option<f64>,
    pub premarket_high: Option<f64>,
    pub premarket_low: Option<f64>,
    pub afterhours_high: Option<f64>,
    pub afterhours_low: Option<f64>,
}

impl ExtendedHoursLevels {
    /// Present, finite levels in a fixed order
    pub fn levels(&self) -> Vec<(EhLevel, f64)> {
        [
            (EhLevel::YesterdayClose, self.yesterday_close),
            (EhLevel::YesterdayHigh, self.yesterday_high),
            (EhLevel::YesterdayLow, self.yesterday_low),
            (EhLevel::PremarketHigh, self.premarket_high),
            (EhLevel::PremarketLow, self.premarket_low),
            (EhLevel::AfterhoursHigh, self.afterhours_high),
            (EhLevel::AfterhoursLow, self.afterhours_low),
        ]
        .into_iter()
        .filter_map(|(kind, price)| price.filter(|p| p.is_finite()).map(|p| (kind, p)))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZoneOrigin {
    /// Clustered from `seeds` swing points
    Swing { seeds: usize },
    /// Injected extended-hours level
    ExtendedHours { level: EhLevel },
}

/// A scored support or resistance band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub side: ZoneSide,
    pub origin: ZoneOrigin,
    pub low: f64,
    pub high: f64,
    pub score: f64,
    pub touches: u32,
    pub rejections: u32,
    /// Reaction of the most recent rejection, in ATR units
    pub last_reaction: f64,
    /// Mean reaction over all rejections, in ATR units
    pub avg_reaction: f64,
    pub last_test_time: Option<DateTime<Utc>>,
    pub last_test_index: Option<usize>,
}

impl Zone {
    pub fn mid(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }

    /// Bar range intersects the band
    pub fn is_touched_by(&self, bar: &Bar) -> bool {
        bar.l <= self.high && bar.h >= self.low
    }

    /// Distance from a price to the band, 0 inside it
    pub fn distance_to(&self, price: f64) -> f64 {
        if price < self.low {
            self.low - price
        } else if price > self.high {
            price - self.high
        } else {
            0.0
        }
    }

    /// The boundary a breakout of this zone crosses
    pub fn breakout_level(&self) -> f64 {
        match self.side {
            ZoneSide::Support => self.low,
            ZoneSide::Resistance => self.high,
        }
    }
}

/// Zones of one analysis cycle, each side sorted best first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneSet {
    pub support: Vec<Zone>,
    pub resistance: Vec<Zone>,
}

impl ZoneSet {
    pub fn is_empty(&self) -> bool {
        self.support.is_empty() && self.resistance.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &Zone> {
        self.support.iter().chain(self.resistance.iter())
    }

    pub fn get(&self, id: &ZoneId) -> Option<&Zone> {
        self.all().find(|z| &z.id == id)
    }

    /// Closest support band at or below `price`
    pub fn nearest_support(&self, price: f64) -> Option<&Zone> {
        self.support
            .iter()
            .filter(|z| z.low <= price)
            .min_by(|a, b| cmp_f64(a.distance_to(price), b.distance_to(price)))
    }

    /// Closest resistance band at or above `price`
    pub fn nearest_resistance(&self, price: f64) -> Option<&Zone> {
        self.resistance
            .iter()
            .filter(|z| z.high >= price)
            .min_by(|a, b| cmp_f64(a.distance_to(price), b.distance_to(price)))
    }

    /// Next support strictly below `price` (for breakdown targets)
    pub fn support_below(&self, price: f64) -> Option<&Zone> {
        self.support
            .iter()
            .filter(|z| z.high < price)
            .min_by(|a, b| cmp_f64(a.distance_to(price), b.distance_to(price)))
    }

    /// Next resistance strictly above `price` (for breakout targets)
    pub fn resistance_above(&self, price: f64) -> Option<&Zone> {
        self.resistance
            .iter()
            .filter(|z| z.low > price)
            .min_by(|a, b| cmp_f64(a.distance_to(price), b.distance_to(price)))
    }

    /// Deterministic digest of the zone layout, used to notice zone-set changes
    pub fn fingerprint(&self) -> String {
        let layout: Vec<String> = self
            .all()
            .map(|z| format!("{}:{:.4}:{:.4}", z.id, z.low, z.high))
            .collect();
        Uuid::new_v5(&Uuid::NAMESPACE_OID, layout.join(";").as_bytes()).to_string()
    }
}

pub(crate) fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Interaction statistics of one band over the bar window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ZoneStats {
    touches: u32,
    rejections: u32,
    last_reaction: f64,
    avg_reaction: f64,
    last_test_index: Option<usize>,
}

/// Count tests (runs of consecutive touching bars), rejections (tests whose
/// last bar closes beyond the band on the defended side) and the reaction
/// after each rejection.
fn measure_band(
    bars: &[Bar],
    features: &FeatureSet,
    side: ZoneSide,
    low: f64,
    high: f64,
    atr_fallback: f64,
    lookahead: usize,
) -> ZoneStats {
    let touching = |b: &Bar| b.l <= high && b.h >= low;
    let mut stats = ZoneStats::default();
    let mut reactions = Vec::new();

    let mut i = 0;
    while i < bars.len() {
        if !touching(&bars[i]) {
            i += 1;
            continue;
        }
        while i + 1 < bars.len() && touching(&bars[i + 1]) {
            i += 1;
        }
        let end = i;
        stats.touches += 1;
        stats.last_test_index = Some(end);

        let close = bars[end].c;
        let rejected = match side {
            ZoneSide::Support => close > high,
            ZoneSide::Resistance => close < low,
        };

        if rejected {
            stats.rejections += 1;
            let window_end = (end + lookahead).min(bars.len() - 1);
            let excursion = bars[end..=window_end]
                .iter()
                .map(|b| match side {
                    ZoneSide::Support => b.h - high,
                    ZoneSide::Resistance => low - b.l,
                })
                .fold(0.0_f64, f64::max);
            let atr = features
                .get(end)
                .map(|f| f.atr)
                .filter(|a| *a > 0.0)
                .unwrap_or(atr_fallback);
            reactions.push(excursion / atr);
        }

        i += 1;
    }

    if let Some(last) = reactions.last() {
        stats.last_reaction = *last;
        stats.avg_reaction = reactions.iter().sum::<f64>() / reactions.len() as f64;
    }

    stats
}

/// Greedy clustering of sorted prices into bins anchored at each bin's lowest price
fn cluster_swings<'a>(mut points: Vec<&'a SwingPoint>, bin_width: f64) -> Vec<Vec<&'a SwingPoint>> {
    points.sort_by(|a, b| cmp_f64(a.price, b.price).then(a.index.cmp(&b.index)));

    let mut clusters: Vec<Vec<&SwingPoint>> = Vec::new();
    for point in points {
        match clusters.last_mut() {
            Some(cluster) if point.price - cluster[0].price <= bin_width => cluster.push(point),
            _ => clusters.push(vec![point]),
        }
    }
    clusters
}

/// Min-max normalize; a degenerate factor maps to 1.0 if positive, else 0.0
fn normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if values.is_empty() {
        return Vec::new();
    }
    if (max - min).abs() <= f64::EPSILON {
        let v = if max > 0.0 { 1.0 } else { 0.0 };
        return vec![v; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

/// Build the zone set for one cycle
pub fn build_zones(
    bars: &[Bar],
    features: &FeatureSet,
    swings: &[SwingPoint],
    extended_hours: Option<&ExtendedHoursLevels>,
    atr: f64,
    config: &EngineConfig,
) -> ZoneSet {
    let Some(last_bar) = bars.last() else {
        return ZoneSet::default();
    };
    let last_idx = bars.len() - 1;
    let bin_width = config.zone_bin_atr * atr;
    let pad = config.zone_pad_atr * atr;

    let mut zones: Vec<Zone> = Vec::new();

    for side in [ZoneSide::Support, ZoneSide::Resistance] {
        let candidates: Vec<&SwingPoint> = swings
            .iter()
            .filter(|s| s.is_high == (side == ZoneSide::Resistance))
            .collect();

        for cluster in cluster_swings(candidates, bin_width) {
            let lo = cluster.iter().map(|s| s.price).fold(f64::INFINITY, f64::min);
            let hi = cluster.iter().map(|s| s.price).fold(f64::NEG_INFINITY, f64::max);
            let seed_time = cluster.iter().map(|s| s.time).min().unwrap_or(last_bar.t);
            let (low, high) = (lo - pad, hi + pad);

            zones.push(new_zone(
                ZoneId::derive(side, &seed_time.to_rfc3339()),
                side,
                ZoneOrigin::Swing { seeds: cluster.len() },
                low,
                high,
                measure_band(bars, features, side, low, high, atr, config.reaction_lookahead),
                bars,
            ));
        }
    }

    if let Some(eh) = extended_hours {
        for (level, price) in eh.levels() {
            let side = if price <= last_bar.c {
                ZoneSide::Support
            } else {
                ZoneSide::Resistance
            };
            let (low, high) = (price - pad, price + pad);
            zones.push(new_zone(
                ZoneId::derive(side, &level.to_string()),
                side,
                ZoneOrigin::ExtendedHours { level },
                low,
                high,
                measure_band(bars, features, side, low, high, atr, config.reaction_lookahead),
                bars,
            ));
        }
    }

    score_zones(&mut zones, last_idx, config);

    let last_close = last_bar.c;
    zones.sort_by(|a, b| {
        cmp_f64(b.score, a.score)
            .then(b.touches.cmp(&a.touches))
            .then(cmp_f64(a.distance_to(last_close), b.distance_to(last_close)))
            .then(cmp_f64(a.low, b.low))
            .then(a.id.cmp(&b.id))
    });

    let mut set = ZoneSet::default();
    for zone in zones {
        let side_list = match zone.side {
            ZoneSide::Support => &mut set.support,
            ZoneSide::Resistance => &mut set.resistance,
        };
        if side_list.len() < config.zones_per_side {
            side_list.push(zone);
        }
    }

    debug!(
        "Built {} support / {} resistance zones (atr={:.4}, bin={:.4})",
        set.support.len(),
        set.resistance.len(),
        atr,
        bin_width
    );

    set
}

fn new_zone(
    id: ZoneId,
    side: ZoneSide,
    origin: ZoneOrigin,
    low: f64,
    high: f64,
    stats: ZoneStats,
    bars: &[Bar],
) -> Zone {
    Zone {
        id,
        side,
        origin,
        low,
        high,
        score: 0.0,
        touches: stats.touches,
        rejections: stats.rejections,
        last_reaction: stats.last_reaction,
        avg_reaction: stats.avg_reaction,
        last_test_time: stats.last_test_index.map(|i| bars[i].t),
        last_test_index: stats.last_test_index,
    }
}

/// Weighted sum of the four min-max normalized factors, bounded to [0, 1]
fn score_zones(zones: &mut [Zone], last_idx: usize, config: &EngineConfig) {
    if zones.is_empty() {
        return;
    }

    let recency = |z: &Zone| match z.last_test_index {
        Some(idx) => 0.5_f64.powf((last_idx - idx) as f64 / config.recency_half_life_bars),
        None => 0.0,
    };

    let tests = normalize(&zones.iter().map(|z| z.touches as f64).collect::<Vec<_>>());
    let rejections = normalize(&zones.iter().map(|z| z.rejections as f64).collect::<Vec<_>>());
    let reactions = normalize(&zones.iter().map(|z| z.avg_reaction).collect::<Vec<_>>());
    let recencies = normalize(&zones.iter().map(recency).collect::<Vec<_>>());

    let w = &config.zone_weights;
    let weight_sum = w.tests + w.rejections + w.reaction + w.recency;

    for (i, zone) in zones.iter_mut().enumerate() {
        let raw = w.tests * tests[i]
            + w.rejections * rejections[i]
            + w.reaction * reactions[i]
            + w.recency * recencies[i];
        let mut score = (raw / weight_sum).clamp(0.0, 1.0);
        if matches!(zone.origin, ZoneOrigin::ExtendedHours { .. }) {
            score = score.max(config.eh_zone_floor);
        }
        zone.score = score;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::{compute_features, reference_atr};
    use crate::analysis::swings::detect_swings;
    use crate::analysis::test_support::{bars_from_closes, range_bound_bars};

    fn zones_for(bars: &[Bar], config: &EngineConfig) -> ZoneSet {
        let features = compute_features(bars, config.atr_period, config.rvol_window);
        let swings = detect_swings(bars, config.swing_order);
        let atr = reference_atr(bars, &features);
        build_zones(bars, &features, &swings, None, atr, config)
    }

    #[test]
    fn test_range_produces_both_sides() {
        let config = EngineConfig::default();
        let bars = range_bound_bars(60, 100.0, 110.0);
        let set = zones_for(&bars, &config);
        assert!(!set.support.is_empty());
        assert!(!set.resistance.is_empty());
        let support = &set.support[0];
        assert!(support.contains(100.0) || support.distance_to(100.0) < 2.0);
        assert!(set.resistance[0].high >= 110.0);
    }

    #[test]
    fn test_scores_bounded_and_sorted() {
        let config = EngineConfig::default();
        let bars = range_bound_bars(80, 50.0, 58.0);
        let set = zones_for(&bars, &config);
        for side in [&set.support, &set.resistance] {
            for zone in side.iter() {
                assert!((0.0..=1.0).contains(&zone.score));
                assert!(zone.low < zone.high);
            }
            for pair in side.windows(2) {
                assert!(pair[0].score >= pair[1].score);
            }
            assert!(side.len() <= config.zones_per_side);
        }
    }

    #[test]
    fn test_repeated_lows_cluster_into_one_zone() {
        let config = EngineConfig::default();
        let bars = range_bound_bars(60, 100.0, 110.0);
        let set = zones_for(&bars, &config);
        let near_floor: Vec<_> = set.support.iter().filter(|z| z.contains(100.0)).collect();
        assert_eq!(near_floor.len(), 1);
        assert!(near_floor[0].touches >= 3);
        assert!(near_floor[0].rejections >= 2);
    }

    #[test]
    fn test_extended_hours_zone_floor() {
        let config = EngineConfig::default();
        let bars = range_bound_bars(60, 100.0, 110.0);
        let features = compute_features(&bars, config.atr_period, config.rvol_window);
        let swings = detect_swings(&bars, config.swing_order);
        let atr = reference_atr(&bars, &features);
        let eh = ExtendedHoursLevels {
            premarket_high: Some(125.0),
            ..Default::default()
        };
        let set = build_zones(&bars, &features, &swings, Some(&eh), atr, &config);
        let injected = set
            .resistance
            .iter()
            .find(|z| matches!(z.origin, ZoneOrigin::ExtendedHours { level: EhLevel::PremarketHigh }))
            .expect("premarket high should be kept as resistance");
        assert!(injected.score >= config.eh_zone_floor);
        assert!(injected.contains(125.0));
    }

    #[test]
    fn test_zone_ids_stable_across_runs() {
        let config = EngineConfig::default();
        let bars = range_bound_bars(60, 100.0, 110.0);
        let a = zones_for(&bars, &config);
        let b = zones_for(&bars, &config);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_no_swings_no_zones() {
        let config = EngineConfig::default();
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert!(zones_for(&bars, &config).is_empty());
    }

    #[test]
    fn test_normalize_degenerate() {
        assert_eq!(normalize(&[2.0, 2.0]), vec![1.0, 1.0]);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
        assert_eq!(normalize(&[1.0, 3.0]), vec![0.0, 1.0]);
    }
}
