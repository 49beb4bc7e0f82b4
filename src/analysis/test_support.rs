//! Synthetic bar series shared by the analysis tests

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use uuid::Uuid;

use super::zones::{Zone, ZoneId, ZoneOrigin, ZoneSide};
use crate::bars::Bar;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 13, 30, 0).unwrap()
}

/// Timestamp of the i-th 5-minute bar
pub fn time_at(i: usize) -> DateTime<Utc> {
    base_time() + Duration::minutes(5 * i as i64)
}

pub fn flat_bar(i: usize, price: f64, volume: Option<f64>) -> Bar {
    Bar::new(time_at(i), price, price, price, price, volume)
}

/// Bars from (open, high, low, close) tuples, volume 1000
pub fn bars_from(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    ohlc.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Bar::new(time_at(i), o, h, l, c, Some(1000.0)))
        .collect()
}

/// Doji-like bars around each close: open = close, range 0.5
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar::new(time_at(i), c, c + 0.25, c - 0.25, c, Some(1000.0)))
        .collect()
}

/// Bar that opens at `open` and closes at `close` with 0.2 wicks both ways
pub fn trend_bar(i: usize, open: f64, close: f64, volume: Option<f64>) -> Bar {
    Bar::new(time_at(i), open, open.max(close) + 0.2, open.min(close) - 0.2, close, volume)
}

/// Triangle wave between `lo` and `hi`: 6 bars up, 6 bars down, starting at
/// `lo`. Swing lows sit at `lo - 0.2`, swing highs at `hi + 0.2`.
pub fn range_bound_bars(n: usize, lo: f64, hi: f64) -> Vec<Bar> {
    let step = (hi - lo) / 6.0;
    let mut bars = Vec::with_capacity(n);
    let mut prev_close = lo;

    for i in 0..n {
        let phase = i % 12;
        let steps = if phase <= 6 { phase } else { 12 - phase };
        let close = lo + steps as f64 * step;
        bars.push(trend_bar(i, prev_close, close, Some(1000.0)));
        prev_close = close;
    }

    bars
}

/// Zigzag of rising peaks and troughs (up 3, down 2)
pub fn staircase_up_closes() -> Vec<f64> {
    vec![
        10.0, 11.0, 12.0, 13.0, 12.0, 11.0, 12.0, 13.0, 14.0, 15.0, 14.0, 13.0, 14.0, 15.0, 16.0,
        17.0, 16.0, 15.0, 16.0, 17.0, 18.0, 19.0, 18.0, 17.0, 18.0, 19.0,
    ]
}

/// 25 quiet bars around 106, then two closes above 110 carrying
/// `rvol` times the quiet volume (`None` = no volume on those bars)
pub fn breakout_bars(rvol: Option<f64>) -> Vec<Bar> {
    let mut bars: Vec<Bar> = (0..25)
        .map(|i| {
            let c = if i % 2 == 0 { 106.0 } else { 106.3 };
            Bar::new(time_at(i), c, c + 0.5, c - 0.5, c, Some(1000.0))
        })
        .collect();

    let volume = rvol.map(|r| r * 1000.0);
    let open = bars[24].c;
    bars.push(Bar::new(time_at(25), open, 110.8, open - 0.1, 110.6, volume));
    bars.push(Bar::new(time_at(26), 110.6, 111.6, 110.5, 111.4, volume));
    bars
}

/// Range 100-110 that ends with a close below support and a reclaim on
/// heavy volume
pub fn shakeout_bars() -> Vec<Bar> {
    let mut bars = range_bound_bars(60, 100.0, 110.0);
    let open = bars[59].c;
    bars.push(Bar::new(time_at(60), open, open + 0.1, 97.9, 98.2, Some(2500.0)));
    bars.push(Bar::new(time_at(61), 98.2, 101.1, 98.0, 100.9, Some(2600.0)));
    bars
}

/// Range 100-110 that ends with two closes above resistance
pub fn range_breakout_bars(rvol: Option<f64>) -> Vec<Bar> {
    let mut bars = range_bound_bars(55, 100.0, 110.0);
    let volume = rvol.map(|r| r * 1000.0);
    bars.push(Bar::new(time_at(55), 110.0, 111.8, 109.9, 111.6, volume));
    bars.push(Bar::new(time_at(56), 111.6, 113.4, 111.5, 113.2, volume));
    bars
}

/// Random walk with occasional missing volume and session gaps
pub fn random_bars(rng: &mut StdRng, n: usize) -> Vec<Bar> {
    let mut bars = Vec::with_capacity(n);
    let mut price: f64 = rng.gen_range(20.0..500.0);
    let mut t = base_time();

    for _ in 0..n {
        let step = rng.gen_range(1..=3) * 5;
        t += Duration::minutes(if rng.gen_bool(0.9) { 5 } else { step });
        let open = price;
        let close = (open + rng.gen_range(-1.0..1.0) * open * 0.004).max(0.01);
        let high = open.max(close) + rng.gen_range(0.0..0.002) * open;
        let low = (open.min(close) - rng.gen_range(0.0..0.002) * open).max(0.001);
        let volume = if rng.gen_bool(0.1) {
            None
        } else {
            Some(rng.gen_range(100.0..5000.0))
        };
        bars.push(Bar::new(t, open, high, low, close, volume));
        price = close;
    }

    bars
}

/// Hand-placed zone for state machine tests
pub fn test_zone(side: ZoneSide, low: f64, high: f64) -> Zone {
    let name = format!("test|{}|{}", side, low);
    Zone {
        id: ZoneId(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())),
        side,
        origin: ZoneOrigin::Swing { seeds: 2 },
        low,
        high,
        score: 0.5,
        touches: 2,
        rejections: 1,
        last_reaction: 1.0,
        avg_reaction: 1.0,
        last_test_time: None,
        last_test_index: None,
    }
}
