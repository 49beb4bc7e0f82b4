//! Engine configuration
//!
//! All thresholds and weights are fixed heuristic defaults. They are
//! overridable per call but never fit from data.

use serde::{Deserialize, Serialize};

use crate::bars::Timeframe;
use crate::error::{EngineError, EngineResult};

/// Weights of the four zone-strength factors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneWeights {
    pub tests: f64,
    pub rejections: f64,
    pub reaction: f64,
    pub recency: f64,
}

impl Default for ZoneWeights {
    fn default() -> Self {
        Self {
            tests: 0.3,
            rejections: 0.3,
            reaction: 0.2,
            recency: 0.2,
        }
    }
}

/// Term weights of the five behavior scores.
///
/// Markup/markdown use fewer terms than accumulation/distribution; that
/// asymmetry is intentional and kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorWeights {
    // shakeout
    pub sweep_below_support: f64,
    pub reclaim: f64,
    pub lower_wick: f64,
    pub rvol: f64,
    // accumulation
    pub range_regime: f64,
    pub near_support: f64,
    pub volume_dry_up: f64,
    pub higher_low: f64,
    // distribution
    pub near_resistance: f64,
    pub upthrust: f64,
    pub upper_wick: f64,
    // markup / markdown
    pub trend_confidence: f64,
    pub breakout_confirmed: f64,
}

impl Default for BehaviorWeights {
    fn default() -> Self {
        Self {
            sweep_below_support: 1.0,
            reclaim: 1.0,
            lower_wick: 1.0,
            rvol: 1.0,
            range_regime: 1.0,
            near_support: 1.0,
            volume_dry_up: 1.0,
            higher_low: 1.0,
            near_resistance: 1.0,
            upthrust: 1.0,
            upper_wick: 1.0,
            trend_confidence: 1.0,
            breakout_confirmed: 1.0,
        }
    }
}

/// Configuration for one analysis call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // --- Feature layer ---
    /// ATR period (default: 14)
    pub atr_period: usize,
    /// Volume moving-average window for RVOL (30 intraday, 20 daily)
    pub rvol_window: usize,

    // --- Swings / regime ---
    /// Fractal order n: a swing must be the extreme of [i-n, i+n]
    pub swing_order: usize,
    /// Number of most recent swing points used by the regime classifier
    pub regime_lookback: usize,
    /// Directional consistency needed to call a trend (default: 0.7)
    pub regime_threshold: f64,

    // --- Zones ---
    /// Cluster bin width in ATR units (default: 0.5)
    pub zone_bin_atr: f64,
    /// Band padding on each side in ATR units (0.35 intraday, 0.5 daily)
    pub zone_pad_atr: f64,
    /// Zones kept per side (default: 5)
    pub zones_per_side: usize,
    pub zone_weights: ZoneWeights,
    /// Bars for the recency factor to halve (default: 20)
    pub recency_half_life_bars: f64,
    /// Bars after a rejection scanned for the reaction excursion (default: 5)
    pub reaction_lookahead: usize,
    /// Score floor for injected extended-hours zones (default: 0.6)
    pub eh_zone_floor: f64,

    // --- Breakout FSM ---
    /// RVOL needed to confirm a breakout (default: 1.8)
    pub rvol_confirm: f64,
    /// Result (TR/ATR) needed to confirm a breakout (default: 0.6)
    pub result_confirm: f64,
    /// Consecutive closes outside the zone needed to confirm (default: 2)
    pub confirm_closes: u32,
    /// Bars after an attempt during which a fakeout can be called (default: 3)
    pub fakeout_bars: u32,
    /// Bars after which an unconfirmed attempt returns to idle (default: 8)
    pub attempt_timeout_bars: u32,
    /// Result below which high effort counts as absorption (default: 0.5)
    pub absorption_result_max: f64,
    /// Wick share of the bar range that counts as a long wick (default: 0.5)
    pub long_wick_ratio: f64,
    /// Bars replayed from idle for a zone with no prior FSM state (default: 30)
    pub fsm_replay_bars: usize,

    // --- Behavior ---
    /// Bars scanned for behavior signals (default: 20)
    pub behavior_lookback: usize,
    /// Bars after a close below support within which a reclaim counts (default: 2)
    pub reclaim_bars: usize,
    /// Softmax temperature over min-max normalized scores (default: 0.25)
    pub softmax_temperature: f64,
    pub behavior_weights: BehaviorWeights,

    // --- Timeline ---
    /// Minimum |change| in the dominant probability for a hard event (default: 0.12)
    pub timeline_delta: f64,
    /// Distance in ATR units that counts as approaching a zone (default: 0.5)
    pub approach_atr: f64,
    /// RVOL that counts as a volume spike (default: 2.0)
    pub volume_spike_rvol: f64,
    /// RVOL that counts as a volume dry-up (default: 0.5)
    pub volume_dry_rvol: f64,

    // --- Data quality ---
    /// Multiple of the bar interval above which a step is a gap (default: 1.5)
    pub gap_multiplier: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            rvol_window: 30,
            swing_order: 3,
            regime_lookback: 8,
            regime_threshold: 0.7,
            zone_bin_atr: 0.5,
            zone_pad_atr: 0.35,
            zones_per_side: 5,
            zone_weights: ZoneWeights::default(),
            recency_half_life_bars: 20.0,
            reaction_lookahead: 5,
            eh_zone_floor: 0.6,
            rvol_confirm: 1.8,
            result_confirm: 0.6,
            confirm_closes: 2,
            fakeout_bars: 3,
            attempt_timeout_bars: 8,
            absorption_result_max: 0.5,
            long_wick_ratio: 0.5,
            fsm_replay_bars: 30,
            behavior_lookback: 20,
            reclaim_bars: 2,
            softmax_temperature: 0.25,
            behavior_weights: BehaviorWeights::default(),
            timeline_delta: 0.12,
            approach_atr: 0.5,
            volume_spike_rvol: 2.0,
            volume_dry_rvol: 0.5,
            gap_multiplier: 1.5,
        }
    }
}

impl EngineConfig {
    /// Defaults tuned per timeframe (swing order, RVOL window, zone padding)
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        match timeframe {
            Timeframe::M1 => Self {
                swing_order: 4,
                ..Default::default()
            },
            Timeframe::D1 => Self {
                swing_order: 2,
                rvol_window: 20,
                zone_pad_atr: 0.5,
                ..Default::default()
            },
            _ => Self::default(),
        }
    }

    /// Smallest bar count for a full (non-partial) report
    pub fn min_bars(&self) -> usize {
        self.swing_order * 2 + 1
    }

    /// Reject configurations that cannot produce a meaningful analysis
    pub fn validate(&self) -> EngineResult<()> {
        let positive_counts = [
            ("atr_period", self.atr_period),
            ("rvol_window", self.rvol_window),
            ("swing_order", self.swing_order),
            ("regime_lookback", self.regime_lookback),
            ("zones_per_side", self.zones_per_side),
            ("behavior_lookback", self.behavior_lookback),
            ("reclaim_bars", self.reclaim_bars),
        ];
        for (name, value) in positive_counts {
            if value == 0 {
                return Err(EngineError::ConfigInvalid(format!("{} must be > 0", name)));
            }
        }

        if self.confirm_closes == 0 {
            return Err(EngineError::ConfigInvalid("confirm_closes must be > 0".into()));
        }
        if self.attempt_timeout_bars < self.fakeout_bars {
            return Err(EngineError::ConfigInvalid(format!(
                "attempt_timeout_bars ({}) must be >= fakeout_bars ({})",
                self.attempt_timeout_bars, self.fakeout_bars
            )));
        }

        let non_negative = [
            ("zone_bin_atr", self.zone_bin_atr),
            ("zone_pad_atr", self.zone_pad_atr),
            ("rvol_confirm", self.rvol_confirm),
            ("result_confirm", self.result_confirm),
            ("absorption_result_max", self.absorption_result_max),
            ("timeline_delta", self.timeline_delta),
            ("approach_atr", self.approach_atr),
            ("volume_spike_rvol", self.volume_spike_rvol),
            ("volume_dry_rvol", self.volume_dry_rvol),
            ("zone_weights.tests", self.zone_weights.tests),
            ("zone_weights.rejections", self.zone_weights.rejections),
            ("zone_weights.reaction", self.zone_weights.reaction),
            ("zone_weights.recency", self.zone_weights.recency),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::ConfigInvalid(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        let w = &self.zone_weights;
        if w.tests + w.rejections + w.reaction + w.recency <= 0.0 {
            return Err(EngineError::ConfigInvalid("zone weights sum to zero".into()));
        }

        let unit_interval = [
            ("regime_threshold", self.regime_threshold),
            ("eh_zone_floor", self.eh_zone_floor),
            ("long_wick_ratio", self.long_wick_ratio),
        ];
        for (name, value) in unit_interval {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::ConfigInvalid(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if !(self.softmax_temperature.is_finite() && self.softmax_temperature > 0.0) {
            return Err(EngineError::ConfigInvalid("softmax_temperature must be > 0".into()));
        }
        if !(self.recency_half_life_bars.is_finite() && self.recency_half_life_bars > 0.0) {
            return Err(EngineError::ConfigInvalid("recency_half_life_bars must be > 0".into()));
        }
        if !(self.gap_multiplier.is_finite() && self.gap_multiplier >= 1.0) {
            return Err(EngineError::ConfigInvalid("gap_multiplier must be >= 1".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        for tf in [Timeframe::M1, Timeframe::M5, Timeframe::H1, Timeframe::D1] {
            assert!(EngineConfig::for_timeframe(tf).validate().is_ok());
        }
    }

    #[test]
    fn test_timeframe_defaults() {
        assert_eq!(EngineConfig::for_timeframe(Timeframe::M1).swing_order, 4);
        assert_eq!(EngineConfig::for_timeframe(Timeframe::M5).swing_order, 3);
        let daily = EngineConfig::for_timeframe(Timeframe::D1);
        assert_eq!(daily.rvol_window, 20);
        assert_eq!(daily.zone_pad_atr, 0.5);
    }

    #[test]
    fn test_zero_period_rejected() {
        let config = EngineConfig {
            atr_period: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("atr_period"));
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let config = EngineConfig {
            rvol_confirm: -1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::ConfigInvalid(_))));
    }

    #[test]
    fn test_partial_json_override() {
        let config: EngineConfig = serde_json::from_str(r#"{"swing_order": 5}"#).unwrap();
        assert_eq!(config.swing_order, 5);
        assert_eq!(config.atr_period, 14);
        assert_eq!(config.zone_weights, ZoneWeights::default());
    }
}
