//! Input loading for the pipeline: bar files, config overrides, EH levels

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

use market_structure::analysis::ExtendedHoursLevels;
use market_structure::{Bar, EngineConfig, Timeframe};

/// One CSV row: `t,o,h,l,c,v` with RFC 3339 timestamps; empty `v` = no volume
#[derive(Debug, Deserialize)]
struct CsvRow {
    t: String,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: Option<f64>,
}

/// Open a file, transparently decoding `.zst`
fn open_reader(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    if path.extension().is_some_and(|ext| ext == "zst") {
        let decoder = zstd::stream::Decoder::new(file)
            .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?;
        Ok(Box::new(decoder))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// File name with a trailing `.zst` removed, lowercased
fn base_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.strip_suffix(".zst").map(str::to_string).unwrap_or(name)
}

pub fn parse_csv_bars<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut bars = Vec::new();

    for (n, result) in csv_reader.deserialize().enumerate() {
        let row: CsvRow = result.with_context(|| format!("Failed to parse CSV row {}", n + 1))?;
        let t = DateTime::parse_from_rfc3339(&row.t)
            .with_context(|| format!("Failed to parse timestamp: {}", row.t))?
            .with_timezone(&Utc);
        bars.push(Bar::new(t, row.o, row.h, row.l, row.c, row.v));
    }

    Ok(bars)
}

/// Load bars from `.csv`, `.json` or their `.zst`-compressed variants
pub fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let name = base_name(path);
    let reader = open_reader(path)?;

    let bars = if name.ends_with(".csv") {
        parse_csv_bars(reader)?
    } else if name.ends_with(".json") {
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse bar JSON: {:?}", path))?
    } else {
        bail!("Unsupported bar file {:?} (expected .csv or .json)", path);
    };

    debug!("Loaded {} bars from {:?}", bars.len(), path);
    Ok(bars)
}

/// Timeframe defaults, with any fields from a JSON file laid over them
pub fn load_config(path: Option<&Path>, timeframe: Timeframe) -> Result<EngineConfig> {
    let defaults = EngineConfig::for_timeframe(timeframe);
    let Some(path) = path else {
        return Ok(defaults);
    };

    let overrides: serde_json::Value = serde_json::from_reader(open_reader(path)?)
        .with_context(|| format!("Failed to parse config JSON: {:?}", path))?;
    let mut merged = serde_json::to_value(&defaults)?;
    merge_json(&mut merged, overrides);

    let config: EngineConfig = serde_json::from_value(merged)
        .with_context(|| format!("Invalid config in {:?}", path))?;
    Ok(config)
}

/// Recursive object merge; non-object values replace
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

pub fn load_extended_hours(path: &Path) -> Result<ExtendedHoursLevels> {
    serde_json::from_reader(open_reader(path)?)
        .with_context(|| format!("Failed to parse extended-hours JSON: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_with_missing_volume() {
        let data = "t,o,h,l,c,v\n\
                    2025-03-03T14:30:00Z,100,101,99.5,100.5,1200\n\
                    2025-03-03T14:35:00Z,100.5,101.2,100.1,101.0,\n";
        let bars = parse_csv_bars(data.as_bytes()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].v, Some(1200.0));
        assert_eq!(bars[1].v, None);
        assert!(bars[1].t > bars[0].t);
    }

    #[test]
    fn test_bad_timestamp_is_an_error() {
        let data = "t,o,h,l,c,v\nyesterday,1,2,0.5,1.5,10\n";
        assert!(parse_csv_bars(data.as_bytes()).is_err());
    }

    #[test]
    fn test_config_overrides_keep_timeframe_defaults() {
        let mut base = serde_json::to_value(EngineConfig::for_timeframe(Timeframe::D1)).unwrap();
        merge_json(
            &mut base,
            serde_json::json!({ "rvol_confirm": 2.5, "behavior_weights": { "reclaim": 0.4 } }),
        );
        let config: EngineConfig = serde_json::from_value(base).unwrap();

        assert_eq!(config.rvol_confirm, 2.5);
        assert_eq!(config.behavior_weights.reclaim, 0.4);
        assert_eq!(config.swing_order, 2);
        assert_eq!(config.rvol_window, 20);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let path = std::env::temp_dir().join(format!("bars-{}.txt", std::process::id()));
        std::fs::write(&path, "t,o,h,l,c,v\n").unwrap();
        assert!(load_bars(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
