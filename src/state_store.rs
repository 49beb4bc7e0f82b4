//! File-backed state store for (ticker, timeframe) keys
//!
//! Each key owns two files under the store directory:
//! - `<TICKER>_<tf>.state.json.zst` - zstd-compressed JSON [`EngineState`]
//! - `<TICKER>_<tf>.timeline.jsonl` - append-only log of timeline events
//!
//! The engine itself never touches disk; callers load the prior state,
//! run a cycle, then save and append here.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::analysis::{EngineState, TimelineEvent};
use crate::bars::Timeframe;

const STATE_SUFFIX: &str = ".state.json.zst";
const TIMELINE_SUFFIX: &str = ".timeline.jsonl";
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key(ticker: &str, timeframe: Timeframe) -> String {
        format!("{}_{}", ticker.to_uppercase(), timeframe)
    }

    pub fn state_path(&self, ticker: &str, timeframe: Timeframe) -> PathBuf {
        self.dir
            .join(format!("{}{}", Self::key(ticker, timeframe), STATE_SUFFIX))
    }

    pub fn timeline_path(&self, ticker: &str, timeframe: Timeframe) -> PathBuf {
        self.dir
            .join(format!("{}{}", Self::key(ticker, timeframe), TIMELINE_SUFFIX))
    }

    /// Load the persisted state; `None` on the first cycle for a key
    pub fn load_state(&self, ticker: &str, timeframe: Timeframe) -> Result<Option<EngineState>> {
        let path = self.state_path(ticker, timeframe);
        if !path.exists() {
            return Ok(None);
        }

        let compressed =
            std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let json = zstd::decode_all(&compressed[..])
            .with_context(|| format!("decompressing {}", path.display()))?;
        let state: EngineState = serde_json::from_slice(&json)
            .with_context(|| format!("parsing {}", path.display()))?;

        debug!(
            "Loaded state for {} ({} breakout FSMs)",
            Self::key(ticker, timeframe),
            state.breakouts.len()
        );
        Ok(Some(state))
    }

    /// Overwrite the state snapshot via a temp file and rename
    pub fn save_state(&self, ticker: &str, timeframe: Timeframe, state: &EngineState) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let path = self.state_path(ticker, timeframe);
        let json = serde_json::to_vec(state)?;
        let compressed = zstd::encode_all(&json[..], ZSTD_LEVEL)?;

        let tmp = path.with_extension("zst.tmp");
        std::fs::write(&tmp, &compressed)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;

        debug!("Saved state to {} ({} bytes)", path.display(), compressed.len());
        Ok(())
    }

    /// Append one JSON line per event; returns the number written
    pub fn append_timeline(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        events: &[TimelineEvent],
    ) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let path = self.timeline_path(ticker, timeframe);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;

        let mut buf = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }
        file.write_all(&buf)?;

        Ok(events.len())
    }

    /// Read back the whole timeline log for a key, oldest first
    pub fn read_timeline(&self, ticker: &str, timeframe: Timeframe) -> Result<Vec<TimelineEvent>> {
        let path = self.timeline_path(ticker, timeframe);
        if !path.exists() {
            return Ok(vec![]);
        }

        let file = std::fs::File::open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        let mut events = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: TimelineEvent = serde_json::from_str(&line)
                .with_context(|| format!("{} line {}", path.display(), n + 1))?;
            events.push(event);
        }
        Ok(events)
    }

    /// Keys (`TICKER_tf`) that have a persisted state snapshot
    pub fn list_keys(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().to_string();
            if let Some(key) = filename.strip_suffix(STATE_SUFFIX) {
                keys.push(key.to_string());
            }
        }

        keys.sort();
        info!("Found {} persisted keys in {}", keys.len(), self.dir.display());
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{bars_from_closes, staircase_up_closes};
    use crate::analysis::{analyze, AnalysisInput};
    use crate::config::EngineConfig;

    fn temp_store(name: &str) -> StateStore {
        let dir = std::env::temp_dir().join(format!(
            "market-structure-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        StateStore::new(dir)
    }

    #[test]
    fn test_missing_state_is_none() {
        let store = temp_store("missing");
        assert!(store.load_state("AAPL", Timeframe::M5).unwrap().is_none());
        assert!(store.read_timeline("AAPL", Timeframe::M5).unwrap().is_empty());
        assert!(store.list_keys().unwrap().is_empty());
    }

    #[test]
    fn test_state_roundtrip_and_timeline_append() {
        let store = temp_store("roundtrip");
        let config = EngineConfig::for_timeframe(Timeframe::D1);
        let input = AnalysisInput::new("spy", Timeframe::D1, bars_from_closes(&staircase_up_closes()));
        let outcome = analyze(&input, &config, &EngineState::default()).unwrap();
        assert!(!outcome.report.timeline.is_empty());

        store.save_state("spy", Timeframe::D1, &outcome.state).unwrap();
        let loaded = store.load_state("SPY", Timeframe::D1).unwrap().unwrap();
        assert_eq!(loaded, outcome.state);

        let written = store
            .append_timeline("spy", Timeframe::D1, &outcome.report.timeline)
            .unwrap();
        assert_eq!(written, outcome.report.timeline.len());
        store.append_timeline("spy", Timeframe::D1, &outcome.report.timeline).unwrap();

        let log = store.read_timeline("spy", Timeframe::D1).unwrap();
        assert_eq!(log.len(), 2 * written);
        assert_eq!(log[..written], outcome.report.timeline[..]);

        assert_eq!(store.list_keys().unwrap(), vec!["SPY_1d".to_string()]);
        let _ = std::fs::remove_dir_all(store.dir());
    }
}
