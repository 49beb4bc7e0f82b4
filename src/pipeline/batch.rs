//! Analysis jobs: one (ticker, timeframe) cycle each, run alone or in parallel

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use market_structure::{analyze, AnalysisInput, AnalysisReport, EngineState, StateStore, Timeframe};

use crate::load::{load_bars, load_config, load_extended_hours};

/// One entry of a batch job list
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub ticker: String,
    pub timeframe: Timeframe,
    /// Bar file (.csv / .json, optionally .zst)
    pub bars: PathBuf,
    /// Optional extended-hours levels JSON
    #[serde(default)]
    pub extended_hours: Option<PathBuf>,
}

impl Job {
    pub fn key(&self) -> String {
        format!("{}_{}", self.ticker.to_uppercase(), self.timeframe)
    }
}

/// Where a job reads and writes besides its own inputs
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub config: Option<PathBuf>,
    pub store: Option<StateStore>,
    pub output_dir: Option<PathBuf>,
}

/// Run one cycle: load inputs and prior state, analyze, persist
pub fn run_job(job: &Job, ctx: &JobContext) -> Result<AnalysisReport> {
    let bars = load_bars(&job.bars)?;
    let config = load_config(ctx.config.as_deref(), job.timeframe)?;

    let mut input = AnalysisInput::new(job.ticker.to_uppercase(), job.timeframe, bars);
    if let Some(path) = &job.extended_hours {
        input = input.with_extended_hours(load_extended_hours(path)?);
    }

    let prior = match &ctx.store {
        Some(store) => store
            .load_state(&job.ticker, job.timeframe)?
            .unwrap_or_default(),
        None => EngineState::default(),
    };

    let outcome = analyze(&input, &config, &prior).with_context(|| format!("analyzing {}", job.key()))?;

    if let Some(store) = &ctx.store {
        store.save_state(&job.ticker, job.timeframe, &outcome.state)?;
        store.append_timeline(&job.ticker, job.timeframe, &outcome.report.timeline)?;
    }

    if let Some(dir) = &ctx.output_dir {
        write_report(&outcome.report, dir, &job.key())?;
    }

    Ok(outcome.report)
}

pub fn write_report(report: &AnalysisReport, dir: &Path, key: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;
    let path = dir.join(format!("{}.report.json", key));
    std::fs::write(&path, report.to_json()?).with_context(|| format!("writing {:?}", path))?;
    Ok(path)
}

/// Parse a JSON job list and reject repeated keys
pub fn load_jobs(path: &Path) -> Result<Vec<Job>> {
    let data = std::fs::read(path).with_context(|| format!("reading {:?}", path))?;
    let jobs: Vec<Job> =
        serde_json::from_slice(&data).with_context(|| format!("parsing job list {:?}", path))?;
    check_unique_keys(&jobs)?;
    Ok(jobs)
}

/// Each key's state may only be written by one job per run
pub fn check_unique_keys(jobs: &[Job]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for job in jobs {
        if !seen.insert(job.key()) {
            bail!("Job list names {} more than once", job.key());
        }
    }
    Ok(())
}

/// Run independent keys in parallel; results keep the job-list order
pub fn run_batch(jobs: &[Job], ctx: &JobContext) -> Result<Vec<(String, Result<AnalysisReport>)>> {
    check_unique_keys(jobs)?;
    info!("Running {} jobs...", jobs.len());

    let results: Vec<_> = jobs
        .par_iter()
        .map(|job| {
            let result = run_job(job, ctx);
            match &result {
                Ok(report) => info!("{}", report.summary()),
                Err(e) => warn!("{} failed: {:#}", job.key(), e),
            }
            (job.key(), result)
        })
        .collect();

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    info!("Finished {} jobs ({} failed)", results.len(), failed);
    Ok(results)
}
