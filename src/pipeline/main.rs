mod batch;
mod load;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use market_structure::{StateStore, Timeframe};

use batch::{load_jobs, run_batch, run_job, Job, JobContext};

#[derive(Parser, Debug)]
#[command(name = "pipeline")]
#[command(about = "Market-structure analysis: zones, regime, breakouts, behavior, playbook")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze one bar file for a single (ticker, timeframe) key
    Analyze {
        /// Bar file (.csv or .json, optionally .zst-compressed)
        #[arg(short, long)]
        bars: PathBuf,

        /// Ticker symbol
        #[arg(short, long)]
        ticker: String,

        /// Bar timeframe (1m, 5m, 15m, 30m, 1h, 4h, 1d)
        #[arg(short = 'f', long, default_value = "5m")]
        timeframe: Timeframe,

        /// JSON file overriding the timeframe's default config
        #[arg(short, long, env = "ANALYSIS_CONFIG")]
        config: Option<PathBuf>,

        /// Directory for persisted state and timeline logs
        #[arg(short, long, env = "STATE_DIR")]
        state_dir: Option<PathBuf>,

        /// Extended-hours levels JSON (yesterday/premarket/afterhours)
        #[arg(long)]
        eh: Option<PathBuf>,

        /// Directory to write the report JSON into (stdout when omitted)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Run a JSON job list in parallel
    Batch {
        /// Job list: [{"ticker", "timeframe", "bars", "extended_hours"?}]
        #[arg(short, long)]
        jobs: PathBuf,

        /// JSON file overriding the default config
        #[arg(short, long, env = "ANALYSIS_CONFIG")]
        config: Option<PathBuf>,

        /// Directory for persisted state and timeline logs
        #[arg(short, long, env = "STATE_DIR")]
        state_dir: Option<PathBuf>,

        /// Output directory for report files
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
    },

    /// Show persisted state for a key, or list keys when none is given
    ShowState {
        /// Directory for persisted state and timeline logs
        #[arg(short, long, env = "STATE_DIR", default_value = "state")]
        state_dir: PathBuf,

        /// Ticker symbol
        #[arg(short, long)]
        ticker: Option<String>,

        /// Bar timeframe
        #[arg(short = 'f', long, default_value = "5m")]
        timeframe: Timeframe,

        /// Also print the last N timeline events
        #[arg(long, default_value = "0")]
        events: usize,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Commands::Analyze {
            bars,
            ticker,
            timeframe,
            config,
            state_dir,
            eh,
            output_dir,
        } => {
            let job = Job {
                ticker,
                timeframe,
                bars,
                extended_hours: eh,
            };
            let ctx = JobContext {
                config,
                store: state_dir.map(StateStore::new),
                output_dir: output_dir.clone(),
            };
            let report = run_job(&job, &ctx)?;
            if output_dir.is_none() {
                println!("{}", report.to_json()?);
            }
        }
        Commands::Batch {
            jobs,
            config,
            state_dir,
            output_dir,
        } => {
            let jobs = load_jobs(&jobs)?;
            let ctx = JobContext {
                config,
                store: state_dir.map(StateStore::new),
                output_dir: Some(output_dir),
            };
            let results = run_batch(&jobs, &ctx)?;
            if results.iter().any(|(_, r)| r.is_err()) {
                anyhow::bail!("one or more jobs failed");
            }
        }
        Commands::ShowState {
            state_dir,
            ticker,
            timeframe,
            events,
        } => {
            run_show_state(state_dir, ticker, timeframe, events)?;
        }
    }

    Ok(())
}

fn run_show_state(
    state_dir: PathBuf,
    ticker: Option<String>,
    timeframe: Timeframe,
    events: usize,
) -> Result<()> {
    let store = StateStore::new(state_dir);

    let Some(ticker) = ticker else {
        for key in store.list_keys()? {
            println!("{}", key);
        }
        return Ok(());
    };

    match store.load_state(&ticker, timeframe)? {
        Some(state) => {
            let timeline = &state.timeline;
            info!(
                "{} {}: regime {:?}, dominant {:?}, last bar {:?}",
                ticker.to_uppercase(),
                timeframe,
                timeline.last_regime,
                timeline.last_dominant_behavior,
                timeline.last_bar_time
            );
            for (zone_id, phase) in state.breakouts.phases() {
                info!("  zone {} -> {}", zone_id, phase);
            }
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        None => info!("No persisted state for {} {}", ticker.to_uppercase(), timeframe),
    }

    if events > 0 {
        let log = store.read_timeline(&ticker, timeframe)?;
        for event in log.iter().skip(log.len().saturating_sub(events)) {
            println!("{}", serde_json::to_string(event)?);
        }
    }

    Ok(())
}
