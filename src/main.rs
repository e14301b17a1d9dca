use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, TimeDelta};
use clap::{Parser, Subcommand, ValueEnum};
use mileage_tracker::{
    CatchUpPolicy, DurabilityMode, MileageTracker, Owner, TrackerConfig, Trigger,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mileage-tracker")]
#[command(about = "Per-owner mileage ledger with quarterly and yearly rollover")]
struct Cli {
    /// Directory holding the WAL and snapshot
    #[arg(long, global = true, default_value = "mileage-data")]
    data_dir: PathBuf,

    /// Local UTC offset such as +02:00 (defaults to the host's)
    #[arg(long, global = true, allow_hyphen_values = true)]
    utc_offset: Option<FixedOffset>,

    #[arg(long, global = true, value_enum, default_value_t = DurabilityArg::Sync)]
    durability: DurabilityArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the rollover scheduler until Ctrl-C
    Run {
        #[arg(long, default_value_t = 3600)]
        wake_secs: u64,
        #[arg(long, default_value_t = 5)]
        window_minutes: i64,
        #[arg(long, value_enum, default_value_t = CatchUpArg::WindowOnly)]
        catch_up: CatchUpArg,
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Print an owner's ledger
    Show { owner: Owner },
    /// Overwrite the running total
    Set { owner: Owner, total: String },
    /// Add to (or, with a negative delta, subtract from) the running total
    Add {
        owner: Owner,
        #[arg(allow_hyphen_values = true)]
        delta: f64,
    },
    /// Zero the running total
    Reset { owner: Owner },
    /// Drop every quarterly and yearly snapshot
    ClearHistory { owner: Owner },
    /// Snapshot the running total into the current quarter
    SaveQuarterly { owner: Owner },
    /// Snapshot the running total into the current year and zero it
    SaveYearly { owner: Owner },
    /// Print both snapshot sequences
    Totals { owner: Owner },
    /// Run a single sweep as if the clock read `at`
    Sweep {
        #[arg(long)]
        at: DateTime<FixedOffset>,
        /// Evaluate as the start-up sweep instead of an interval tick
        #[arg(long)]
        startup: bool,
        #[arg(long, default_value_t = 5)]
        window_minutes: i64,
        #[arg(long, value_enum, default_value_t = CatchUpArg::WindowOnly)]
        catch_up: CatchUpArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DurabilityArg {
    Sync,
    Async,
    None,
}

impl From<DurabilityArg> for DurabilityMode {
    fn from(arg: DurabilityArg) -> Self {
        match arg {
            DurabilityArg::Sync => DurabilityMode::Sync,
            DurabilityArg::Async => DurabilityMode::Async,
            DurabilityArg::None => DurabilityMode::None,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CatchUpArg {
    WindowOnly,
    BoundaryDay,
}

impl From<CatchUpArg> for CatchUpPolicy {
    fn from(arg: CatchUpArg) -> Self {
        match arg {
            CatchUpArg::WindowOnly => CatchUpPolicy::WindowOnly,
            CatchUpArg::BoundaryDay => CatchUpPolicy::BoundaryDay,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = TrackerConfig::new()
        .data_dir(&cli.data_dir)
        .durability(cli.durability.into());
    if let Some(offset) = cli.utc_offset {
        config = config.utc_offset(offset);
    }

    let command = cli.command;
    let config = match &command {
        Command::Run {
            wake_secs,
            window_minutes,
            catch_up,
            concurrency,
        } => config
            .wake_interval(Duration::from_secs(*wake_secs))
            .window_tolerance(TimeDelta::minutes(*window_minutes))
            .catch_up((*catch_up).into())
            .sweep_concurrency(*concurrency),
        Command::Sweep {
            window_minutes,
            catch_up,
            ..
        } => config
            .window_tolerance(TimeDelta::minutes(*window_minutes))
            .catch_up((*catch_up).into()),
        _ => config,
    };

    let tracker = open(config)?;
    let ledgers = tracker.ledgers();

    match command {
        Command::Run { .. } => run(&tracker).await,
        Command::Sweep { at, startup, .. } => {
            let trigger = if startup { Trigger::Startup } else { Trigger::Interval };
            let report = tracker.scheduler().sweep_at(at, trigger).await;
            print_json(&report)
        }
        Command::Show { owner } => print_json(&ledgers.get(&owner).await?),
        Command::Set { owner, total } => {
            print_json(&ledgers.set_current_total(&owner, total.as_str()).await?)
        }
        Command::Add { owner, delta } => print_json(&ledgers.adjust_total(&owner, delta).await?),
        Command::Reset { owner } => print_json(&ledgers.reset_total(&owner).await?),
        Command::ClearHistory { owner } => print_json(&ledgers.clear_history(&owner).await?),
        Command::SaveQuarterly { owner } => print_json(&ledgers.save_quarterly_total(&owner).await?),
        Command::SaveYearly { owner } => {
            print_json(&ledgers.save_yearly_total_and_reset(&owner).await?)
        }
        Command::Totals { owner } => print_json(&ledgers.get_totals(&owner).await?),
    }
}

fn open(config: TrackerConfig) -> Result<MileageTracker> {
    let data_dir = config.data_dir.clone().unwrap_or_default();
    MileageTracker::open(config)
        .with_context(|| format!("Failed to open mileage store in '{}'", data_dir.display()))
}

async fn run(tracker: &MileageTracker) -> Result<()> {
    let handle = tracker.start_scheduler();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    handle.stop().await;
    tracker.checkpoint().await.context("Final checkpoint failed")?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
