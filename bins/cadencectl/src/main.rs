use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cadence_core::cfg::{self, AppId, Config};
use cadence_core::store::{self, JobStore, KvJobStore};
use cadence_core::{logx, Job, JobState, NewJob, PeriodUnit, Trigger};
use chrono::{DateTime, FixedOffset, Utc};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

/// Shares the daemon's config and store.
const APP: AppId = AppId {
    qualifier: "com",
    organization: "local",
    application: "cadenced",
};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"), version, about = "Inspect and maintain cadenced jobs")]
struct Cli {
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Config file to use instead of the per-user one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Job store directory; overrides the config.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print upcoming fire times of a trigger.
    Preview {
        /// RFC 3339 start, e.g. 2024-01-01T09:00:00+02:00
        #[arg(long)]
        start: DateTime<FixedOffset>,
        #[arg(long, default_value_t = 1)]
        period: i64,
        #[arg(long, default_value = "hour")]
        unit: PeriodUnit,
        /// -1 repeats until `--end` (or forever).
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        repeat: i64,
        #[arg(long)]
        end: Option<DateTime<FixedOffset>>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Check a job definition (JSON) without submitting it.
    Validate { file: PathBuf },
    /// List stored jobs.
    Jobs {
        #[arg(long)]
        state: Option<JobState>,
    },
    /// Remove a finished job from the store.
    Purge { id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose { 0 => "warn", 1 => "info", 2 => "debug", _ => "trace" };
    logx::init(level, logx::LogFormat::Text);

    match cli.cmd {
        Command::Preview { start, period, unit, repeat, end, limit } => {
            let trigger = Trigger::new(start, period, unit, repeat, end)?;
            preview(&trigger, limit);
        }
        Command::Validate { file } => validate(&file)?,
        Command::Jobs { state } => {
            let store = open_store(cli.config.as_ref(), cli.data_dir.as_ref())?;
            list_jobs(&store, state)?;
        }
        Command::Purge { id } => {
            let store = open_store(cli.config.as_ref(), cli.data_dir.as_ref())?;
            purge(&store, &id)?;
        }
    }
    Ok(())
}

fn preview(trigger: &Trigger, limit: usize) {
    let (mut times, _) = trigger.preview(limit.saturating_add(1));
    let more = times.len() > limit;
    times.truncate(limit);
    for (i, t) in times.iter().enumerate() {
        println!("{:>4}  {}", i, t.to_rfc3339());
    }
    match (trigger.repeat_count(), trigger.end_time()) {
        (-1, None) => println!("repeats indefinitely"),
        _ if more => println!("more fire times follow"),
        _ => println!("{} fire time(s) total", times.len()),
    }
}

fn validate(file: &Path) -> Result<()> {
    let txt = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let new: NewJob = serde_json::from_str(&txt).with_context(|| format!("parse {}", file.display()))?;
    let job = Job::create(new, Utc::now()).with_context(|| format!("invalid job in {}", file.display()))?;
    println!("ok id={} kind={}", job.id(), job.recipient().kind());
    match job.fire_time() {
        Some(first) => println!("first fire at {}", first.to_rfc3339()),
        None => println!("never fires"),
    }
    Ok(())
}

fn open_store(config: Option<&PathBuf>, data_dir: Option<&PathBuf>) -> Result<KvJobStore<store::DefaultKv>> {
    let dir = match data_dir {
        Some(dir) => dir.clone(),
        None => {
            let cfg: Config = match config {
                Some(path) => cfg::load_from(path)?,
                None => cfg::load_or_init(&APP)?,
            };
            cfg.store_dir(&APP)?
        }
    };
    debug!("store dir {}", dir.display());
    Ok(KvJobStore::new(store::open_default(&dir)?))
}

fn list_jobs(store: &impl JobStore, state: Option<JobState>) -> Result<()> {
    let jobs: Vec<Job> = store
        .list()?
        .into_iter()
        .filter(|j| state.map_or(true, |s| j.state() == s))
        .collect();
    if jobs.is_empty() {
        println!("no jobs");
        return Ok(());
    }
    println!("{:<36}  {:<9}  {:>7}  {:>6}  NEXT DUE", "ID", "STATE", "ATTEMPT", "REPEAT");
    for j in &jobs {
        let due = j.next_due().map(|d| d.to_rfc3339()).unwrap_or_else(|| "-".into());
        println!(
            "{:<36}  {:<9}  {:>7}  {:>6}  {}",
            j.id(),
            j.state(),
            j.attempt(),
            j.trigger().current_repeat_count(),
            due
        );
    }
    Ok(())
}

fn purge(store: &impl JobStore, id: &str) -> Result<()> {
    let Some(job) = store.load(id)? else {
        bail!("no job {id}");
    };
    if !job.state().is_terminal() {
        bail!("job {id} is {}; cancel it before purging", job.state());
    }
    store.delete(id)?;
    info!("purged {}", id);
    println!("purged {id}");
    Ok(())
}
