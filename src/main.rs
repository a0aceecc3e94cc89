//! Gantry - durable, constraint-aware background job scheduler.
//!
//! Main entry point for the Gantry CLI and scheduler daemon.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use gantry_core::{BackoffPolicy, Constraints, Job, JobSpec, JobStatus, NetworkType};
use gantry_scheduler::{Gantry, SchedulerConfig, StaticConditionSource};
use gantry_store::{JobStore, SqliteJobStore, StoreError};

mod cli;
mod process;

use cli::{Cli, Commands};
use process::{ProcessExecutor, CMD_KEY};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let store = SqliteJobStore::open(&cli.db)
        .await
        .with_context(|| format!("opening job database at {}", cli.db.display()))?;
    let store: Arc<dyn JobStore> = Arc::new(store);

    match cli.command {
        Commands::Run {
            tick_ms,
            retention_days,
        } => run_scheduler(&cli.db, store, tick_ms, retention_days).await,
        Commands::Submit {
            cmd,
            tag,
            after,
            requires_charging,
            requires_idle,
            requires_battery_not_low,
            requires_storage_not_low,
            network,
            delay_secs,
            period_secs,
            max_retries,
            backoff,
            backoff_base_secs,
        } => {
            let constraints = Constraints {
                requires_charging,
                requires_device_idle: requires_idle,
                requires_battery_not_low,
                requires_storage_not_low,
                required_network: parse_network(network.as_deref())?,
                initial_delay: Duration::from_secs(delay_secs.unwrap_or(0)),
            };
            submit_job(
                store.as_ref(),
                cmd,
                tag,
                after,
                constraints,
                period_secs,
                max_retries,
                backoff,
                backoff_base_secs,
            )
            .await
        }
        Commands::List {
            status,
            tag,
            format,
        } => list_jobs(store.as_ref(), status, tag, &format).await,
        Commands::Status { id } => show_job(store.as_ref(), id).await,
        Commands::Cancel { id } => cancel_job(store.as_ref(), id).await,
        Commands::Prune { retention_days } => prune_jobs(store.as_ref(), retention_days).await,
    }
}

/// Run the scheduler in foreground until ctrl-c.
async fn run_scheduler(
    db: &Path,
    store: Arc<dyn JobStore>,
    tick_ms: u64,
    retention_days: u64,
) -> anyhow::Result<()> {
    let config = SchedulerConfig {
        tick_interval: Duration::from_millis(tick_ms),
        prune_retention: Duration::from_secs(retention_days * 24 * 60 * 60),
    };

    let condition = Arc::new(StaticConditionSource::permissive());
    let gantry = Gantry::start(config, store, Arc::new(ProcessExecutor), condition).await?;

    info!("scheduler running on {} (ctrl-c to stop)", db.display());
    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;

    info!("shutting down");
    gantry.shutdown();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn submit_job(
    store: &dyn JobStore,
    cmd: String,
    tag: Option<String>,
    after: Vec<Uuid>,
    constraints: Constraints,
    period_secs: Option<u64>,
    max_retries: Option<u32>,
    backoff: Option<String>,
    backoff_base_secs: Option<u64>,
) -> anyhow::Result<()> {
    let mut spec = JobSpec::new().with_constraints(constraints);
    spec.arguments
        .set(CMD_KEY, gantry_core::ArgValue::String(cmd));

    if let Some(tag) = tag {
        spec = spec.with_tag(tag);
    }
    if let Some(secs) = period_secs {
        spec = spec.with_period(Duration::from_secs(secs));
    }
    if let Some(max) = max_retries {
        spec = spec.with_max_retries(max);
    }
    if backoff.is_some() || backoff_base_secs.is_some() {
        let policy = match backoff.as_deref() {
            Some(s) => match BackoffPolicy::parse(s) {
                Some(policy) => policy,
                None => bail!("unknown backoff policy '{s}'"),
            },
            None => BackoffPolicy::default(),
        };
        let base = Duration::from_secs(backoff_base_secs.unwrap_or(30));
        spec = spec.with_backoff(policy, base);
    }

    let job = Job::new(spec);
    store.insert(&job, &after).await?;
    println!("{}", job.id);
    Ok(())
}

async fn list_jobs(
    store: &dyn JobStore,
    status: Option<String>,
    tag: Option<String>,
    format: &str,
) -> anyhow::Result<()> {
    let jobs = match (status, tag) {
        (Some(s), _) => {
            let status = match JobStatus::parse(&s) {
                Some(status) => status,
                None => bail!("unknown status '{s}'"),
            };
            store.list_by_status(status).await?
        }
        (None, Some(tag)) => store.list_by_tag(&tag).await?,
        (None, None) => {
            let mut all = Vec::new();
            for status in [
                JobStatus::Enqueued,
                JobStatus::Running,
                JobStatus::Succeeded,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                all.extend(store.list_by_status(status).await?);
            }
            all.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then(a.id.cmp(&b.id)));
            all
        }
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&jobs)?),
        "table" => {
            println!(
                "{:<36}  {:<9}  {:<8}  {:<12}  {}",
                "ID", "STATUS", "ATTEMPTS", "TAG", "ENQUEUED"
            );
            for job in jobs {
                println!(
                    "{:<36}  {:<9}  {:<8}  {:<12}  {}",
                    job.id,
                    job.status.as_str(),
                    job.run_attempt_count,
                    job.tag.as_deref().unwrap_or("-"),
                    job.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
        }
        other => bail!("unknown format '{other}'"),
    }
    Ok(())
}

async fn show_job(store: &dyn JobStore, id: Uuid) -> anyhow::Result<()> {
    let job = store.get(id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

/// Best-effort cancel without a live scheduler; a running daemon notices
/// the status flip when the attempt reports back.
async fn cancel_job(store: &dyn JobStore, id: Uuid) -> anyhow::Result<()> {
    for _ in 0..3 {
        let mut job = store.get(id).await?;
        let previous = job.status;
        if !job.cancel(Utc::now())? {
            println!("{id} already cancelled");
            return Ok(());
        }
        match store.update(&job, previous).await {
            Ok(()) => {
                println!("{id} cancelled");
                return Ok(());
            }
            Err(StoreError::StaleState { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    bail!("job {id} kept changing state; try again")
}

async fn prune_jobs(store: &dyn JobStore, retention_days: u64) -> anyhow::Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    let removed = store.prune(cutoff).await?;
    println!("removed {removed} finished jobs");
    Ok(())
}

fn parse_network(s: Option<&str>) -> anyhow::Result<NetworkType> {
    match s {
        None => Ok(NetworkType::default()),
        Some(s) => match NetworkType::parse(s) {
            Some(network) => Ok(network),
            None => bail!("unknown network type '{s}'"),
        },
    }
}
