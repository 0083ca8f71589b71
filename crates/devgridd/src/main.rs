//! devgridd — the devgrid daemon.
//!
//! Runs the workspace lifecycle scheduler against the local state store:
//! - State store (redb)
//! - Template policy (open or governed)
//! - Build orchestrator
//! - Lifecycle executor loop
//!
//! # Usage
//!
//! ```text
//! devgridd run --config /etc/devgrid/devgrid.toml
//! devgridd tick --at 2024-01-01T09:00:00Z
//! devgridd check-schedule "CRON_TZ=Europe/Berlin 30 9 * * 1-5" --count 3
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use devgrid_autobuild::{
    Executor, ExecutorConfig, FakeEnqueuer, IntervalTicker, JobCompletion, NoopEnqueuer,
    NotificationEnqueuer, StatsReporter, StoreOrchestrator, render_prometheus,
};
use devgrid_core::{CompletionMode, DevgridConfig, PolicyMode};
use devgrid_schedule::{
    Entitlements, Feature, GovernedPolicy, OpenPolicy, Schedule, TemplatePolicyProvider,
};
use devgrid_state::StateStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "devgridd", about = "devgrid workspace lifecycle daemon")]
struct Cli {
    /// Path to devgrid.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persistent state (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the lifecycle scheduler until interrupted.
    Run {
        /// Tick interval in seconds (overrides the config file).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Run a single tick and print its stats as JSON.
    Tick {
        /// Instant to evaluate at (RFC 3339). Defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Print Prometheus text instead of JSON.
        #[arg(long)]
        prometheus: bool,
    },

    /// Print the next trigger times of a cron schedule.
    CheckSchedule {
        /// Cron expression, optionally prefixed with CRON_TZ=<zone>.
        expr: String,

        /// Start searching after this instant (RFC 3339). Defaults to now.
        #[arg(long)]
        after: Option<DateTime<Utc>>,

        /// Number of triggers to print.
        #[arg(long, default_value = "5")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = match &cli.config {
        Some(path) => DevgridConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => DevgridConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.state.data_dir = data_dir;
    }

    match cli.command {
        Command::Run { interval } => {
            if let Some(secs) = interval {
                config.autobuild.interval_secs = secs;
            }
            run(config).await
        }
        Command::Tick { at, prometheus } => {
            tick_once(config, at.unwrap_or_else(Utc::now), prometheus).await
        }
        Command::CheckSchedule { expr, after, count } => {
            check_schedule(&expr, after.unwrap_or_else(Utc::now), count)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,devgridd=debug,devgrid=debug")
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(config: &DevgridConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.state.data_dir)?;
    let db_path = config.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

fn build_policy(config: &DevgridConfig) -> anyhow::Result<Arc<dyn TemplatePolicyProvider>> {
    match config.policy.mode {
        PolicyMode::Open => Ok(Arc::new(OpenPolicy)),
        PolicyMode::Governed => {
            let features = config
                .policy
                .features
                .iter()
                .map(|name| name.parse::<Feature>().map_err(anyhow::Error::msg))
                .collect::<anyhow::Result<Vec<_>>>()?;
            info!(?features, "governed template policy");
            Ok(Arc::new(GovernedPolicy::new(Arc::new(Entitlements::new(features)))))
        }
    }
}

fn build_executor(
    config: &DevgridConfig,
    store: StateStore,
    enqueuer: Arc<dyn NotificationEnqueuer>,
) -> anyhow::Result<Executor> {
    let policy = build_policy(config)?;
    let completion = match config.provisioner.completion {
        CompletionMode::Pending => JobCompletion::Pending,
        CompletionMode::Immediate => JobCompletion::Immediate,
    };
    let orchestrator =
        StoreOrchestrator::new(store.clone(), policy.clone()).with_completion(completion);
    let executor_config = ExecutorConfig::new(config.autobuild.instance_id())?
        .with_batch_size(config.autobuild.batch_size)
        .with_max_concurrency(config.autobuild.max_concurrency);

    Ok(Executor::new(
        Arc::new(store),
        policy,
        Arc::new(orchestrator),
        enqueuer,
        StatsReporter::new(config.autobuild.stats_buffer),
        executor_config,
    ))
}

async fn run(config: DevgridConfig) -> anyhow::Result<()> {
    info!("devgrid daemon starting");

    let store = open_store(&config)?;
    let executor = Arc::new(build_executor(&config, store, Arc::new(NoopEnqueuer))?);
    let interval = Duration::from_secs(config.autobuild.interval_secs.max(1));
    info!(
        instance_id = executor.instance_id(),
        interval_secs = interval.as_secs(),
        "lifecycle executor initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let mut stats_rx = executor.reporter().subscribe();
    let stats_handle = tokio::spawn(async move {
        loop {
            match stats_rx.recv().await {
                Ok(stats) => debug!(metrics = %render_prometheus(&stats), "tick stats"),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "stats subscriber lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let executor_handle = {
        let executor = executor.clone();
        tokio::spawn(async move {
            executor.run(IntervalTicker::new(interval), shutdown_rx).await;
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = executor_handle.await;
    // Dropping the last executor handle closes the stats channel.
    drop(executor);
    let _ = stats_handle.await;

    info!("devgrid daemon stopped");
    Ok(())
}

async fn tick_once(
    config: DevgridConfig,
    at: DateTime<Utc>,
    prometheus: bool,
) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let enqueuer = Arc::new(FakeEnqueuer::default());
    let executor = build_executor(&config, store, enqueuer.clone())?;

    let stats = executor.tick(at).await?;
    for notification in enqueuer.sent() {
        info!(
            template_id = %notification.template_id,
            user_id = %notification.user_id,
            "notification"
        );
    }

    if prometheus {
        print!("{}", render_prometheus(&stats));
    } else {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}

fn check_schedule(expr: &str, after: DateTime<Utc>, count: usize) -> anyhow::Result<()> {
    let schedule = Schedule::parse(expr)?;
    let tz = schedule.timezone();
    let mut cursor = after;
    for _ in 0..count {
        let Some(next) = schedule.next(cursor) else {
            println!("no further triggers");
            break;
        };
        println!(
            "{}  ({})",
            next.to_rfc3339(),
            next.with_timezone(&tz).format("%a %Y-%m-%d %H:%M %Z")
        );
        cursor = next;
    }
    Ok(())
}
