//! dueday - daily task tracker jobs from the command line
//!
//! 状態は JSON スナップショット（`--data`）に保存され、ジョブの後に書き戻されます。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use dueday_core::app::{App, AppBuilder, JobName, JobObserver};
use dueday_core::config::Config;
use dueday_core::domain::{CoreError, FrequencyRule};
use dueday_core::impls::{DataFile, InMemoryDirectory, InMemoryStore};
use dueday_core::observability::{JobReport, init_tracing};

/// Recurring and one-off task tracking: materialize today, reconcile delays, raise alerts.
#[derive(Parser)]
#[command(name = "dueday", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "DUEDAY_CONFIG")]
    config: Option<PathBuf>,

    /// JSON snapshot holding users, organizations and tasks.
    #[arg(short, long, env = "DUEDAY_DATA", default_value = "dueday.json")]
    data: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one job now and save the snapshot.
    Run {
        /// materialize-today, reconcile-delays or generate-alerts
        job: String,
    },

    /// Run the daily scheduler until Ctrl-C.
    Serve,

    /// Evaluate a frequency rule for a local date.
    IsDue {
        /// e.g. '{"kind":"monthly","day":15}'
        rule: String,
        /// YYYY-MM-DD
        date: String,
    },

    /// Print pending delinquency records as JSON.
    Pending,
}

/// Loaded snapshot plus the app wired over it.
struct Workspace {
    app: App,
    store: InMemoryStore,
    directory: Arc<InMemoryDirectory>,
    path: PathBuf,
}

impl Workspace {
    fn open(config: Config, path: &Path) -> anyhow::Result<Self> {
        let data = DataFile::load(path)?;
        let directory = Arc::new(InMemoryDirectory::from_parts(data.users, data.organizations));
        let store = InMemoryStore::from_snapshot(data.store);
        let app = AppBuilder::new(config)
            .with_in_memory_store(store.clone())
            .with_directory(directory.clone())
            .build()
            .context("failed to wire the app")?;
        Ok(Self {
            app,
            store,
            directory,
            path: path.to_path_buf(),
        })
    }

    async fn persist(&self) -> anyhow::Result<()> {
        persist(&self.store, &self.directory, &self.path).await
    }
}

async fn persist(
    store: &InMemoryStore,
    directory: &InMemoryDirectory,
    path: &Path,
) -> anyhow::Result<()> {
    let data = DataFile {
        users: directory.users().cloned().collect(),
        organizations: directory.organizations().cloned().collect(),
        store: store.snapshot().await,
    };
    data.save(path)?;
    Ok(())
}

/// Saves the snapshot after every scheduled run.
struct Persist {
    store: InMemoryStore,
    directory: Arc<InMemoryDirectory>,
    path: PathBuf,
}

#[async_trait]
impl JobObserver for Persist {
    async fn job_finished(&self, job: JobName, _result: &Result<JobReport, CoreError>) {
        if let Err(err) = persist(&self.store, &self.directory, &self.path).await {
            error!(%job, error = %err, "failed to save snapshot");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");
    let cli = Cli::parse();

    let config = Config::load_or_default(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("failed to load config {}", path.display()),
        None => "invalid default config".to_string(),
    })?;

    match cli.command {
        Command::Run { job } => run_job(config, &cli.data, &job).await,
        Command::Serve => serve(config, &cli.data).await,
        Command::IsDue { rule, date } => is_due(&rule, &date),
        Command::Pending => pending(config, &cli.data).await,
    }
}

async fn run_job(config: Config, data: &Path, job: &str) -> anyhow::Result<()> {
    let job: JobName = job.parse()?;
    let ws = Workspace::open(config, data)?;
    let report = ws.app.run_job(job).await?;
    ws.persist().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn serve(config: Config, data: &Path) -> anyhow::Result<()> {
    let ws = Workspace::open(config, data)?;
    let observer = Arc::new(Persist {
        store: ws.store.clone(),
        directory: ws.directory.clone(),
        path: ws.path.clone(),
    });
    let scheduler = ws.app.spawn_scheduler(observer);
    info!(data = %ws.path.display(), "scheduler running; Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    scheduler.shutdown_and_join().await;
    ws.persist().await
}

fn is_due(rule: &str, date: &str) -> anyhow::Result<()> {
    let rule: FrequencyRule =
        serde_json::from_str(rule).context("rule must be a JSON frequency rule")?;
    let rule = rule.normalized()?;
    let Ok(date) = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d") else {
        bail!("date must be YYYY-MM-DD, got {date:?}");
    };
    let due = rule.is_due_on(date);
    println!(
        "{}",
        serde_json::json!({ "rule": rule.to_string(), "date": date, "due": due })
    );
    Ok(())
}

async fn pending(config: Config, data: &Path) -> anyhow::Result<()> {
    let ws = Workspace::open(config, data)?;
    let pending = ws.app.queries.pending_delinquencies().await?;
    println!("{}", serde_json::to_string_pretty(&pending)?);
    Ok(())
}
