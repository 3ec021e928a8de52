//! Scheduler - 3 つの日次ジョブを決まったローカル時刻に起動する
//!
//! # ジョブ
//! - `materialize-today`: TodayInstance の再構築 + days_open の再計算
//! - `reconcile-delays`: 遅延台帳の照合
//! - `generate-alerts`: 通知の生成
//!
//! どのジョブも 1 日に何回（0 回を含む）呼ばれても安全です。
//! 停止は watch チャネルで伝え、実行中のジョブは最後まで走らせます。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::alerts::AlertGenerator;
use crate::app::ledger::DelayLedger;
use crate::app::materializer::TodayMaterializer;
use crate::domain::calendar::local_to_utc;
use crate::domain::{CoreError, LocalDay};
use crate::observability::JobReport;
use crate::ports::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobName {
    MaterializeToday,
    ReconcileDelays,
    GenerateAlerts,
}

impl JobName {
    pub const ALL: [JobName; 3] = [
        JobName::MaterializeToday,
        JobName::ReconcileDelays,
        JobName::GenerateAlerts,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobName::MaterializeToday => "materialize-today",
            JobName::ReconcileDelays => "reconcile-delays",
            JobName::GenerateAlerts => "generate-alerts",
        }
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobName::ALL
            .into_iter()
            .find(|job| job.as_str() == s.trim())
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "unknown job {s:?}; expected one of materialize-today, reconcile-delays, generate-alerts"
                ))
            })
    }
}

/// First instant strictly after `after` whose local wall-clock time is `at`.
pub fn next_fire(after: DateTime<Utc>, at: NaiveTime, tz: &FixedOffset) -> DateTime<Utc> {
    let today = LocalDay::containing(after, tz).date;
    let candidate = local_to_utc(today, at, tz);
    if candidate > after {
        candidate
    } else {
        local_to_utc(today + Duration::days(1), at, tz)
    }
}

/// The three jobs, runnable by name.
pub struct Jobs {
    materializer: Arc<TodayMaterializer>,
    ledger: Arc<DelayLedger>,
    alerts: Arc<AlertGenerator>,
    clock: Arc<dyn Clock>,
}

impl Jobs {
    pub fn new(
        materializer: Arc<TodayMaterializer>,
        ledger: Arc<DelayLedger>,
        alerts: Arc<AlertGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            materializer,
            ledger,
            alerts,
            clock,
        }
    }

    pub async fn run(&self, job: JobName) -> Result<JobReport, CoreError> {
        let now = self.clock.now();
        Ok(match job {
            JobName::MaterializeToday => JobReport::MaterializeToday(self.materializer.run(now).await?),
            JobName::ReconcileDelays => JobReport::ReconcileDelays(self.ledger.reconcile(now).await?),
            JobName::GenerateAlerts => JobReport::GenerateAlerts(self.alerts.run(now).await?),
        })
    }
}

/// Told about every scheduled run, e.g. to persist state afterwards.
#[async_trait]
pub trait JobObserver: Send + Sync {
    async fn job_finished(&self, job: JobName, result: &Result<JobReport, CoreError>);
}

/// Handle to the running scheduler tasks.
/// - `shutdown_and_join()` で停止し、全タスクの終了を待つ
pub struct DailyScheduler {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl DailyScheduler {
    /// Spawn one task per planned job.
    pub fn spawn(
        jobs: Arc<Jobs>,
        plan: Vec<(JobName, NaiveTime)>,
        tz: FixedOffset,
        observer: Arc<dyn JobObserver>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(plan.len());
        for (job, at) in plan {
            let jobs = Arc::clone(&jobs);
            let observer = Arc::clone(&observer);
            let mut rx = shutdown_rx.clone();
            info!(%job, at = %at.format("%H:%M"), "job scheduled");

            joins.push(tokio::spawn(async move {
                job_loop(job, at, tz, jobs, observer, &mut rx).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    /// Stop scheduling new runs. A run already in progress finishes.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn job_loop(
    job: JobName,
    at: NaiveTime,
    tz: FixedOffset,
    jobs: Arc<Jobs>,
    observer: Arc<dyn JobObserver>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let now = jobs.clock.now();
        let after = last_fire.map_or(now, |last| last.max(now));
        let fire = next_fire(after, at, &tz);
        let wait = (fire - now).to_std().unwrap_or_default();

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        last_fire = Some(fire);
        let result = jobs.run(job).await;
        match &result {
            Ok(report) => info!(%job, report = ?report, "scheduled job finished"),
            Err(err) => error!(%job, error = %err, "scheduled job failed"),
        }
        observer.job_finished(job, &result).await;
    }
    info!(%job, "job loop stopped");
}
