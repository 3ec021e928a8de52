//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 設定の不備やポートの欠落は build() で返す
//! - 省略可能なポートには開発用のデフォルトを入れる

use std::sync::Arc;

use chrono::{FixedOffset, NaiveTime};

use crate::app::alerts::AlertGenerator;
use crate::app::ledger::DelayLedger;
use crate::app::materializer::TodayMaterializer;
use crate::app::mutation::MutationEngine;
use crate::app::queries::Queries;
use crate::app::scheduler::{DailyScheduler, JobName, JobObserver, Jobs};
use crate::config::{Config, ConfigError, parse_time_of_day};
use crate::domain::CoreError;
use crate::impls::{ActivityTracker, DirectoryResolver, InMemoryDirectory, InMemoryStore, TracingAlertSink};
use crate::observability::JobReport;
use crate::ports::{
    AlertSink, AssigneeStatusStore, Clock, DelinquencyStore, DisplayNameResolver, HistoryStore,
    IdGenerator, InstanceStore, OrgDirectory, SystemClock, TaskStore, UlidGenerator,
    UserDirectory,
};

/// Every collaborator the app layer talks to.
#[derive(Clone)]
pub struct Ports {
    pub tasks: Arc<dyn TaskStore>,
    pub instances: Arc<dyn InstanceStore>,
    pub assignees: Arc<dyn AssigneeStatusStore>,
    pub delinquencies: Arc<dyn DelinquencyStore>,
    pub history: Arc<dyn HistoryStore>,
    pub users: Arc<dyn UserDirectory>,
    pub orgs: Arc<dyn OrgDirectory>,
    pub names: Arc<dyn DisplayNameResolver>,
    pub alerts: Arc<dyn AlertSink>,
    pub ids: Arc<dyn IdGenerator>,
    pub clock: Arc<dyn Clock>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing port: {0}. Provide it on the builder before build().")]
    MissingPort(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(config)
///     .with_in_memory_store(store)
///     .with_directory(directory)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - ストアとディレクトリは必須。欠けていれば BuildError::MissingPort
/// - Clock / IdGenerator / 表示名解決 / AlertSink は省略時にデフォルトを使う
pub struct AppBuilder {
    config: Config,
    tasks: Option<Arc<dyn TaskStore>>,
    instances: Option<Arc<dyn InstanceStore>>,
    assignees: Option<Arc<dyn AssigneeStatusStore>>,
    delinquencies: Option<Arc<dyn DelinquencyStore>>,
    history: Option<Arc<dyn HistoryStore>>,
    users: Option<Arc<dyn UserDirectory>>,
    orgs: Option<Arc<dyn OrgDirectory>>,
    names: Option<Arc<dyn DisplayNameResolver>>,
    alerts: Option<Arc<dyn AlertSink>>,
    ids: Option<Arc<dyn IdGenerator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            tasks: None,
            instances: None,
            assignees: None,
            delinquencies: None,
            history: None,
            users: None,
            orgs: None,
            names: None,
            alerts: None,
            ids: None,
            clock: None,
        }
    }

    /// Use one in-memory store for every store port.
    pub fn with_in_memory_store(mut self, store: InMemoryStore) -> Self {
        self.tasks = Some(Arc::new(store.clone()));
        self.instances = Some(Arc::new(store.clone()));
        self.assignees = Some(Arc::new(store.clone()));
        self.delinquencies = Some(Arc::new(store.clone()));
        self.history = Some(Arc::new(store));
        self
    }

    /// Use one in-memory directory for users and organizations.
    pub fn with_directory(mut self, directory: Arc<InMemoryDirectory>) -> Self {
        self.users = Some(directory.clone());
        self.orgs = Some(directory);
        self
    }

    pub fn with_task_store(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_instance_store(mut self, instances: Arc<dyn InstanceStore>) -> Self {
        self.instances = Some(instances);
        self
    }

    pub fn with_assignee_store(mut self, assignees: Arc<dyn AssigneeStatusStore>) -> Self {
        self.assignees = Some(assignees);
        self
    }

    pub fn with_delinquency_store(mut self, delinquencies: Arc<dyn DelinquencyStore>) -> Self {
        self.delinquencies = Some(delinquencies);
        self
    }

    pub fn with_history_store(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_user_directory(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_org_directory(mut self, orgs: Arc<dyn OrgDirectory>) -> Self {
        self.orgs = Some(orgs);
        self
    }

    pub fn with_name_resolver(mut self, names: Arc<dyn DisplayNameResolver>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - 設定（タイムゾーン、時刻、しきい値）
    /// - 必須ポートがすべて設定されているか
    pub fn build(self) -> Result<App, BuildError> {
        let config = self.config;
        config.validate()?;
        let tz = config.tz()?;
        let plan = schedule_plan(&config)?;

        let users = self.users.ok_or(BuildError::MissingPort("user directory"))?;
        let orgs = self.orgs.ok_or(BuildError::MissingPort("organization directory"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ports = Ports {
            tasks: self.tasks.ok_or(BuildError::MissingPort("task store"))?,
            instances: self.instances.ok_or(BuildError::MissingPort("instance store"))?,
            assignees: self
                .assignees
                .ok_or(BuildError::MissingPort("assignee status store"))?,
            delinquencies: self
                .delinquencies
                .ok_or(BuildError::MissingPort("delinquency store"))?,
            history: self.history.ok_or(BuildError::MissingPort("history store"))?,
            names: self
                .names
                .unwrap_or_else(|| Arc::new(DirectoryResolver::new(users.clone(), orgs.clone()))),
            alerts: self.alerts.unwrap_or_else(|| Arc::new(TracingAlertSink)),
            ids: self
                .ids
                .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone()))),
            users,
            orgs,
            clock,
        };

        let ledger = Arc::new(DelayLedger::new(
            ports.tasks.clone(),
            ports.instances.clone(),
            ports.assignees.clone(),
            ports.delinquencies.clone(),
            ports.orgs.clone(),
            ports.ids.clone(),
            tz,
        ));
        let materializer = Arc::new(TodayMaterializer::new(
            ports.tasks.clone(),
            ports.instances.clone(),
            tz,
            config.materializer.atomic_rebuild,
        ));
        let queries = Arc::new(
            Queries::new(
                ports.tasks.clone(),
                ports.instances.clone(),
                ports.assignees.clone(),
                ports.delinquencies.clone(),
                ports.history.clone(),
                ports.users.clone(),
                tz,
            )
            .with_thresholds(config.alerts.stale_drawer_days, config.alerts.long_open_days),
        );
        let alerts = Arc::new(AlertGenerator::new(
            queries.clone(),
            ports.users.clone(),
            ports.alerts.clone(),
            config.alert_dedupe_ttl(),
            tz,
        ));
        let activity = Arc::new(ActivityTracker::new(config.activity_ttl()));
        let mutations = Arc::new(MutationEngine::new(
            ports.clone(),
            ledger.clone(),
            activity.clone(),
            tz,
        ));
        let jobs = Arc::new(Jobs::new(
            materializer.clone(),
            ledger.clone(),
            alerts.clone(),
            ports.clock.clone(),
        ));

        Ok(App {
            config,
            tz,
            plan,
            ports,
            materializer,
            mutations,
            ledger,
            alerts,
            queries,
            activity,
            jobs,
        })
    }
}

fn schedule_plan(config: &Config) -> Result<Vec<(JobName, NaiveTime)>, ConfigError> {
    let schedule = &config.schedule;
    [
        (JobName::ReconcileDelays, &schedule.reconcile_delays),
        (JobName::MaterializeToday, &schedule.materialize_today),
        (JobName::GenerateAlerts, &schedule.generate_alerts),
    ]
    .into_iter()
    .map(|(job, raw)| {
        parse_time_of_day(raw)
            .map(|at| (job, at))
            .ok_or_else(|| ConfigError::Invalid(format!("{job}: bad time {raw:?}")))
    })
    .collect()
}

/// App はアプリケーションのランタイム
///
/// 各コンポーネントは Arc で共有され、CLI やスケジューラから並行に呼べます。
pub struct App {
    pub config: Config,
    pub tz: FixedOffset,
    pub plan: Vec<(JobName, NaiveTime)>,
    pub ports: Ports,
    pub materializer: Arc<TodayMaterializer>,
    pub mutations: Arc<MutationEngine>,
    pub ledger: Arc<DelayLedger>,
    pub alerts: Arc<AlertGenerator>,
    pub queries: Arc<Queries>,
    pub activity: Arc<ActivityTracker>,
    pub jobs: Arc<Jobs>,
}

impl App {
    /// Run one job now.
    pub async fn run_job(&self, job: JobName) -> Result<JobReport, CoreError> {
        self.jobs.run(job).await
    }

    /// Start the daily scheduler with the configured plan.
    pub fn spawn_scheduler(&self, observer: Arc<dyn JobObserver>) -> DailyScheduler {
        DailyScheduler::spawn(self.jobs.clone(), self.plan.clone(), self.tz, observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::{Cast, now};
    use crate::ports::FixedClock;

    fn complete(config: Config) -> AppBuilder {
        AppBuilder::new(config)
            .with_in_memory_store(InMemoryStore::new())
            .with_directory(Cast::new().directory())
            .with_clock(Arc::new(FixedClock::new(now())))
    }

    #[test]
    fn test_build_success() {
        let app = complete(Config::default()).build().unwrap();
        assert_eq!(app.tz, FixedOffset::east_opt(3 * 3600).unwrap());
        assert_eq!(app.plan.len(), 3);
    }

    #[test]
    fn test_build_missing_directory() {
        let app = AppBuilder::new(Config::default())
            .with_in_memory_store(InMemoryStore::new())
            .build();
        assert!(matches!(app, Err(BuildError::MissingPort("user directory"))));
    }

    #[test]
    fn test_build_missing_store() {
        let app = AppBuilder::new(Config::default())
            .with_directory(Cast::new().directory())
            .build();
        assert!(matches!(app, Err(BuildError::MissingPort("task store"))));
    }

    #[test]
    fn test_build_rejects_bad_config() {
        let mut config = Config::default();
        config.timezone = "Europe/Istanbul".into();
        assert!(matches!(
            complete(config).build(),
            Err(BuildError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn test_run_job_by_name() {
        let app = complete(Config::default()).build().unwrap();
        let report = app.run_job(JobName::MaterializeToday).await.unwrap();
        assert!(matches!(report, JobReport::MaterializeToday(r) if r.total() == 0));
    }
}
