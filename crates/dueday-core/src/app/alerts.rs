//! AlertGenerator - 遅延・放置・長期未完了の通知を作る
//!
//! # フロー
//! 1. 期限切れのキーを掃除
//! 2. カテゴリごとに候補を読む（pending の遅延 / 放置された drawer / 長期未完了）
//! 3. (kind, source, ローカル日) で重複排除し、AlertSink に渡す
//!
//! 配送に失敗した Alert はキーを戻すので、次の実行で再送されます。

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use tracing::{error, info, warn};

use crate::app::queries::Queries;
use crate::domain::{Alert, AlertKind, CoreError, LocalDay, Role, SourceRef, UserId};
use crate::impls::TtlStore;
use crate::observability::AlertReport;
use crate::ports::{AlertSink, UserDirectory};

type DedupeKey = (AlertKind, SourceRef, NaiveDate);

pub struct AlertGenerator {
    queries: Arc<Queries>,
    users: Arc<dyn UserDirectory>,
    sink: Arc<dyn AlertSink>,
    raised: TtlStore<DedupeKey, DateTime<Utc>>,
    tz: FixedOffset,
}

impl AlertGenerator {
    pub fn new(
        queries: Arc<Queries>,
        users: Arc<dyn UserDirectory>,
        sink: Arc<dyn AlertSink>,
        dedupe_ttl: chrono::Duration,
        tz: FixedOffset,
    ) -> Self {
        Self {
            queries,
            users,
            sink,
            raised: TtlStore::new(dedupe_ttl),
            tz,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<AlertReport, CoreError> {
        let day = LocalDay::containing(now, &self.tz).date;
        let mut report = AlertReport::default();
        self.raised.evict_expired(now);

        let mut alerts = Vec::new();
        match self.overdue(day, now).await {
            Ok(found) => alerts.extend(found),
            Err(err) => fail(&mut report, AlertKind::Overdue, &err),
        }
        match self.stale_drawer(day, now).await {
            Ok(found) => alerts.extend(found),
            Err(err) => fail(&mut report, AlertKind::StaleDrawer, &err),
        }
        match self.long_open(day, now).await {
            Ok(found) => alerts.extend(found),
            Err(err) => fail(&mut report, AlertKind::LongOpen, &err),
        }

        for alert in alerts {
            let key = alert.dedupe_key();
            if !self.raised.insert_if_absent(key, now, now) {
                report.deduped += 1;
                continue;
            }
            match self.sink.deliver(&alert).await {
                Ok(()) => report.raised += 1,
                Err(err) => {
                    warn!(
                        job = "generate-alerts",
                        kind = %alert.kind,
                        source = %alert.source,
                        error = %err,
                        "alert delivery failed"
                    );
                    self.raised.remove(&key);
                    report.failed += 1;
                }
            }
        }

        info!(
            job = "generate-alerts",
            %day,
            raised = report.raised,
            deduped = report.deduped,
            failed = report.failed,
            "alerts generated"
        );
        Ok(report)
    }

    async fn overdue(&self, day: NaiveDate, now: DateTime<Utc>) -> Result<Vec<Alert>, CoreError> {
        Ok(self
            .queries
            .pending_delinquencies()
            .await?
            .into_iter()
            .filter(|r| !r.responsible.is_empty())
            .map(|r| Alert {
                kind: AlertKind::Overdue,
                source: r.source,
                title: r.title,
                recipients: r.responsible,
                day,
                raised_at: now,
            })
            .collect())
    }

    async fn stale_drawer(
        &self,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, CoreError> {
        Ok(self
            .queries
            .stale_drawer_tasks(now)
            .await?
            .into_iter()
            .map(|t| Alert {
                kind: AlertKind::StaleDrawer,
                source: SourceRef::Single(t.id),
                title: t.title,
                recipients: t.assignment.responsible,
                day,
                raised_at: now,
            })
            .collect())
    }

    async fn long_open(&self, day: NaiveDate, now: DateTime<Utc>) -> Result<Vec<Alert>, CoreError> {
        let tasks = self.queries.long_open_tasks(now).await?;
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let admins: BTreeSet<UserId> = match self.users.users_with_role(Role::Admin).await {
            Ok(admins) => admins.into_iter().map(|u| u.id).collect(),
            Err(err) => {
                warn!(job = "generate-alerts", error = %err, "admin lookup failed; alerting assignees only");
                BTreeSet::new()
            }
        };
        Ok(tasks
            .into_iter()
            .map(|t| {
                let mut recipients = t.assignment.responsible;
                recipients.extend(admins.iter().copied());
                Alert {
                    kind: AlertKind::LongOpen,
                    source: SourceRef::Single(t.id),
                    title: t.title,
                    recipients,
                    day,
                    raised_at: now,
                }
            })
            .collect())
    }
}

fn fail(report: &mut AlertReport, kind: AlertKind, err: &CoreError) {
    error!(job = "generate-alerts", category = %kind, error = %err, "failed to collect alerts");
    report.failed_categories.push(kind.to_string());
}
