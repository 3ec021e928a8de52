//! DelayLedger - 遅延台帳の照合
//!
//! 「昨日までに終わっているべきもの」と「終わったもの」を突き合わせ、
//! pending の DelinquencyRecord を作成・重複排除・解消します。
//!
//! # 遅延の発生源（それぞれ独立に評価）
//! - A: 期限が今日の開始より前で、未完了・未削除の単発タスク
//! - B: 昨日の TodayInstance のうち単発タスク由来で未完了のもの
//!   （担当者全員の個人ステータスが complete なら除外）
//! - C: 昨日が期日だった定期タスクのうち、昨日付けの complete ノートがないもの
//!
//! 照合の前に、発生源がすでに片付いている（完了・取消・削除）pending を退役させます。
//! 1 つのカテゴリの失敗は他のカテゴリの処理を止めません。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, error, info, warn};

use crate::app::entities::is_settled;
use crate::domain::assignee::all_complete;
use crate::domain::{
    CoreError, DelinquencyRecord, LocalDay, OrgId, SourceKind, SourceRef, StoreError,
    TaskDefinition, UserId,
};
use crate::observability::ReconcileReport;
use crate::ports::{
    AssigneeStatusStore, DelinquencyStore, IdGenerator, InstanceStore, OrgDirectory, TaskStore,
};

/// Something that should have been finished and was not.
#[derive(Debug, Clone)]
struct Candidate {
    source: SourceRef,
    title: String,
    responsible: BTreeSet<UserId>,
    organization: OrgId,
    overdue_since: DateTime<Utc>,
}

/// Result of collecting one category.
#[derive(Default)]
struct Collected {
    candidates: Vec<Candidate>,
    excluded: usize,
}

pub struct DelayLedger {
    tasks: Arc<dyn TaskStore>,
    instances: Arc<dyn InstanceStore>,
    assignees: Arc<dyn AssigneeStatusStore>,
    delinquencies: Arc<dyn DelinquencyStore>,
    orgs: Arc<dyn OrgDirectory>,
    ids: Arc<dyn IdGenerator>,
    tz: FixedOffset,
}

impl DelayLedger {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        instances: Arc<dyn InstanceStore>,
        assignees: Arc<dyn AssigneeStatusStore>,
        delinquencies: Arc<dyn DelinquencyStore>,
        orgs: Arc<dyn OrgDirectory>,
        ids: Arc<dyn IdGenerator>,
        tz: FixedOffset,
    ) -> Self {
        Self {
            tasks,
            instances,
            assignees,
            delinquencies,
            orgs,
            ids,
            tz,
        }
    }

    /// Record every source that fell behind before the local day containing `now`.
    ///
    /// Safe to run any number of times, concurrently or not: a source that
    /// already has a pending record is skipped.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport, CoreError> {
        let today = LocalDay::containing(now, &self.tz);
        let yesterday = today.previous(&self.tz);
        let mut report = ReconcileReport::default();

        match self.retire_settled().await {
            Ok(retired) => report.retired = retired,
            Err(err) => {
                error!(job = "reconcile-delays", category = "settled", error = %err, "category failed");
                report.failed_categories.push("settled".to_string());
            }
        }

        let categories = [
            ("overdue-single", self.overdue_singles(&today).await),
            ("yesterday-single", self.yesterdays_singles(&yesterday).await),
            ("yesterday-recurring", self.yesterdays_recurring(&yesterday, &today).await),
        ];

        for (category, collected) in categories {
            let collected = match collected {
                Ok(collected) => collected,
                Err(err) => {
                    error!(job = "reconcile-delays", category, error = %err, "category failed");
                    report.failed_categories.push(category.to_string());
                    continue;
                }
            };
            report.excluded += collected.excluded;
            for candidate in collected.candidates {
                report.examined += 1;
                self.record(candidate, now, &mut report).await;
            }
        }

        info!(
            job = "reconcile-delays",
            day = %yesterday.date,
            examined = report.examined,
            inserted = report.inserted,
            already_pending = report.already_pending,
            skipped = report.skipped,
            retired = report.retired,
            "delay reconciliation finished"
        );
        Ok(report)
    }

    async fn record(&self, candidate: Candidate, now: DateTime<Utc>, report: &mut ReconcileReport) {
        match self.orgs.organization(candidate.organization).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(source = %candidate.source, org = %candidate.organization, "organization not found; skipping delinquency");
                report.skipped += 1;
                return;
            }
            Err(err) => {
                warn!(source = %candidate.source, error = %err, "organization lookup failed; skipping delinquency");
                report.skipped += 1;
                return;
            }
        }

        let record = DelinquencyRecord {
            id: self.ids.delinquency_id(),
            source: candidate.source,
            title: candidate.title,
            responsible: candidate.responsible,
            organization: candidate.organization,
            overdue_since: candidate.overdue_since,
            created_at: now,
        };
        match self.delinquencies.save_if_not_exists(record).await {
            Ok(true) => {
                debug!(source = %candidate.source, "delinquency recorded");
                report.inserted += 1;
            }
            Ok(false) => report.already_pending += 1,
            Err(err) => {
                warn!(source = %candidate.source, error = %err, "failed to record delinquency");
                report.skipped += 1;
            }
        }
    }

    /// Retire pending records whose source no longer expects any work.
    async fn retire_settled(&self) -> Result<usize, StoreError> {
        let mut retired = 0;
        for record in self.delinquencies.list_pending().await? {
            if is_settled(&*self.tasks, record.source).await? {
                self.delinquencies.delete(record.id).await?;
                debug!(source = %record.source, "settled source; delinquency retired");
                retired += 1;
            }
        }
        Ok(retired)
    }

    /// Every assignee row for `task` says complete.
    async fn finished_by_assignees(&self, task: &TaskDefinition) -> Result<bool, StoreError> {
        let rows = self.assignees.list_for_task(task.id).await?;
        Ok(all_complete(&rows))
    }

    fn single_candidate(task: &TaskDefinition) -> Candidate {
        Candidate {
            source: SourceRef::Single(task.id),
            title: task.title.clone(),
            responsible: task.assignment.responsible.clone(),
            organization: task.assignment.organization,
            overdue_since: task.due_date,
        }
    }

    async fn overdue_singles(&self, today: &LocalDay) -> Result<Collected, StoreError> {
        let mut collected = Collected::default();
        for task in self.tasks.singles_overdue(today.start).await? {
            if self.finished_by_assignees(&task).await? {
                collected.excluded += 1;
                continue;
            }
            collected.candidates.push(Self::single_candidate(&task));
        }
        Ok(collected)
    }

    async fn yesterdays_singles(&self, yesterday: &LocalDay) -> Result<Collected, StoreError> {
        let mut collected = Collected::default();
        let instances = self.instances.list().await?;
        for instance in instances
            .iter()
            .filter(|i| i.day == yesterday.date && i.source.kind() == SourceKind::Single)
        {
            if instance.status.is_resolved() {
                continue;
            }
            let SourceRef::Single(id) = instance.source else {
                continue;
            };
            let Some(task) = self.tasks.get_single(id).await? else {
                continue;
            };
            if task.is_archived() {
                continue;
            }
            if self.finished_by_assignees(&task).await? {
                collected.excluded += 1;
                continue;
            }
            collected.candidates.push(Self::single_candidate(&task));
        }
        Ok(collected)
    }

    /// Yesterday's recurring instances, plus any definition whose rule matched
    /// yesterday, in case today's rebuild already replaced the instance set.
    async fn yesterdays_recurring(
        &self,
        yesterday: &LocalDay,
        today: &LocalDay,
    ) -> Result<Collected, StoreError> {
        let mut due = BTreeMap::new();
        for def in self.tasks.active_recurring().await? {
            if def.frequency.is_due_on(yesterday.date) {
                due.insert(def.id, def);
            }
        }
        for instance in self.instances.list().await? {
            let SourceRef::Recurring(id) = instance.source else {
                continue;
            };
            if instance.day != yesterday.date || due.contains_key(&id) {
                continue;
            }
            if let Some(def) = self.tasks.get_recurring(id).await?
                && !def.is_deleted()
            {
                due.insert(def.id, def);
            }
        }

        let mut collected = Collected::default();
        for def in due.into_values() {
            if def.completed_on(yesterday.date) {
                collected.excluded += 1;
                continue;
            }
            collected.candidates.push(Candidate {
                source: SourceRef::Recurring(def.id),
                title: def.title.clone(),
                responsible: def.assignment.responsible.clone(),
                organization: def.assignment.organization,
                overdue_since: today.start,
            });
        }
        Ok(collected)
    }

    /// Apply the resolution policy after `actor` resolved `source`.
    ///
    /// A privileged actor retires the pending record; anyone else only leaves
    /// its assignee list. Returns whether a pending record was touched.
    pub async fn resolve(
        &self,
        source: SourceRef,
        actor: UserId,
        privileged: bool,
    ) -> Result<bool, CoreError> {
        let Some(mut record) = self.delinquencies.find_pending(source).await? else {
            return Ok(false);
        };
        if privileged {
            self.delinquencies.delete(record.id).await?;
            info!(source = %source, actor = %actor, "delinquency retired");
        } else {
            if !record.responsible.remove(&actor) {
                return Ok(false);
            }
            self.delinquencies.save(&record).await?;
            info!(source = %source, actor = %actor, "assignee left delinquency");
        }
        Ok(true)
    }

    /// Remove reassigned users from the pending record of `source`.
    pub async fn drop_assignees(
        &self,
        source: SourceRef,
        removed: &BTreeSet<UserId>,
    ) -> Result<bool, CoreError> {
        if removed.is_empty() {
            return Ok(false);
        }
        let Some(mut record) = self.delinquencies.find_pending(source).await? else {
            return Ok(false);
        };
        let before = record.responsible.len();
        record.responsible.retain(|u| !removed.contains(u));
        if record.responsible.len() == before {
            return Ok(false);
        }
        self.delinquencies.save(&record).await?;
        info!(source = %source, removed = removed.len(), "reassigned users left delinquency");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::{BrokenSingles, Cast, local, now, recurring, single, tz};
    use crate::domain::{
        FrequencyRule, OrgId, PerAssigneeStatus, RecurringNote, Status, TodayInstance,
    };
    use crate::impls::{InMemoryDirectory, InMemoryStore};
    use crate::ports::{FixedClock, UlidGenerator};
    use ulid::Ulid;

    fn yesterday() -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(2024, 4, 9).unwrap()
    }

    fn ledger_with(
        tasks: Arc<dyn TaskStore>,
        store: &InMemoryStore,
        orgs: Arc<InMemoryDirectory>,
    ) -> DelayLedger {
        DelayLedger::new(
            tasks,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            orgs,
            Arc::new(UlidGenerator::new(FixedClock::new(now()))),
            tz(),
        )
    }

    fn ledger(store: &InMemoryStore, cast: &Cast) -> DelayLedger {
        ledger_with(Arc::new(store.clone()), store, cast.directory())
    }

    #[tokio::test]
    async fn overdue_single_is_recorded_once() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let task = single(cast.assignment(), local(8, 12, 0));
        store.insert_single(task.clone()).await.unwrap();
        let l = ledger(&store, &cast);

        let first = l.reconcile(now()).await.unwrap();
        assert_eq!(first.inserted, 1);
        let second = l.reconcile(now()).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.already_pending, 1);

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source, SourceRef::Single(task.id));
        assert_eq!(pending[0].overdue_since, task.due_date);
    }

    #[tokio::test]
    async fn due_today_is_not_yet_overdue() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        store.insert_single(single(cast.assignment(), local(10, 0, 0))).await.unwrap();

        let report = ledger(&store, &cast).reconcile(now()).await.unwrap();
        assert_eq!(report.inserted, 0);
    }

    #[tokio::test]
    async fn per_assignee_completion_excludes_the_task() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let task = single(cast.assignment(), local(9, 12, 0));
        store.insert_single(task.clone()).await.unwrap();
        store
            .insert_many(vec![TodayInstance::from_single(&task, yesterday())])
            .await
            .unwrap();
        for user in &task.assignment.responsible {
            let mut row = PerAssigneeStatus::new(task.id, *user, now());
            row.status = Status::Complete;
            store.upsert(row).await.unwrap();
        }

        let report = ledger(&store, &cast).reconcile(now()).await.unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.excluded, 2);
    }

    #[tokio::test]
    async fn recurring_without_complete_note_is_recorded() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        // Yesterday was Tuesday the 9th.
        let missed = recurring(cast.assignment(), FrequencyRule::Monthly { day: 9 });
        let mut done = recurring(cast.assignment(), FrequencyRule::Monthly { day: 9 });
        done.notes.push(RecurringNote {
            date: yesterday(),
            author: cast.helper.id,
            status: Status::Complete,
            text: None,
            at: local(9, 17, 0),
        });
        let not_due = recurring(cast.assignment(), FrequencyRule::Monthly { day: 8 });
        for d in [missed.clone(), done, not_due] {
            store.insert_recurring(d).await.unwrap();
        }

        let report = ledger(&store, &cast).reconcile(now()).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.excluded, 1);
        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending[0].source, SourceRef::Recurring(missed.id));
        assert_eq!(pending[0].overdue_since, local(10, 0, 0));
    }

    #[tokio::test]
    async fn unknown_organization_is_skipped() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let mut assignment = cast.assignment();
        assignment.organization = OrgId::from_ulid(Ulid::new());
        store.insert_single(single(assignment, local(8, 12, 0))).await.unwrap();
        store.insert_single(single(cast.assignment(), local(8, 12, 0))).await.unwrap();

        let report = ledger(&store, &cast).reconcile(now()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn failing_single_categories_still_reconcile_recurring() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        store.insert_single(single(cast.assignment(), local(8, 12, 0))).await.unwrap();
        store
            .insert_recurring(recurring(cast.assignment(), FrequencyRule::Daily { include_friday: true }))
            .await
            .unwrap();
        let l = ledger_with(Arc::new(BrokenSingles(store.clone())), &store, cast.directory());

        let report = l.reconcile(now()).await.unwrap();
        assert_eq!(report.failed_categories, vec!["overdue-single".to_string()]);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn concurrent_runs_never_duplicate() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        for day in [5, 6, 7, 8, 9] {
            store.insert_single(single(cast.assignment(), local(day, 12, 0))).await.unwrap();
        }
        let l = Arc::new(ledger(&store, &cast));

        let runs: Vec<_> = (0..8)
            .map(|_| {
                let l = Arc::clone(&l);
                tokio::spawn(async move { l.reconcile(now()).await })
            })
            .collect();
        let mut inserted = 0;
        for run in runs {
            inserted += run.await.unwrap().unwrap().inserted;
        }

        assert_eq!(inserted, 5);
        assert_eq!(store.list_pending().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn limited_resolution_only_removes_the_actor() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let task = single(cast.assignment(), local(8, 12, 0));
        store.insert_single(task.clone()).await.unwrap();
        let l = ledger(&store, &cast);
        l.reconcile(now()).await.unwrap();
        let source = SourceRef::Single(task.id);

        assert!(l.resolve(source, cast.helper.id, false).await.unwrap());
        let record = store.find_pending(source).await.unwrap().unwrap();
        assert!(!record.responsible.contains(&cast.helper.id));

        // The last assignee leaving does not retire the record.
        assert!(l.resolve(source, cast.main.id, false).await.unwrap());
        let record = store.find_pending(source).await.unwrap().unwrap();
        assert!(record.responsible.is_empty());

        assert!(l.resolve(source, cast.admin.id, true).await.unwrap());
        assert!(store.find_pending(source).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn records_of_settled_sources_are_retired() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let task = single(cast.assignment(), local(8, 12, 0));
        store.insert_single(task.clone()).await.unwrap();
        let l = ledger(&store, &cast);
        l.reconcile(now()).await.unwrap();

        let mut done = store.get_single(task.id).await.unwrap().unwrap();
        done.status = Status::Complete;
        store.save_single(&done).await.unwrap();

        let report = l.reconcile(now()).await.unwrap();
        assert_eq!((report.retired, report.inserted), (1, 0));
        assert!(store.find_pending(SourceRef::Single(task.id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reassignment_drops_users_from_the_record() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let task = single(cast.assignment(), local(8, 12, 0));
        store.insert_single(task.clone()).await.unwrap();
        let l = ledger(&store, &cast);
        l.reconcile(now()).await.unwrap();
        let source = SourceRef::Single(task.id);

        let removed = BTreeSet::from([cast.helper.id]);
        assert!(l.drop_assignees(source, &removed).await.unwrap());
        assert!(!l.drop_assignees(source, &removed).await.unwrap());
        let record = store.find_pending(source).await.unwrap().unwrap();
        assert_eq!(record.responsible, BTreeSet::from([cast.main.id]));
    }
}
