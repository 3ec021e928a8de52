//! Queries - 読み取り専用のクエリ
//!
//! 通知生成や CLI が読む面です。書き込みは一切行いません。
//! - 個人行があればそれが共有ステータスより優先（final status）
//! - 履歴は書き込みと同じ権限ティアでフィルタ

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};

use crate::app::entities::{is_settled, load_source};
use crate::domain::assignee::final_status;
use crate::domain::permission::{self, PermissionLevel};
use crate::domain::{
    CoreError, DelinquencyRecord, EntityRef, HistoryRecord, Importance, LocalDay, SourceRef,
    Status, TaskDefinition, TaskId, TodayInstance, UserId,
};
use crate::ports::{
    AssigneeStatusStore, DelinquencyStore, HistoryStore, InstanceStore, TaskStore, UserDirectory,
};

pub struct Queries {
    tasks: Arc<dyn TaskStore>,
    instances: Arc<dyn InstanceStore>,
    assignees: Arc<dyn AssigneeStatusStore>,
    delinquencies: Arc<dyn DelinquencyStore>,
    history: Arc<dyn HistoryStore>,
    users: Arc<dyn UserDirectory>,
    tz: FixedOffset,
    stale_drawer_days: i64,
    long_open_days: i64,
}

impl Queries {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        instances: Arc<dyn InstanceStore>,
        assignees: Arc<dyn AssigneeStatusStore>,
        delinquencies: Arc<dyn DelinquencyStore>,
        history: Arc<dyn HistoryStore>,
        users: Arc<dyn UserDirectory>,
        tz: FixedOffset,
    ) -> Self {
        Self {
            tasks,
            instances,
            assignees,
            delinquencies,
            history,
            users,
            tz,
            stale_drawer_days: 14,
            long_open_days: 30,
        }
    }

    pub fn with_thresholds(mut self, stale_drawer_days: i64, long_open_days: i64) -> Self {
        self.stale_drawer_days = stale_drawer_days;
        self.long_open_days = long_open_days;
        self
    }

    /// Pending records, leaving out those whose source is already settled
    /// and only waiting for the next reconcile to retire them.
    pub async fn pending_delinquencies(&self) -> Result<Vec<DelinquencyRecord>, CoreError> {
        let mut pending = Vec::new();
        for record in self.delinquencies.list_pending().await? {
            if !is_settled(&*self.tasks, record.source).await? {
                pending.push(record);
            }
        }
        pending.sort_by_key(|r| (r.overdue_since, r.source));
        Ok(pending)
    }

    /// Open drawer-class tasks not updated for `stale_drawer_days`.
    pub async fn stale_drawer_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskDefinition>, CoreError> {
        let Some(cutoff) =
            Duration::try_days(self.stale_drawer_days).and_then(|d| now.checked_sub_signed(d))
        else {
            return Ok(Vec::new());
        };
        let mut stale: Vec<_> = self
            .tasks
            .open_singles()
            .await?
            .into_iter()
            .filter(|t| t.importance == Importance::Drawer && t.updated_at <= cutoff)
            .collect();
        stale.sort_by_key(|t| t.updated_at);
        Ok(stale)
    }

    /// Open single tasks created at least `long_open_days` local days ago.
    pub async fn long_open_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskDefinition>, CoreError> {
        let today = LocalDay::containing(now, &self.tz);
        let mut long_open: Vec<_> = self
            .tasks
            .open_singles()
            .await?
            .into_iter()
            .filter(|t| {
                let created = t.created_at.with_timezone(&self.tz).date_naive();
                today.days_since(created) >= self.long_open_days
            })
            .collect();
        long_open.sort_by_key(|t| t.created_at);
        Ok(long_open)
    }

    /// Today's instances `user` works on, with their own status where they set one:
    /// their assignee row on a one-off task, their note for the day on a recurring one.
    pub async fn today_for_user(&self, user: UserId) -> Result<Vec<TodayInstance>, CoreError> {
        let mut mine = Vec::new();
        for mut instance in self.instances.list().await? {
            if !instance.visible_to(user) {
                continue;
            }
            match instance.source {
                SourceRef::Single(task) => {
                    let row = self.assignees.find(task, user).await?;
                    instance.status = final_status(instance.status, row.as_ref());
                }
                SourceRef::Recurring(id) => {
                    let own = self.tasks.get_recurring(id).await?.and_then(|def| {
                        def.note_by(user, instance.day).map(|n| n.status)
                    });
                    if let Some(status) = own {
                        instance.status = status;
                    }
                }
            }
            mine.push(instance);
        }
        mine.sort_by(|a, b| (a.importance, &a.title).cmp(&(b.importance, &b.title)));
        Ok(mine)
    }

    /// The status `user` sees for `task`.
    pub async fn final_status(&self, task: TaskId, user: UserId) -> Result<Status, CoreError> {
        let shared = self
            .tasks
            .get_single(task)
            .await?
            .ok_or_else(|| CoreError::not_found("task", task))?
            .status;
        let row = self.assignees.find(task, user).await?;
        Ok(final_status(shared, row.as_ref()))
    }

    /// History of `target`, filtered by what `reader` may see.
    pub async fn history(
        &self,
        target: EntityRef,
        reader: UserId,
    ) -> Result<Vec<HistoryRecord>, CoreError> {
        let user = self
            .users
            .user(reader)
            .await?
            .ok_or_else(|| CoreError::not_found("user", reader))?;
        let entity = load_source(&*self.tasks, &*self.instances, target).await?;

        let mut records = self.history.list_for(entity.source()).await?;
        match permission::level(&entity, &user) {
            PermissionLevel::None => {
                return Err(CoreError::Forbidden(format!(
                    "{reader} may not read the history of {}",
                    entity.source()
                )));
            }
            PermissionLevel::Limited => records.retain(|r| r.actor == reader),
            PermissionLevel::Full => {}
        }
        records.sort_by_key(|r| (r.at, r.id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::{Cast, local, now, recurring, single, tz};
    use crate::domain::{FrequencyRule, HistoryScope, PerAssigneeStatus, RecurringNote};
    use crate::impls::InMemoryStore;
    use crate::ports::IdGenerator;
    use crate::ports::{FixedClock, UlidGenerator};

    fn queries(store: &InMemoryStore, cast: &Cast) -> Queries {
        Queries::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            cast.directory(),
            tz(),
        )
        .with_thresholds(14, 30)
    }

    #[tokio::test]
    async fn stale_drawer_tasks_use_the_update_time() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let mut stale = single(cast.assignment(), local(1, 9, 0));
        stale.importance = Importance::Drawer;
        stale.sub_importance = None;
        stale.updated_at = now() - Duration::days(15);
        let mut fresh = stale.clone();
        fresh.id = TaskId::from_ulid(ulid::Ulid::new());
        fresh.updated_at = now() - Duration::days(2);
        let mut urgent = stale.clone();
        urgent.id = TaskId::from_ulid(ulid::Ulid::new());
        urgent.importance = Importance::High;
        let stale_id = stale.id;
        for t in [stale, fresh, urgent] {
            store.insert_single(t).await.unwrap();
        }

        let found = queries(&store, &cast).stale_drawer_tasks(now()).await.unwrap();
        assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![stale_id]);
    }

    #[tokio::test]
    async fn out_of_range_stale_threshold_finds_nothing() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let mut drawer = single(cast.assignment(), local(1, 9, 0));
        drawer.importance = Importance::Drawer;
        drawer.sub_importance = None;
        store.insert_single(drawer).await.unwrap();

        let q = queries(&store, &cast).with_thresholds(i64::MAX, 30);
        assert!(q.stale_drawer_tasks(now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn long_open_counts_local_days_since_creation() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let mut old = single(cast.assignment(), local(1, 9, 0));
        // 2024-03-11 23:30 local: exactly thirty local days before the 10th.
        old.created_at = local(10, 23, 30) - Duration::days(30);
        let mut young = old.clone();
        young.id = TaskId::from_ulid(ulid::Ulid::new());
        young.created_at = local(11, 0, 30) - Duration::days(30);
        let old_id = old.id;
        store.insert_single(old).await.unwrap();
        store.insert_single(young).await.unwrap();

        let found = queries(&store, &cast).long_open_tasks(now()).await.unwrap();
        assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![old_id]);
    }

    #[tokio::test]
    async fn personal_row_wins_over_shared_status() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let task = single(cast.assignment(), local(10, 10, 0));
        let id = task.id;
        store.insert_single(task.clone()).await.unwrap();
        store
            .insert_many(vec![TodayInstance::from_single(&task, now().date_naive())])
            .await
            .unwrap();
        let mut row = PerAssigneeStatus::new(id, cast.helper.id, now());
        row.status = Status::Complete;
        store.upsert(row).await.unwrap();

        let q = queries(&store, &cast);
        assert_eq!(q.final_status(id, cast.helper.id).await.unwrap(), Status::Complete);
        assert_eq!(q.final_status(id, cast.main.id).await.unwrap(), Status::Pending);

        let today = q.today_for_user(cast.helper.id).await.unwrap();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].status, Status::Complete);
        assert!(q.today_for_user(cast.outsider.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn own_recurring_note_wins_for_the_day() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let mut def = recurring(cast.assignment(), FrequencyRule::Daily { include_friday: true });
        let today = now().date_naive();
        def.notes.push(RecurringNote {
            date: today,
            author: cast.helper.id,
            status: Status::Complete,
            text: None,
            at: now(),
        });
        def.notes.push(RecurringNote {
            date: today - Duration::days(1),
            author: cast.main.id,
            status: Status::Complete,
            text: None,
            at: now() - Duration::days(1),
        });
        store.insert_recurring(def.clone()).await.unwrap();
        store
            .insert_many(vec![TodayInstance::from_recurring(&def, today)])
            .await
            .unwrap();

        let q = queries(&store, &cast);
        let helper = q.today_for_user(cast.helper.id).await.unwrap();
        assert_eq!(helper[0].status, Status::Complete);
        // Yesterday's note does not carry over.
        let main = q.today_for_user(cast.main.id).await.unwrap();
        assert_eq!(main[0].status, Status::Pending);
    }

    #[tokio::test]
    async fn hidden_instances_are_left_out() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let mut task = single(cast.assignment(), local(10, 10, 0));
        task.hidden_for.insert(cast.helper.id);
        store
            .insert_many(vec![TodayInstance::from_single(&task, now().date_naive())])
            .await
            .unwrap();

        let q = queries(&store, &cast);
        assert!(q.today_for_user(cast.helper.id).await.unwrap().is_empty());
        assert_eq!(q.today_for_user(cast.main.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_is_filtered_by_tier() {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let task = single(cast.assignment(), local(10, 10, 0));
        let source = SourceRef::Single(task.id);
        store.insert_single(task.clone()).await.unwrap();

        let ids = UlidGenerator::new(FixedClock::new(now()));
        let record = |actor: UserId, scope| HistoryRecord {
            id: ids.history_id(),
            source,
            field: "status".into(),
            before: Some("pending".into()),
            after: Some("complete".into()),
            actor,
            at: now(),
            scope,
        };
        store
            .append(&[
                record(cast.main.id, HistoryScope::Shared),
                record(cast.helper.id, HistoryScope::Personal),
            ])
            .await
            .unwrap();

        let q = queries(&store, &cast);
        let target = EntityRef::Single(task.id);
        assert_eq!(q.history(target, cast.creator.id).await.unwrap().len(), 2);

        let own = q.history(target, cast.helper.id).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].actor, cast.helper.id);

        let err = q.history(target, cast.outsider.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }
}
