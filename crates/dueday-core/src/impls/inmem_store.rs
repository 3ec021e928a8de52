//! InMemoryStore - 開発・テスト用のドキュメントストア
//!
//! すべてのストア port を 1 つの構造体で実装します。
//! 状態は単一の `Mutex` で守られているため、
//! `save_if_not_exists` や `insert_if_absent` の check-then-insert は
//! ロックを握ったまま行われ、並行呼び出しでも重複しません。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    DelinquencyId, DelinquencyRecord, HistoryRecord, InstanceId, PerAssigneeStatus,
    RecurringDefinition, RecurringId, SourceRef, StoreError, TaskDefinition, TaskId,
    TodayInstance, UserId,
};
use crate::ports::{AssigneeStatusStore, DelinquencyStore, HistoryStore, InstanceStore, TaskStore};

use super::snapshot::StoreSnapshot;

/// In-memory store state.
#[derive(Default)]
struct State {
    /// One-off task definitions (source of truth).
    singles: HashMap<TaskId, TaskDefinition>,

    /// Recurring definitions (source of truth).
    recurring: HashMap<RecurringId, RecurringDefinition>,

    /// Today's projection. Keyed by instance id, which is derived from the source.
    instances: HashMap<InstanceId, TodayInstance>,

    assignee_rows: HashMap<(TaskId, UserId), PerAssigneeStatus>,

    delinquencies: HashMap<DelinquencyId, DelinquencyRecord>,

    /// Append-only.
    history: Vec<HistoryRecord>,
}

/// In-memory implementation of every storage port.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding everything in `snapshot`.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let state = State {
            singles: snapshot.tasks.into_iter().map(|t| (t.id, t)).collect(),
            recurring: snapshot.recurring.into_iter().map(|d| (d.id, d)).collect(),
            instances: snapshot.instances.into_iter().map(|i| (i.id, i)).collect(),
            assignee_rows: snapshot
                .assignee_statuses
                .into_iter()
                .map(|r| ((r.task_id, r.user_id), r))
                .collect(),
            delinquencies: snapshot.delinquencies.into_iter().map(|d| (d.id, d)).collect(),
            history: snapshot.history,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Copy the current contents out, in a stable order.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.lock().await;
        StoreSnapshot {
            tasks: sorted_by_key(state.singles.values().cloned(), |t| t.id),
            recurring: sorted_by_key(state.recurring.values().cloned(), |d| d.id),
            instances: sorted_by_key(state.instances.values().cloned(), |i| i.id),
            assignee_statuses: sorted_by_key(state.assignee_rows.values().cloned(), |r| {
                (r.task_id, r.user_id)
            }),
            delinquencies: sorted_by_key(state.delinquencies.values().cloned(), |d| d.id),
            history: state.history.clone(),
        }
    }
}

fn sorted_by_key<T, K: Ord>(items: impl Iterator<Item = T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut items: Vec<T> = items.collect();
    items.sort_by_key(|item| key(item));
    items
}

fn missing(entity: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("{entity} is not stored"))
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn get_single(&self, id: TaskId) -> Result<Option<TaskDefinition>, StoreError> {
        Ok(self.state.lock().await.singles.get(&id).cloned())
    }

    async fn insert_single(&self, task: TaskDefinition) -> Result<(), StoreError> {
        self.state.lock().await.singles.insert(task.id, task);
        Ok(())
    }

    async fn save_single(&self, task: &TaskDefinition) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let stored = state.singles.get_mut(&task.id).ok_or_else(|| missing(task.id))?;
        if stored.revision != task.revision {
            return Err(StoreError::RevisionMismatch {
                entity: task.id.to_string(),
                expected: task.revision,
                found: stored.revision,
            });
        }
        *stored = task.clone();
        stored.revision = task.revision + 1;
        Ok(stored.revision)
    }

    async fn singles_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TaskDefinition>, StoreError> {
        let state = self.state.lock().await;
        Ok(sorted_by_key(
            state
                .singles
                .values()
                .filter(|t| !t.is_deleted() && start <= t.due_date && t.due_date <= end)
                .cloned(),
            |t| t.id,
        ))
    }

    async fn singles_overdue(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<TaskDefinition>, StoreError> {
        let state = self.state.lock().await;
        Ok(sorted_by_key(
            state
                .singles
                .values()
                .filter(|t| !t.is_archived() && t.due_date < before)
                .cloned(),
            |t| t.id,
        ))
    }

    async fn open_singles(&self) -> Result<Vec<TaskDefinition>, StoreError> {
        let state = self.state.lock().await;
        Ok(sorted_by_key(
            state.singles.values().filter(|t| !t.is_archived()).cloned(),
            |t| t.id,
        ))
    }

    async fn set_days_open(&self, updates: &[(TaskId, i64)]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for (id, days) in updates {
            if let Some(task) = state.singles.get_mut(id) {
                task.days_open = *days;
            }
        }
        Ok(())
    }

    async fn get_recurring(
        &self,
        id: RecurringId,
    ) -> Result<Option<RecurringDefinition>, StoreError> {
        Ok(self.state.lock().await.recurring.get(&id).cloned())
    }

    async fn insert_recurring(&self, def: RecurringDefinition) -> Result<(), StoreError> {
        self.state.lock().await.recurring.insert(def.id, def);
        Ok(())
    }

    async fn save_recurring(&self, def: &RecurringDefinition) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let stored = state.recurring.get_mut(&def.id).ok_or_else(|| missing(def.id))?;
        if stored.revision != def.revision {
            return Err(StoreError::RevisionMismatch {
                entity: def.id.to_string(),
                expected: def.revision,
                found: stored.revision,
            });
        }
        *stored = def.clone();
        stored.revision = def.revision + 1;
        Ok(stored.revision)
    }

    async fn active_recurring(&self) -> Result<Vec<RecurringDefinition>, StoreError> {
        let state = self.state.lock().await;
        Ok(sorted_by_key(
            state.recurring.values().filter(|d| !d.is_deleted()).cloned(),
            |d| d.id,
        ))
    }
}

#[async_trait]
impl InstanceStore for InMemoryStore {
    async fn list(&self) -> Result<Vec<TodayInstance>, StoreError> {
        let state = self.state.lock().await;
        Ok(sorted_by_key(state.instances.values().cloned(), |i| i.id))
    }

    async fn get(&self, id: InstanceId) -> Result<Option<TodayInstance>, StoreError> {
        Ok(self.state.lock().await.instances.get(&id).cloned())
    }

    async fn find_by_source(
        &self,
        source: SourceRef,
    ) -> Result<Option<TodayInstance>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.instances.values().find(|i| i.source == source).cloned())
    }

    async fn truncate(&self) -> Result<(), StoreError> {
        self.state.lock().await.instances.clear();
        Ok(())
    }

    async fn insert_many(&self, instances: Vec<TodayInstance>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.instances.extend(instances.into_iter().map(|i| (i.id, i)));
        Ok(())
    }

    async fn replace_all(&self, instances: Vec<TodayInstance>) -> Result<(), StoreError> {
        // Swap under one lock: readers see the old set or the new one, never an empty one.
        let fresh: HashMap<InstanceId, TodayInstance> =
            instances.into_iter().map(|i| (i.id, i)).collect();
        self.state.lock().await.instances = fresh;
        Ok(())
    }

    async fn insert_if_absent(&self, instance: TodayInstance) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.instances.values().any(|i| i.source == instance.source) {
            return Ok(false);
        }
        state.instances.insert(instance.id, instance);
        Ok(true)
    }

    async fn update(&self, instance: TodayInstance) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.instances.get_mut(&instance.id) {
            Some(stored) => {
                *stored = instance;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_by_source(&self, source: SourceRef) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.instances.len();
        state.instances.retain(|_, i| i.source != source);
        Ok(before - state.instances.len())
    }
}

#[async_trait]
impl AssigneeStatusStore for InMemoryStore {
    async fn find(
        &self,
        task: TaskId,
        user: UserId,
    ) -> Result<Option<PerAssigneeStatus>, StoreError> {
        Ok(self.state.lock().await.assignee_rows.get(&(task, user)).cloned())
    }

    async fn upsert(&self, row: PerAssigneeStatus) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .assignee_rows
            .insert((row.task_id, row.user_id), row);
        Ok(())
    }

    async fn remove(&self, task: TaskId, user: UserId) -> Result<(), StoreError> {
        self.state.lock().await.assignee_rows.remove(&(task, user));
        Ok(())
    }

    async fn list_for_task(&self, task: TaskId) -> Result<Vec<PerAssigneeStatus>, StoreError> {
        let state = self.state.lock().await;
        Ok(sorted_by_key(
            state
                .assignee_rows
                .values()
                .filter(|r| r.task_id == task)
                .cloned(),
            |r| r.user_id,
        ))
    }
}

#[async_trait]
impl DelinquencyStore for InMemoryStore {
    async fn find_pending(
        &self,
        source: SourceRef,
    ) -> Result<Option<DelinquencyRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.delinquencies.values().find(|d| d.source == source).cloned())
    }

    async fn save_if_not_exists(&self, record: DelinquencyRecord) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let exists = state.delinquencies.values().any(|d| d.source == record.source);
        if exists {
            return Ok(false);
        }
        state.delinquencies.insert(record.id, record);
        Ok(true)
    }

    async fn list_pending(&self) -> Result<Vec<DelinquencyRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(sorted_by_key(state.delinquencies.values().cloned(), |d| d.id))
    }

    async fn save(&self, record: &DelinquencyRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let stored = state
            .delinquencies
            .get_mut(&record.id)
            .ok_or_else(|| missing(record.id))?;
        *stored = record.clone();
        Ok(())
    }

    async fn delete(&self, id: DelinquencyId) -> Result<(), StoreError> {
        self.state.lock().await.delinquencies.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    async fn append(&self, records: &[HistoryRecord]) -> Result<(), StoreError> {
        self.state.lock().await.history.extend_from_slice(records);
        Ok(())
    }

    async fn list_for(&self, source: SourceRef) -> Result<Vec<HistoryRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .history
            .iter()
            .filter(|h| h.source == source)
            .cloned()
            .collect())
    }
}
