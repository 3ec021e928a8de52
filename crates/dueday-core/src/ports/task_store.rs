//! TaskStore port - ソース定義（単発・定期）の正本
//!
//! ドキュメントストアを想定: find / insert / update を単純な操作として提供します。
//! 同一エンティティへの同時編集は `revision` による条件付き保存で直列化します
//! （load → compare → conditional save）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{RecurringDefinition, RecurringId, StoreError, TaskDefinition, TaskId};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_single(&self, id: TaskId) -> Result<Option<TaskDefinition>, StoreError>;

    async fn insert_single(&self, task: TaskDefinition) -> Result<(), StoreError>;

    /// Save if the stored revision still equals `task.revision`; the stored
    /// copy gets `revision + 1`, which is returned.
    async fn save_single(&self, task: &TaskDefinition) -> Result<u64, StoreError>;

    /// Non-deleted single tasks whose due date falls in `[start, end]`.
    async fn singles_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TaskDefinition>, StoreError>;

    /// Non-deleted single tasks due strictly before `before` and not complete or cancelled.
    async fn singles_overdue(&self, before: DateTime<Utc>)
    -> Result<Vec<TaskDefinition>, StoreError>;

    /// Non-deleted single tasks that are neither complete nor cancelled.
    async fn open_singles(&self) -> Result<Vec<TaskDefinition>, StoreError>;

    /// Bulk write of the derived days-open counter. Does not bump revisions.
    async fn set_days_open(&self, updates: &[(TaskId, i64)]) -> Result<(), StoreError>;

    async fn get_recurring(&self, id: RecurringId)
    -> Result<Option<RecurringDefinition>, StoreError>;

    async fn insert_recurring(&self, def: RecurringDefinition) -> Result<(), StoreError>;

    /// Conditional save, as [`TaskStore::save_single`].
    async fn save_recurring(&self, def: &RecurringDefinition) -> Result<u64, StoreError>;

    /// Every non-deleted recurring definition.
    async fn active_recurring(&self) -> Result<Vec<RecurringDefinition>, StoreError>;
}
