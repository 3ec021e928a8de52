//! AssigneeStatusStore port - 担当者ごとの個人ステータス

use async_trait::async_trait;

use crate::domain::{PerAssigneeStatus, StoreError, TaskId, UserId};

#[async_trait]
pub trait AssigneeStatusStore: Send + Sync {
    async fn find(&self, task: TaskId, user: UserId)
    -> Result<Option<PerAssigneeStatus>, StoreError>;

    /// Insert or replace the row keyed by (task, user).
    async fn upsert(&self, row: PerAssigneeStatus) -> Result<(), StoreError>;

    /// Drop the row of a user who is no longer responsible.
    async fn remove(&self, task: TaskId, user: UserId) -> Result<(), StoreError>;

    async fn list_for_task(&self, task: TaskId) -> Result<Vec<PerAssigneeStatus>, StoreError>;
}
