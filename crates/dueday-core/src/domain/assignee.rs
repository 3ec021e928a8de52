//! Per-assignee status rows and the completion-promotion rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{TaskId, UserId};
use super::task::Status;

/// One responsible person's own status on a one-off task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerAssigneeStatus {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub status: Status,
    #[serde(default)]
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PerAssigneeStatus {
    /// A fresh row: pending, no note.
    pub fn new(task_id: TaskId, user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            user_id,
            status: Status::Pending,
            note: None,
            updated_at: at,
        }
    }
}

/// True iff at least one row exists and every row is complete.
pub fn all_complete(rows: &[PerAssigneeStatus]) -> bool {
    !rows.is_empty() && rows.iter().all(|r| r.status == Status::Complete)
}

/// Final status for one person: their own row wins over the shared status.
pub fn final_status(shared: Status, personal: Option<&PerAssigneeStatus>) -> Status {
    personal.map(|row| row.status).unwrap_or(shared)
}
