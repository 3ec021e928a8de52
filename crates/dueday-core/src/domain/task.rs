//! Source definitions: one-off tasks and recurring tasks.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::errors::CoreError;
use super::ids::{OrgId, ProjectId, RecurringId, TaskId, UserId};
use super::recurrence::FrequencyRule;

/// Importance class. Only `Immediate` carries a sub-importance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Immediate,
    High,
    Normal,
    /// Parked work; flagged by the alert scan when it goes stale.
    Drawer,
}

impl Importance {
    pub fn as_str(self) -> &'static str {
        match self {
            Importance::Immediate => "immediate",
            Importance::High => "high",
            Importance::Normal => "normal",
            Importance::Drawer => "drawer",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Importance {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Importance::Immediate),
            "high" => Ok(Importance::High),
            "normal" => Ok(Importance::Normal),
            "drawer" => Ok(Importance::Drawer),
            other => Err(CoreError::Validation(format!(
                "unknown importance class {other:?}"
            ))),
        }
    }
}

/// Task status, shared on the definition or personal on a per-assignee row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Pending,
    InProgress,
    Review,
    Complete,
    Cancelled,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Review => "review",
            Status::Complete => "complete",
            Status::Cancelled => "cancelled",
        }
    }

    /// Complete or cancelled: nothing more is expected of the task.
    pub fn is_resolved(self) -> bool {
        matches!(self, Status::Complete | Status::Cancelled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Status::Pending),
            "in_progress" => Ok(Status::InProgress),
            "review" => Ok(Status::Review),
            "complete" | "completed" => Ok(Status::Complete),
            "cancelled" | "canceled" => Ok(Status::Cancelled),
            other => Err(CoreError::Validation(format!("status {other:?} is not allowed"))),
        }
    }
}

/// Who owns and works on a definition.
///
/// Invariant: `main_responsible` is a member of `responsible`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub creator: UserId,
    pub main_responsible: UserId,
    pub responsible: BTreeSet<UserId>,
    pub organization: OrgId,
    #[serde(default)]
    pub project: Option<ProjectId>,
}

impl Assignment {
    /// Build an assignment, adding the main responsible to the set if missing.
    pub fn new(
        creator: UserId,
        main_responsible: UserId,
        responsible: impl IntoIterator<Item = UserId>,
        organization: OrgId,
    ) -> Self {
        let mut responsible: BTreeSet<UserId> = responsible.into_iter().collect();
        responsible.insert(main_responsible);
        Self {
            creator,
            main_responsible,
            responsible,
            organization,
            project: None,
        }
    }

    pub fn is_responsible(&self, user: UserId) -> bool {
        self.responsible.contains(&user)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.responsible.contains(&self.main_responsible) {
            return Err(CoreError::Validation(format!(
                "main responsible {} must be one of the responsible people",
                self.main_responsible
            )));
        }
        Ok(())
    }
}

/// Soft-delete metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deletion {
    pub at: DateTime<Utc>,
    pub by: UserId,
}

/// A one-off task with a due date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub details: Option<String>,
    pub importance: Importance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_importance: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub note: Option<String>,
    pub assignment: Assignment,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub final_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deletion: Option<Deletion>,
    #[serde(default)]
    pub hidden_for: BTreeSet<UserId>,
    /// Local days since creation; recomputed by the daily pass.
    #[serde(default)]
    pub days_open: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every successful save.
    #[serde(default)]
    pub revision: u64,
}

impl TaskDefinition {
    pub fn is_deleted(&self) -> bool {
        self.deletion.is_some()
    }

    /// Deleted, complete and cancelled tasks no longer age.
    pub fn is_archived(&self) -> bool {
        self.is_deleted() || self.status.is_resolved()
    }
}

/// One person's status note on a recurring task for one local day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringNote {
    pub date: NaiveDate,
    pub author: UserId,
    pub status: Status,
    #[serde(default)]
    pub text: Option<String>,
    pub at: DateTime<Utc>,
}

/// A task that comes due according to a [`FrequencyRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringDefinition {
    pub id: RecurringId,
    pub title: String,
    #[serde(default)]
    pub details: Option<String>,
    pub importance: Importance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_importance: Option<String>,
    #[serde(default)]
    pub status: Status,
    pub assignment: Assignment,
    pub frequency: FrequencyRule,
    #[serde(default)]
    pub notes: Vec<RecurringNote>,
    #[serde(default)]
    pub deletion: Option<Deletion>,
    #[serde(default)]
    pub hidden_for: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl RecurringDefinition {
    pub fn is_deleted(&self) -> bool {
        self.deletion.is_some()
    }

    /// `user`'s own note for `date`, if they wrote one.
    pub fn note_by(&self, user: UserId, date: NaiveDate) -> Option<&RecurringNote> {
        self.notes.iter().find(|n| n.date == date && n.author == user)
    }

    /// Whether anyone left a `complete` note for `date`.
    pub fn completed_on(&self, date: NaiveDate) -> bool {
        self.notes
            .iter()
            .any(|n| n.date == date && n.status == Status::Complete)
    }
}

/// Input for creating a one-off task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub details: Option<String>,
    pub importance: Importance,
    #[serde(default)]
    pub sub_importance: Option<String>,
    pub main_responsible: UserId,
    #[serde(default)]
    pub responsible: BTreeSet<UserId>,
    pub organization: OrgId,
    #[serde(default)]
    pub project: Option<ProjectId>,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub final_deadline: Option<DateTime<Utc>>,
}

/// Input for creating a recurring task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringDraft {
    pub title: String,
    #[serde(default)]
    pub details: Option<String>,
    pub importance: Importance,
    #[serde(default)]
    pub sub_importance: Option<String>,
    pub main_responsible: UserId,
    #[serde(default)]
    pub responsible: BTreeSet<UserId>,
    pub organization: OrgId,
    #[serde(default)]
    pub project: Option<ProjectId>,
    pub frequency: FrequencyRule,
}
