//! Today-instances: the rebuildable daily projection of source definitions.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::ids::{InstanceId, RecurringId, TaskId, UserId};
use super::task::{Assignment, Importance, RecurringDefinition, Status, TaskDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Single,
    Recurring,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Single => f.write_str("single"),
            SourceKind::Recurring => f.write_str("recurring"),
        }
    }
}

/// Back-reference to a source definition: (source type, source id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SourceRef {
    Single(TaskId),
    Recurring(RecurringId),
}

impl SourceRef {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceRef::Single(_) => SourceKind::Single,
            SourceRef::Recurring(_) => SourceKind::Recurring,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        match self {
            SourceRef::Single(id) => id.as_ulid(),
            SourceRef::Recurring(id) => id.as_ulid(),
        }
    }

    /// The instance id for this source. One source, one instance per day.
    pub fn instance_id(&self) -> InstanceId {
        InstanceId::from_ulid(self.as_ulid())
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Single(id) => id.fmt(f),
            SourceRef::Recurring(id) => id.fmt(f),
        }
    }
}

/// One source definition that is due on `day`, with the display fields copied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodayInstance {
    pub id: InstanceId,
    pub day: NaiveDate,
    pub source: SourceRef,
    pub title: String,
    pub importance: Importance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_importance: Option<String>,
    pub status: Status,
    pub assignment: Assignment,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hidden_for: BTreeSet<UserId>,
}

impl TodayInstance {
    pub fn from_single(task: &TaskDefinition, day: NaiveDate) -> Self {
        let source = SourceRef::Single(task.id);
        Self {
            id: source.instance_id(),
            day,
            source,
            title: task.title.clone(),
            importance: task.importance,
            sub_importance: task.sub_importance.clone(),
            status: task.status,
            assignment: task.assignment.clone(),
            due_date: Some(task.due_date),
            hidden_for: task.hidden_for.clone(),
        }
    }

    pub fn from_recurring(def: &RecurringDefinition, day: NaiveDate) -> Self {
        let source = SourceRef::Recurring(def.id);
        Self {
            id: source.instance_id(),
            day,
            source,
            title: def.title.clone(),
            importance: def.importance,
            sub_importance: def.sub_importance.clone(),
            status: def.status,
            assignment: def.assignment.clone(),
            due_date: None,
            hidden_for: def.hidden_for.clone(),
        }
    }

    pub fn visible_to(&self, user: UserId) -> bool {
        self.assignment.is_responsible(user) && !self.hidden_for.contains(&user)
    }
}
