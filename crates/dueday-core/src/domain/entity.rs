//! One sum type for every task-like entity, with the behavior they share.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{InstanceId, RecurringId, TaskId};
use super::instance::{SourceRef, TodayInstance};
use super::task::{Assignment, RecurringDefinition, TaskDefinition};

/// Anything that carries an [`Assignment`] and can be permission-checked.
pub trait Assigned {
    fn assignment(&self) -> &Assignment;
}

impl Assigned for TaskDefinition {
    fn assignment(&self) -> &Assignment {
        &self.assignment
    }
}

impl Assigned for RecurringDefinition {
    fn assignment(&self) -> &Assignment {
        &self.assignment
    }
}

impl Assigned for TodayInstance {
    fn assignment(&self) -> &Assignment {
        &self.assignment
    }
}

/// Address of a task-like entity, tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Single(TaskId),
    Recurring(RecurringId),
    Instance(InstanceId),
}

impl From<SourceRef> for EntityRef {
    fn from(source: SourceRef) -> Self {
        match source {
            SourceRef::Single(id) => EntityRef::Single(id),
            SourceRef::Recurring(id) => EntityRef::Recurring(id),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Single(id) => id.fmt(f),
            EntityRef::Recurring(id) => id.fmt(f),
            EntityRef::Instance(id) => id.fmt(f),
        }
    }
}

/// A loaded task-like entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Single(TaskDefinition),
    Recurring(RecurringDefinition),
    Instance(TodayInstance),
}

impl Entity {
    /// The source definition this entity is, or projects.
    pub fn source(&self) -> SourceRef {
        match self {
            Entity::Single(task) => SourceRef::Single(task.id),
            Entity::Recurring(def) => SourceRef::Recurring(def.id),
            Entity::Instance(instance) => instance.source,
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            Entity::Single(task) => task.is_deleted(),
            Entity::Recurring(def) => def.is_deleted(),
            Entity::Instance(_) => false,
        }
    }
}

impl Assigned for Entity {
    fn assignment(&self) -> &Assignment {
        match self {
            Entity::Single(task) => &task.assignment,
            Entity::Recurring(def) => &def.assignment,
            Entity::Instance(instance) => &instance.assignment,
        }
    }
}
