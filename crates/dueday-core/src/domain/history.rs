//! Audit history: one append-only record per changed field per mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{HistoryId, UserId};
use super::instance::SourceRef;

/// Whether the change touched the shared definition or one person's own row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScope {
    Shared,
    Personal,
}

/// `before` / `after` hold display strings, never raw user or organization ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: HistoryId,
    pub source: SourceRef,
    pub field: String,
    pub before: Option<String>,
    pub after: Option<String>,
    pub actor: UserId,
    pub at: DateTime<Utc>,
    pub scope: HistoryScope,
}
