//! Alerts raised by the periodic scan. Delivery is someone else's job.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ids::UserId;
use super::instance::SourceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A pending delinquency record exists for the source.
    Overdue,
    /// A drawer-class task nobody has touched for a while.
    StaleDrawer,
    /// A single task that has been open for too many days.
    LongOpen,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Overdue => "overdue",
            AlertKind::StaleDrawer => "stale_drawer",
            AlertKind::LongOpen => "long_open",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub source: SourceRef,
    pub title: String,
    pub recipients: BTreeSet<UserId>,
    /// Local day the alert was raised for; part of the dedupe key.
    pub day: NaiveDate,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn dedupe_key(&self) -> (AlertKind, SourceRef, NaiveDate) {
        (self.kind, self.source, self.day)
    }
}
