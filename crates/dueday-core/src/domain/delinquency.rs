//! Delinquency records: the durable ledger of work that fell behind.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DelinquencyId, OrgId, UserId};
use super::instance::SourceRef;

/// A stored record is pending; retirement deletes it.
/// At most one record exists per source at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelinquencyRecord {
    pub id: DelinquencyId,
    pub source: SourceRef,
    pub title: String,
    pub responsible: BTreeSet<UserId>,
    pub organization: OrgId,
    /// Since when the work has been overdue.
    pub overdue_since: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
