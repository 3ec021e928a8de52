//! Observability - ログ初期化とジョブレポート
//!
//! ジョブは件数を数えた Report を返し、CLI はそれを JSON で出力します。

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when it parses; otherwise `default_directive` (e.g. `"info"`).
/// Calling this twice is harmless.
pub fn init_tracing(default_directive: &str) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| {
            let raw = raw.trim();
            if raw.is_empty() || raw.len() > 4096 {
                return None;
            }
            EnvFilter::try_new(raw).ok()
        })
        .unwrap_or_else(|| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

/// Outcome of one materialization cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub singles: usize,
    pub recurring: usize,
    /// Source categories that failed to load and were left out.
    pub failed_categories: Vec<String>,
    pub days_open_updated: usize,
}

impl RefreshReport {
    pub fn total(&self) -> usize {
        self.singles + self.recurring
    }
}

/// Outcome of one delay reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Candidates examined across all categories.
    pub examined: usize,
    pub inserted: usize,
    /// Candidates that already had a pending record.
    pub already_pending: usize,
    /// Candidates excluded because every assignee finished.
    pub excluded: usize,
    /// Candidates dropped for a missing organization, or a failed insert.
    pub skipped: usize,
    /// Pending records retired because their source was already settled.
    pub retired: usize,
    pub failed_categories: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertReport {
    pub raised: usize,
    /// Already raised today.
    pub deduped: usize,
    /// Delivery failures; these are retried on the next run.
    pub failed: usize,
    pub failed_categories: Vec<String>,
}

/// What a scheduled job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "kebab-case")]
pub enum JobReport {
    MaterializeToday(RefreshReport),
    ReconcileDelays(ReconcileReport),
    GenerateAlerts(AlertReport),
}
