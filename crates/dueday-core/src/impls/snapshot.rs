//! Snapshot - JSON ファイルへの永続化
//!
//! CLI は起動時に JSON スナップショットを読み込み、ジョブ実行後に書き戻します。
//! 書き込みは一時ファイル → rename で行い、途中で落ちても元のファイルは壊れません。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    DelinquencyRecord, HistoryRecord, Organization, PerAssigneeStatus, RecurringDefinition,
    TaskDefinition, TodayInstance, User,
};

/// Everything the storage ports hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub recurring: Vec<RecurringDefinition>,
    #[serde(default)]
    pub instances: Vec<TodayInstance>,
    #[serde(default)]
    pub assignee_statuses: Vec<PerAssigneeStatus>,
    #[serde(default)]
    pub delinquencies: Vec<DelinquencyRecord>,
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
}

/// On-disk data file: directories plus store contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(flatten)]
    pub store: StoreSnapshot,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl DataFile {
    /// Read `path`; a missing file is an empty data set.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw).map_err(|source| SnapshotError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let io_err = |source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|source| SnapshotError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }
}
