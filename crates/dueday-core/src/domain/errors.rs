//! Errors - エラー型と分類
//!
//! 呼び出し元に返す失敗は [`CoreError`] に集約し、
//! 運用上の分類は [`ErrorKind`] で表現します。

use thiserror::Error;

/// ErrorKind は失敗の分類
///
/// - NotFound: 対象エンティティが存在しない
/// - Forbidden: 権限ティアまたはキャンセル規則違反
/// - Validation: 不正な enum 値、不正な頻度ルール、参照先の欠落
/// - NoChanges: 差分なしの更新（成功ではなく明示的なシグナル）
/// - Conflict: 楽観ロック失敗・重複挿入
/// - Infrastructure: ストレージ障害（500 系として扱う）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Validation,
    NoChanges,
    Conflict,
    Infrastructure,
}

impl ErrorKind {
    /// HTTP-style status a caller-facing layer reports for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Forbidden => 403,
            ErrorKind::Validation => 422,
            ErrorKind::NoChanges | ErrorKind::Conflict => 409,
            ErrorKind::Infrastructure => 500,
        }
    }
}

/// Failures raised by the storage ports.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("revision mismatch for {entity}: expected {expected}, found {found}")]
    RevisionMismatch {
        entity: String,
        expected: u64,
        found: u64,
    },
}

/// Every failure the core reports to its callers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no changes: the update matches the stored values")]
    NoChanges,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::NoChanges => ErrorKind::NoChanges,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Storage(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RevisionMismatch { .. } => CoreError::Conflict(err.to_string()),
            StoreError::Unavailable(_) => CoreError::Storage(err.to_string()),
        }
    }
}

impl From<super::ids::IdParseError> for CoreError {
    fn from(err: super::ids::IdParseError) -> Self {
        CoreError::Validation(err.to_string())
    }
}
