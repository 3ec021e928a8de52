//! HistoryStore port - 追記専用の監査履歴

use async_trait::async_trait;

use crate::domain::{HistoryRecord, SourceRef, StoreError};

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, records: &[HistoryRecord]) -> Result<(), StoreError>;

    /// Records for one source, oldest first.
    async fn list_for(&self, source: SourceRef) -> Result<Vec<HistoryRecord>, StoreError>;
}
