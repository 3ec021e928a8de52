//! DelinquencyStore port - 遅延台帳
//!
//! 同じ (source id, source type) について pending レコードは高々 1 件。
//! 複数のトリガーが同時に走っても重複しないよう、
//! `save_if_not_exists` は check-then-insert を 1 操作で行います。

use async_trait::async_trait;

use crate::domain::{DelinquencyId, DelinquencyRecord, SourceRef, StoreError};

#[async_trait]
pub trait DelinquencyStore: Send + Sync {
    async fn find_pending(&self, source: SourceRef)
    -> Result<Option<DelinquencyRecord>, StoreError>;

    /// Insert unless a pending record for the same source exists. `true` when inserted.
    async fn save_if_not_exists(&self, record: DelinquencyRecord) -> Result<bool, StoreError>;

    async fn list_pending(&self) -> Result<Vec<DelinquencyRecord>, StoreError>;

    /// Overwrite an existing record.
    async fn save(&self, record: &DelinquencyRecord) -> Result<(), StoreError>;

    async fn delete(&self, id: DelinquencyId) -> Result<(), StoreError>;
}
