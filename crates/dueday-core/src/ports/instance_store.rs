//! InstanceStore port - TodayInstance（派生データ）
//!
//! TodayInstance は正本ではありません。日次の再構築で丸ごと捨てて作り直します。

use async_trait::async_trait;

use crate::domain::{InstanceId, SourceRef, StoreError, TodayInstance};

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn list(&self) -> Result<Vec<TodayInstance>, StoreError>;

    async fn get(&self, id: InstanceId) -> Result<Option<TodayInstance>, StoreError>;

    async fn find_by_source(&self, source: SourceRef) -> Result<Option<TodayInstance>, StoreError>;

    /// Drop the whole set.
    async fn truncate(&self) -> Result<(), StoreError>;

    async fn insert_many(&self, instances: Vec<TodayInstance>) -> Result<(), StoreError>;

    /// Truncate then insert. Implementations may do both in one step so
    /// readers never observe an empty set; the default does not.
    async fn replace_all(&self, instances: Vec<TodayInstance>) -> Result<(), StoreError> {
        self.truncate().await?;
        self.insert_many(instances).await
    }

    /// Insert unless an instance for the same source exists. `true` when inserted.
    async fn insert_if_absent(&self, instance: TodayInstance) -> Result<bool, StoreError>;

    /// Overwrite the display copy of an existing instance. `false` when absent.
    async fn update(&self, instance: TodayInstance) -> Result<bool, StoreError>;

    /// Number of instances removed (0 or 1).
    async fn remove_by_source(&self, source: SourceRef) -> Result<usize, StoreError>;
}
