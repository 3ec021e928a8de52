//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）
//!
//! TodayInstance の ID は生成せず、ソースの ULID から導出します
//! （[`SourceRef::instance_id`](crate::domain::SourceRef::instance_id)）。

use crate::domain::ids::{DelinquencyId, HistoryId, RecurringId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散システムで使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数スレッドから使える）
pub trait IdGenerator: Send + Sync {
    fn task_id(&self) -> TaskId;

    fn recurring_id(&self) -> RecurringId;

    fn delinquency_id(&self) -> DelinquencyId;

    fn history_id(&self) -> HistoryId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// テストでは FixedClock を渡すと timestamp 部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn recurring_id(&self) -> RecurringId {
        RecurringId::from(self.next())
    }

    fn delinquency_id(&self) -> DelinquencyId {
        DelinquencyId::from(self.next())
    }

    fn history_id(&self) -> HistoryId {
        HistoryId::from(self.next())
    }
}
