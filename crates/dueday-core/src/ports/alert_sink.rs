//! AlertSink port - 通知の送り先
//!
//! コアは通知を配信しません。AlertGenerator が組み立てた [`Alert`] を
//! ここに渡すだけで、配信方法は外部の実装が決めます。

use async_trait::async_trait;

use crate::domain::{Alert, StoreError};

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<(), StoreError>;
}
