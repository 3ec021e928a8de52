//! AlertSink の実装
//!
//! - TracingAlertSink: ログに出すだけ（CLI のデフォルト）
//! - CollectingAlertSink: 受け取った Alert を保持する（テスト用）

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Alert, StoreError};
use crate::ports::AlertSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), StoreError> {
        tracing::info!(
            kind = %alert.kind,
            source = %alert.source,
            title = %alert.title,
            recipients = alert.recipients.len(),
            day = %alert.day,
            "alert raised"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectingAlertSink {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl CollectingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl AlertSink for CollectingAlertSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), StoreError> {
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}
