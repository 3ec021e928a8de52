//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部の協調者（ドキュメントストア、ディレクトリ、通知先、時計）への
//! インターフェースで、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - ソース定義（単発・定期）が source of truth（正本）
//! - TodayInstance と DelinquencyRecord は派生データ
//! - 失敗は [`StoreError`](crate::domain::StoreError) で返し、呼び出し側で分類する

pub mod alert_sink;
pub mod assignee_store;
pub mod clock;
pub mod delinquency_store;
pub mod directory;
pub mod history_store;
pub mod id_generator;
pub mod instance_store;
pub mod task_store;

// 主要な trait を再エクスポート
pub use self::alert_sink::AlertSink;
pub use self::assignee_store::AssigneeStatusStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delinquency_store::DelinquencyStore;
pub use self::directory::{DisplayNameResolver, OrgDirectory, UserDirectory};
pub use self::history_store::HistoryStore;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::instance_store::InstanceStore;
pub use self::task_store::TaskStore;
