//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryStore**: すべてのストア port の in-memory 実装
//! - **InMemoryDirectory / DirectoryResolver**: ディレクトリと表示名解決
//! - **TtlStore / ActivityTracker**: 期限付きキーストア
//! - **TracingAlertSink / CollectingAlertSink**: 通知の送り先
//! - **DataFile**: JSON スナップショット
//!
//! # 本番用実装
//! ドキュメントストアに対する実装は別クレートに配置する想定です。

pub mod alert_sink;
pub mod directory;
pub mod inmem_store;
pub mod snapshot;
pub mod ttl_store;

// 主要な型を再エクスポート
pub use self::alert_sink::{CollectingAlertSink, TracingAlertSink};
pub use self::directory::{DirectoryResolver, InMemoryDirectory};
pub use self::inmem_store::InMemoryStore;
pub use self::snapshot::{DataFile, SnapshotError, StoreSnapshot};
pub use self::ttl_store::{ActivityTracker, TtlStore};
