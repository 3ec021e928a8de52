//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **TodayMaterializer**: 今日の TodayInstance 集合の再構築
//! - **MutationEngine**: 権限付きの更新・作成・削除と監査履歴
//! - **DelayLedger**: 遅延台帳の照合と解消
//! - **AlertGenerator**: 通知の生成と重複排除
//! - **Queries**: 読み取り専用のクエリ
//! - **DailyScheduler**: 3 つの日次ジョブの起動

pub mod alerts;
pub mod builder;
pub mod entities;
pub mod ledger;
pub mod materializer;
pub mod mutation;
pub mod queries;
pub mod scheduler;

#[cfg(test)]
mod test_support;

// 主要な型を再エクスポート
pub use self::alerts::AlertGenerator;
pub use self::builder::{App, AppBuilder, BuildError, Ports};
pub use self::ledger::DelayLedger;
pub use self::materializer::TodayMaterializer;
pub use self::mutation::{MutationEngine, MutationOutcome};
pub use self::queries::Queries;
pub use self::scheduler::{DailyScheduler, JobName, JobObserver, Jobs, next_fire};
