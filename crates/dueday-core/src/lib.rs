//! dueday-core
//!
//! Core building blocks for the dueday task tracker.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, recurrence, permission, field, instance, delinquency, history, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, InstanceStore, DelinquencyStore, UserDirectory, Clock, など）
//! - **app**: アプリケーションロジック（builder, materializer, mutation, ledger, alerts, queries, scheduler）
//! - **impls**: 実装（InMemoryStore など開発用）
//! - **config**: TOML 設定
//! - **observability**: ログ初期化とジョブレポート

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
