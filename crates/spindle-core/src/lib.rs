//! spindle-core
//!
//! Named, deferred tasks on top of a distributed queue, with results kept
//! in a document store and the latest result per task tracked in a cache.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, descriptor, config, schedule, record, state, errors）
//! - **ports**: 抽象化レイヤー（Cache, DocumentStore, TaskQueue, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（manager, registry, chain, result_store, scheduler, worker）
//! - **typed**: タスクロジックの型付き API（TaskLogic, typed, LogicCatalog）
//! - **impls**: 実装（InMemory* は開発用、RedisCache は `redis` feature）
//! - **config**: 環境変数からの設定
//! - **error**: 呼び出し側へ返るエラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{CacheClient, TaskManager, TaskManagerBuilder, TaskRun};
pub use config::{CacheSettings, ConfigError, SpindleConfig};
pub use domain::{
    CronSchedule, ExecutionId, Signature, StorePolicy, TaskArgs, TaskConfig, TaskDescriptor,
    TaskEntry, TaskFailure, TaskName,
};
pub use error::TaskError;
