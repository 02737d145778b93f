//! Domain model (IDs, descriptors, schedules, records, states).
//!
//! - **ids**: ULID ベースの型付き ID（ResultId, ExecutionId）
//! - **task**: TaskName, TaskArgs, Signature, TaskChain
//! - **descriptor**: TaskDescriptor と StorePolicy
//! - **config**: 設定辞書のエントリ（TaskConfig, TaskEntry）
//! - **schedule**: cron 仕様
//! - **record**: 永続化される実行結果
//! - **state**: 実行状態
//! - **errors**: タスクロジックの失敗

pub mod config;
pub mod descriptor;
pub mod errors;
pub mod ids;
pub mod record;
pub mod schedule;
pub mod state;
pub mod task;

pub use config::{TaskConfig, TaskEntry};
pub use descriptor::{StorePolicy, TaskDescriptor, TaskDescriptorBuilder};
pub use errors::TaskFailure;
pub use ids::{ExecutionId, ResultId};
pub use record::TaskResultRecord;
pub use schedule::{CronSchedule, ScheduleError};
pub use state::{ExecutionStatus, TaskState};
pub use task::{Signature, TaskArgs, TaskChain, TaskName};
