//! TaskQueue port - 外部の分散タスクキュー（broker + worker）
//!
//! このクレートはキュー自体を実装しません。登録・投入・合成（sequential /
//! fan-out）・状態照会・周期トリガ表だけを扱う薄いインターフェースです。
//!
//! # 実装
//! - `impls::InMemoryTaskQueue`: 開発・テスト用（tokio ワーカー）

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{
    CronSchedule, ExecutionId, ExecutionStatus, Signature, TaskArgs, TaskChain, TaskFailure,
    TaskName,
};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no queue task registered under '{0}'")]
    NotRegistered(TaskName),

    #[error("cannot submit an empty chain")]
    EmptyChain,

    #[error("member {index} ('{task}') of group {group} failed: {reason}")]
    MemberFailed {
        group: ExecutionId,
        index: usize,
        task: TaskName,
        reason: String,
    },

    #[error("queue is shut down")]
    ShutDown,

    #[error("queue operation failed: {0}")]
    OperationFailed(String),
}

/// Worker-side body of a registered task.
#[async_trait]
pub trait QueueTask: Send + Sync {
    async fn run(&self, execution: ExecutionId, args: TaskArgs) -> Result<Value, TaskFailure>;
}

/// Handle the queue hands out when a task is registered under a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskBinding {
    task: TaskName,
    slot: usize,
}

impl TaskBinding {
    pub fn new(task: TaskName, slot: usize) -> Self {
        Self { task, slot }
    }

    pub fn task(&self) -> &TaskName {
        &self.task
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Do not retain the return value queue-side.
    pub ignore_result: bool,
}

impl SubmitOptions {
    pub fn ignore_result() -> Self {
        Self {
            ignore_result: true,
        }
    }
}

/// One row of the periodic-trigger table.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicEntry {
    /// Key in the table.
    pub name: TaskName,
    /// Task submitted when the entry fires.
    pub target: TaskName,
    pub schedule: CronSchedule,
    pub args: TaskArgs,
}

/// Result of a fan-out; `join` waits for every member.
pub struct GroupHandle {
    id: ExecutionId,
    members: Vec<ExecutionId>,
    results: BoxFuture<'static, Result<Vec<Value>, QueueError>>,
}

impl GroupHandle {
    pub fn new(
        id: ExecutionId,
        members: Vec<ExecutionId>,
        results: BoxFuture<'static, Result<Vec<Value>, QueueError>>,
    ) -> Self {
        Self {
            id,
            members,
            results,
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn members(&self) -> &[ExecutionId] {
        &self.members
    }

    /// Barrier: one value per member, in submission order.
    pub async fn join(self) -> Result<Vec<Value>, QueueError> {
        self.results.await
    }
}

impl fmt::Debug for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("id", &self.id)
            .field("members", &self.members)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Register (or replace) the worker-side body for `name`.
    async fn register(
        &self,
        name: TaskName,
        task: std::sync::Arc<dyn QueueTask>,
    ) -> Result<TaskBinding, QueueError>;

    /// Drop the body registered under `name`. Returns whether one existed.
    async fn unregister(&self, name: &TaskName) -> Result<bool, QueueError>;

    /// Fire-and-forget submission.
    async fn submit(
        &self,
        signature: Signature,
        options: SubmitOptions,
    ) -> Result<ExecutionId, QueueError>;

    /// Run the stages in order; each stage's output becomes the next stage's
    /// sole positional argument.
    async fn compose_sequential(
        &self,
        chain: TaskChain,
        options: SubmitOptions,
    ) -> Result<ExecutionId, QueueError>;

    /// Run the signatures concurrently.
    async fn fan_out(&self, signatures: Vec<Signature>) -> Result<GroupHandle, QueueError>;

    async fn status(&self, execution: ExecutionId) -> Result<Option<ExecutionStatus>, QueueError>;

    /// Last write wins; returns the entry that was replaced.
    async fn install_periodic(
        &self,
        entry: PeriodicEntry,
    ) -> Result<Option<PeriodicEntry>, QueueError>;

    /// Returns the removed entry, if any.
    async fn remove_periodic(&self, name: &TaskName) -> Result<Option<PeriodicEntry>, QueueError>;

    async fn periodic_entries(&self) -> Result<Vec<PeriodicEntry>, QueueError>;
}
