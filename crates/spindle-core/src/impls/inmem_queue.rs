//! InMemoryTaskQueue - 開発用のタスクキュー
//!
//! # 実装詳細
//! - mpsc チャネルでジョブを配送し、N 個の tokio ワーカーが取り出して実行
//! - 実行状態と（保持指定された）結果は Mutex で守られた表に記録
//! - 状態が終端になるたびに `Notify` で待機者を起こす
//! - 終端に達した実行は古い順に最大 `retention` 件だけ保持（既定 1024）
//! - fan-out のメンバーは join が読み取った時点で表から消す
//! - 周期トリガ表は保持するだけ。発火は `BeatLoop` が担当
//!
//! # 使用例
//! ```ignore
//! let queue = InMemoryTaskQueue::start(4, Arc::new(UlidGenerator::new(SystemClock)));
//! let id = queue.submit(Signature::new("add", args), SubmitOptions::default()).await?;
//! let status = queue.wait_settled(id).await?;
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{ExecutionId, ExecutionStatus, Signature, TaskChain, TaskName, TaskState};
use crate::ports::{
    GroupHandle, IdGenerator, PeriodicEntry, QueueError, QueueTask, SubmitOptions, TaskBinding,
    TaskQueue,
};

const DEFAULT_RETENTION: usize = 1024;

enum Job {
    Single {
        id: ExecutionId,
        signature: Signature,
        options: SubmitOptions,
    },
    Chain {
        id: ExecutionId,
        chain: TaskChain,
        options: SubmitOptions,
    },
}

struct Registered {
    slot: usize,
    task: Arc<dyn QueueTask>,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<TaskName, Registered>,
    next_slot: usize,
    executions: HashMap<ExecutionId, ExecutionStatus>,
    results: HashMap<ExecutionId, Value>,
    /// Terminal executions, oldest first.
    settled_order: VecDeque<ExecutionId>,
    periodic: BTreeMap<TaskName, PeriodicEntry>,
}

struct Shared {
    state: Mutex<QueueState>,
    jobs_rx: Mutex<mpsc::UnboundedReceiver<Job>>,
    settled: Notify,
    closed: AtomicBool,
    retention: AtomicUsize,
    ids: Arc<dyn IdGenerator>,
}

pub struct InMemoryTaskQueue {
    shared: Arc<Shared>,
    jobs_tx: mpsc::UnboundedSender<Job>,
    workers: StdMutex<Option<WorkerGroup>>,
}

impl InMemoryTaskQueue {
    /// Spawn `workers` workers on the current tokio runtime.
    pub fn start(workers: usize, ids: Arc<dyn IdGenerator>) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            jobs_rx: Mutex::new(jobs_rx),
            settled: Notify::new(),
            closed: AtomicBool::new(false),
            retention: AtomicUsize::new(DEFAULT_RETENTION),
            ids,
        });
        let group = WorkerGroup::spawn(workers.max(1), &shared);
        info!(workers = workers.max(1), "in-memory task queue started");

        Self {
            shared,
            jobs_tx,
            workers: StdMutex::new(Some(group)),
        }
    }

    /// How many terminal executions keep their status (and retained value).
    ///
    /// Older ones are evicted first; `status` then reports `None` for them.
    pub fn with_retention(self, settled: usize) -> Self {
        self.shared.retention.store(settled.max(1), Ordering::Relaxed);
        self
    }

    /// Stop taking jobs, wait for in-flight ones, then release every waiter.
    ///
    /// Jobs still in the channel never run; waiting on them yields
    /// `QueueError::ShutDown`.
    pub async fn shutdown(&self) {
        let group = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(group) = group {
            group.shutdown_and_join().await;
        }
        self.shared.closed.store(true, Ordering::Release);
        self.shared.settled.notify_waiters();
        info!("in-memory task queue stopped");
    }

    /// Block until `execution` reaches a terminal state.
    pub async fn wait_settled(&self, execution: ExecutionId) -> Result<ExecutionStatus, QueueError> {
        self.shared
            .wait_settled(execution)
            .await
            .map(|(status, _)| status)
    }

    /// Value retained for `execution` (only when submitted without `ignore_result`).
    pub async fn result(&self, execution: ExecutionId) -> Option<Value> {
        self.shared.state.lock().await.results.get(&execution).cloned()
    }

    async fn ensure_registered<'a>(
        &self,
        names: impl IntoIterator<Item = &'a TaskName>,
    ) -> Result<(), QueueError> {
        let state = self.shared.state.lock().await;
        for name in names {
            if !state.tasks.contains_key(name) {
                return Err(QueueError::NotRegistered(name.clone()));
            }
        }
        Ok(())
    }

    async fn enqueue(&self, id: ExecutionId, job: Job) -> Result<(), QueueError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(QueueError::ShutDown);
        }
        self.shared
            .state
            .lock()
            .await
            .executions
            .insert(id, ExecutionStatus::queued());
        self.jobs_tx.send(job).map_err(|_| QueueError::ShutDown)
    }
}

impl Shared {
    async fn set_status(&self, id: ExecutionId, status: ExecutionStatus) {
        self.state.lock().await.executions.insert(id, status);
    }

    async fn settle(&self, id: ExecutionId, status: ExecutionStatus, result: Option<Value>) {
        {
            let mut state = self.state.lock().await;
            state.executions.insert(id, status);
            if let Some(value) = result {
                state.results.insert(id, value);
            }
            state.settled_order.push_back(id);

            let retention = self.retention.load(Ordering::Relaxed);
            while state.settled_order.len() > retention {
                if let Some(old) = state.settled_order.pop_front() {
                    state.executions.remove(&old);
                    state.results.remove(&old);
                }
            }
        }
        self.settled.notify_waiters();
    }

    /// Drop status and retained value of executions nobody will ask about again.
    async fn forget(&self, ids: &[ExecutionId]) {
        let mut state = self.state.lock().await;
        for id in ids {
            state.executions.remove(id);
            state.results.remove(id);
        }
        state.settled_order.retain(|id| !ids.contains(id));
    }

    async fn wait_settled(
        &self,
        id: ExecutionId,
    ) -> Result<(ExecutionStatus, Option<Value>), QueueError> {
        loop {
            // 状態確認より先に登録しておかないと通知を取りこぼす
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock().await;
                match state.executions.get(&id) {
                    Some(status) if status.state.is_terminal() => {
                        return Ok((status.clone(), state.results.get(&id).cloned()));
                    }
                    Some(_) => {}
                    None => {
                        return Err(QueueError::OperationFailed(format!(
                            "execution {id} is unknown or no longer retained"
                        )));
                    }
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(QueueError::ShutDown);
            }
            notified.await;
        }
    }

    /// Run one signature to completion. Panics count as failures.
    async fn run_signature(&self, id: ExecutionId, signature: Signature) -> Result<Value, String> {
        let task = {
            let state = self.state.lock().await;
            state.tasks.get(&signature.task).map(|r| Arc::clone(&r.task))
        };
        let Some(task) = task else {
            return Err(QueueError::NotRegistered(signature.task).to_string());
        };

        self.set_status(id, ExecutionStatus::running()).await;
        match AssertUnwindSafe(task.run(id, signature.args))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(failure)) => Err(failure.to_string()),
            Err(_) => Err("task panicked".to_string()),
        }
    }

    async fn run_single(
        &self,
        worker_id: usize,
        id: ExecutionId,
        signature: Signature,
        options: SubmitOptions,
    ) {
        let task = signature.task.clone();
        debug!(worker_id, %id, %task, "running task");

        match self.run_signature(id, signature).await {
            Ok(value) => {
                let kept = (!options.ignore_result).then_some(value);
                self.settle(id, ExecutionStatus::succeeded(), kept).await;
            }
            Err(reason) => {
                warn!(worker_id, %id, %task, %reason, "task failed");
                self.settle(id, ExecutionStatus::failed(reason), None).await;
            }
        }
    }

    /// Stages run strictly in order; each output becomes the next stage's
    /// sole positional argument. The first failure fails the chain.
    async fn run_chain(
        &self,
        worker_id: usize,
        id: ExecutionId,
        chain: TaskChain,
        options: SubmitOptions,
    ) {
        debug!(worker_id, %id, stages = chain.len(), "running chain");
        self.set_status(id, ExecutionStatus::running()).await;

        let mut upstream: Option<Value> = None;
        for stage in chain.into_stages() {
            let Signature { task, mut args } = stage;
            if let Some(value) = upstream.take() {
                args.args = vec![value];
            }

            let stage_id = self.ids.generate_execution_id();
            self.set_status(stage_id, ExecutionStatus::queued()).await;
            match self.run_signature(stage_id, Signature::new(task.clone(), args)).await {
                Ok(value) => {
                    self.settle(stage_id, ExecutionStatus::succeeded(), None).await;
                    upstream = Some(value);
                }
                Err(reason) => {
                    warn!(worker_id, %id, stage = %task, %reason, "chain stage failed");
                    self.settle(stage_id, ExecutionStatus::failed(reason.clone()), None)
                        .await;
                    self.settle(
                        id,
                        ExecutionStatus::failed(format!("stage '{task}' failed: {reason}")),
                        None,
                    )
                    .await;
                    return;
                }
            }
        }

        let kept = upstream.filter(|_| !options.ignore_result);
        self.settle(id, ExecutionStatus::succeeded(), kept).await;
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn register(
        &self,
        name: TaskName,
        task: Arc<dyn QueueTask>,
    ) -> Result<TaskBinding, QueueError> {
        let mut state = self.shared.state.lock().await;
        let slot = state.next_slot;
        state.next_slot += 1;
        if let Some(old) = state.tasks.insert(name.clone(), Registered { slot, task }) {
            debug!(task = %name, old_slot = old.slot, slot, "queue task replaced");
        }
        Ok(TaskBinding::new(name, slot))
    }

    async fn unregister(&self, name: &TaskName) -> Result<bool, QueueError> {
        let removed = self.shared.state.lock().await.tasks.remove(name).is_some();
        if removed {
            debug!(task = %name, "queue task unregistered");
        }
        Ok(removed)
    }

    async fn submit(
        &self,
        signature: Signature,
        options: SubmitOptions,
    ) -> Result<ExecutionId, QueueError> {
        self.ensure_registered([&signature.task]).await?;
        let id = self.shared.ids.generate_execution_id();
        self.enqueue(
            id,
            Job::Single {
                id,
                signature,
                options,
            },
        )
        .await?;
        Ok(id)
    }

    async fn compose_sequential(
        &self,
        chain: TaskChain,
        options: SubmitOptions,
    ) -> Result<ExecutionId, QueueError> {
        if chain.is_empty() {
            return Err(QueueError::EmptyChain);
        }
        self.ensure_registered(chain.stages().iter().map(|s| &s.task))
            .await?;
        let id = self.shared.ids.generate_execution_id();
        self.enqueue(id, Job::Chain { id, chain, options }).await?;
        Ok(id)
    }

    async fn fan_out(&self, signatures: Vec<Signature>) -> Result<GroupHandle, QueueError> {
        let group = self.shared.ids.generate_execution_id();
        let mut members = Vec::with_capacity(signatures.len());
        let mut names = Vec::with_capacity(signatures.len());
        for signature in signatures {
            names.push(signature.task.clone());
            members.push(self.submit(signature, SubmitOptions::default()).await?);
        }

        let shared = Arc::clone(&self.shared);
        let waits = members.clone();
        let results = async move {
            let settled: Vec<(ExecutionStatus, Option<Value>)> =
                future::try_join_all(waits.iter().map(|id| shared.wait_settled(*id))).await?;
            shared.forget(&waits).await;
            settled
                .into_iter()
                .zip(names)
                .enumerate()
                .map(|(index, ((status, value), task))| match status.state {
                    TaskState::Succeeded => Ok(value.unwrap_or(Value::Null)),
                    _ => Err(QueueError::MemberFailed {
                        group,
                        index,
                        task,
                        reason: status.error.unwrap_or_default(),
                    }),
                })
                .collect::<Result<Vec<Value>, QueueError>>()
        }
        .boxed();

        Ok(GroupHandle::new(group, members, results))
    }

    async fn status(&self, execution: ExecutionId) -> Result<Option<ExecutionStatus>, QueueError> {
        Ok(self
            .shared
            .state
            .lock()
            .await
            .executions
            .get(&execution)
            .cloned())
    }

    async fn install_periodic(
        &self,
        entry: PeriodicEntry,
    ) -> Result<Option<PeriodicEntry>, QueueError> {
        let mut state = self.shared.state.lock().await;
        Ok(state.periodic.insert(entry.name.clone(), entry))
    }

    async fn remove_periodic(&self, name: &TaskName) -> Result<Option<PeriodicEntry>, QueueError> {
        Ok(self.shared.state.lock().await.periodic.remove(name))
    }

    async fn periodic_entries(&self) -> Result<Vec<PeriodicEntry>, QueueError> {
        Ok(self
            .shared
            .state
            .lock()
            .await
            .periodic
            .values()
            .cloned()
            .collect())
    }
}

/// Worker group handle.
/// - `request_shutdown()` で新しいジョブの取得を止める
/// - `shutdown_and_join()` で実行中のジョブの完了まで待てる
struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    fn spawn(n: usize, shared: &Arc<Shared>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let shared = Arc::clone(shared);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker_loop(worker_id, shared, rx)));
        }

        Self { shutdown_tx, joins }
    }

    fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // 受信待ちは shutdown と競合させる（recv は cancel-safe）
        let job = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            job = async { shared.jobs_rx.lock().await.recv().await } => job,
        };

        // 送信側（キュー本体）が drop されたら終了
        let Some(job) = job else {
            break;
        };

        match job {
            Job::Single {
                id,
                signature,
                options,
            } => shared.run_single(worker_id, id, signature, options).await,
            Job::Chain { id, chain, options } => {
                shared.run_chain(worker_id, id, chain, options).await
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskArgs, TaskFailure};
    use crate::ports::{SystemClock, UlidGenerator};
    use serde_json::json;

    /// Returns its positional arguments as a list.
    struct Echo;

    #[async_trait]
    impl QueueTask for Echo {
        async fn run(&self, _execution: ExecutionId, args: TaskArgs) -> Result<Value, TaskFailure> {
            Ok(Value::Array(args.args))
        }
    }

    /// Adds one to its single argument.
    struct Increment;

    #[async_trait]
    impl QueueTask for Increment {
        async fn run(&self, _execution: ExecutionId, args: TaskArgs) -> Result<Value, TaskFailure> {
            let n = args
                .args
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| TaskFailure::new("expected one integer"))?;
            Ok(json!(n + 1))
        }
    }

    struct Boom;

    #[async_trait]
    impl QueueTask for Boom {
        async fn run(&self, _execution: ExecutionId, _args: TaskArgs) -> Result<Value, TaskFailure> {
            Err(TaskFailure::new("boom"))
        }
    }

    async fn queue() -> InMemoryTaskQueue {
        let queue = InMemoryTaskQueue::start(2, Arc::new(UlidGenerator::new(SystemClock)));
        queue.register("echo".into(), Arc::new(Echo)).await.unwrap();
        queue.register("inc".into(), Arc::new(Increment)).await.unwrap();
        queue.register("boom".into(), Arc::new(Boom)).await.unwrap();
        queue
    }

    #[tokio::test]
    async fn submit_runs_and_retains_result_unless_ignored() {
        let q = queue().await;
        let sig = Signature::new("echo", TaskArgs::positional([json!(1), json!(2)]));

        let kept = q.submit(sig.clone(), SubmitOptions::default()).await.unwrap();
        let ignored = q.submit(sig, SubmitOptions::ignore_result()).await.unwrap();

        assert_eq!(q.wait_settled(kept).await.unwrap(), ExecutionStatus::succeeded());
        assert_eq!(q.wait_settled(ignored).await.unwrap(), ExecutionStatus::succeeded());
        assert_eq!(q.result(kept).await, Some(json!([1, 2])));
        assert_eq!(q.result(ignored).await, None);
    }

    #[tokio::test]
    async fn failure_is_reported_through_status() {
        let q = queue().await;
        let id = q
            .submit(Signature::new("boom", TaskArgs::new()), SubmitOptions::default())
            .await
            .unwrap();

        let status = q.wait_settled(id).await.unwrap();
        assert_eq!(status, ExecutionStatus::failed("boom"));
        assert_eq!(q.status(id).await.unwrap(), Some(status));
    }

    #[tokio::test]
    async fn unregistered_task_is_rejected_at_submission() {
        let q = queue().await;
        let err = q
            .submit(Signature::new("missing", TaskArgs::new()), SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotRegistered(name) if name.as_str() == "missing"));
    }

    #[tokio::test]
    async fn chain_feeds_each_output_forward() {
        let q = queue().await;
        let chain = TaskChain::new(vec![
            Signature::new("inc", TaskArgs::single(json!(1))),
            Signature::new("inc", TaskArgs::new()),
            Signature::new("echo", TaskArgs::new()),
        ]);

        let id = q
            .compose_sequential(chain, SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(q.wait_settled(id).await.unwrap(), ExecutionStatus::succeeded());
        assert_eq!(q.result(id).await, Some(json!([3])));
    }

    #[tokio::test]
    async fn chain_stops_at_first_failed_stage() {
        let q = queue().await;
        let chain = TaskChain::new(vec![
            Signature::new("boom", TaskArgs::new()),
            Signature::new("inc", TaskArgs::new()),
        ]);

        let id = q
            .compose_sequential(chain, SubmitOptions::default())
            .await
            .unwrap();
        let status = q.wait_settled(id).await.unwrap();
        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(status.error.as_deref(), Some("stage 'boom' failed: boom"));
    }

    #[tokio::test]
    async fn empty_chain_is_rejected() {
        let q = queue().await;
        let err = q
            .compose_sequential(TaskChain::new(vec![]), SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::EmptyChain));
    }

    #[tokio::test]
    async fn fan_out_joins_in_submission_order() {
        let q = queue().await;
        let group = q
            .fan_out(
                (0..5)
                    .map(|i| Signature::new("inc", TaskArgs::single(json!(i))))
                    .collect(),
            )
            .await
            .unwrap();

        assert_eq!(group.members().len(), 5);
        let values = group.join().await.unwrap();
        assert_eq!(values, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
    }

    #[tokio::test]
    async fn fan_out_members_are_forgotten_after_join() {
        let q = queue().await;
        let group = q
            .fan_out(vec![Signature::new("inc", TaskArgs::single(json!(2)))])
            .await
            .unwrap();
        let member = group.members()[0];

        assert_eq!(group.join().await.unwrap(), vec![json!(3)]);
        assert_eq!(q.result(member).await, None);
        assert_eq!(q.status(member).await.unwrap(), None);
    }

    #[tokio::test]
    async fn retention_evicts_oldest_settled_executions() {
        let q = queue().await.with_retention(2);
        let mut ids = Vec::new();
        for i in 0..3 {
            let id = q
                .submit(
                    Signature::new("echo", TaskArgs::single(json!(i))),
                    SubmitOptions::default(),
                )
                .await
                .unwrap();
            q.wait_settled(id).await.unwrap();
            ids.push(id);
        }

        assert_eq!(q.status(ids[0]).await.unwrap(), None);
        assert_eq!(q.result(ids[0]).await, None);
        assert_eq!(q.result(ids[2]).await, Some(json!([2])));
        assert!(matches!(
            q.wait_settled(ids[0]).await,
            Err(QueueError::OperationFailed(_))
        ));
    }

    #[tokio::test]
    async fn unregistered_body_and_removed_entry_are_gone() {
        let q = queue().await;
        assert!(q.unregister(&"echo".into()).await.unwrap());
        assert!(!q.unregister(&"echo".into()).await.unwrap());
        assert!(matches!(
            q.submit(Signature::new("echo", TaskArgs::new()), SubmitOptions::default())
                .await,
            Err(QueueError::NotRegistered(_))
        ));

        let entry = PeriodicEntry {
            name: "inc".into(),
            target: "inc".into(),
            schedule: crate::domain::CronSchedule::every_minute(),
            args: TaskArgs::single(json!(0)),
        };
        q.install_periodic(entry.clone()).await.unwrap();
        assert_eq!(q.remove_periodic(&"inc".into()).await.unwrap(), Some(entry));
        assert_eq!(q.remove_periodic(&"inc".into()).await.unwrap(), None);
        assert!(q.periodic_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fan_out_surfaces_member_failure() {
        let q = queue().await;
        let group = q
            .fan_out(vec![
                Signature::new("inc", TaskArgs::single(json!(1))),
                Signature::new("boom", TaskArgs::new()),
            ])
            .await
            .unwrap();

        let err = group.join().await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::MemberFailed { index: 1, ref reason, .. } if reason == "boom"
        ));
    }

    #[tokio::test]
    async fn periodic_table_is_last_write_wins() {
        let q = queue().await;
        let entry = |minute: &str| PeriodicEntry {
            name: "echo".into(),
            target: "echo".into(),
            schedule: crate::domain::CronSchedule::every_minute().with_minute(minute),
            args: TaskArgs::new(),
        };

        assert!(q.install_periodic(entry("0")).await.unwrap().is_none());
        let replaced = q.install_periodic(entry("30")).await.unwrap();
        assert_eq!(replaced, Some(entry("0")));

        let entries = q.periodic_entries().await.unwrap();
        assert_eq!(entries, vec![entry("30")]);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let q = queue().await;
        q.shutdown().await;
        let err = q
            .submit(Signature::new("echo", TaskArgs::new()), SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::ShutDown));
    }
}
