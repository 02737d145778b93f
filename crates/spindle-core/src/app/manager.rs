//! TaskManager - アプリケーションが使う唯一の入口
//!
//! # 主な操作
//! - `register_tasks`: 設定辞書を登録（キューへの束縛・周期トリガの設定まで）
//! - `schedule_task`: 投げっぱなしの投入
//! - `run_task`: 同期なら「ポインタが動くまで」待って最新結果を返す
//! - `get_result` / `get_all_results`: 名前で結果を引く
//! - `parallelize`: fan-out / fan-in
//!
//! # 同期実行の待ち方
//! 1. 現在のポインタを読む
//! 2. 投入する
//! 3. ポインタ移動の通知か、指数バックオフのスリープのどちらか早い方で起きる
//! 4. ポインタが動いていれば最新結果を返す
//! 5. キューが Failed を報告していれば `TaskError::TaskFailed`
//! 6. 期限を過ぎたら `TaskError::Timeout`

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::app::chain::ChainBuilder;
use crate::app::registry::TaskRegistry;
use crate::app::result_store::ResultStore;
use crate::app::scheduler::Scheduler;
use crate::app::worker::{ChainTask, StoringTask};
use crate::config::SpindleConfig;
use crate::domain::{
    ExecutionId, ExecutionStatus, Signature, StorePolicy, TaskArgs, TaskDescriptor, TaskEntry,
    TaskName, TaskState,
};
use crate::error::TaskError;
use crate::ports::{
    Cache, Clock, DocumentStore, IdGenerator, QueueError, SubmitOptions, SystemClock, TaskQueue,
    UlidGenerator,
};
use crate::typed::LogicCatalog;

/// Outcome of `run_task`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRun {
    /// Asynchronous submission; the queue's execution id.
    Submitted(ExecutionId),
    /// Synchronous run; the latest result (`None` for tasks that store nothing).
    Completed(Option<Value>),
}

impl TaskRun {
    pub fn into_result(self) -> Option<Value> {
        match self {
            TaskRun::Submitted(_) => None,
            TaskRun::Completed(v) => v,
        }
    }
}

/// Wiring for a [`TaskManager`].
///
/// # 使用例
/// ```ignore
/// let manager = TaskManager::builder(queue, cache, store)
///     .with_config(SpindleConfig::from_env()?)
///     .register(TaskDescriptor::builder("add", typed(|(x, y): (i64, i64)| Ok(x + y))).build())
///     .build()
///     .await?;
/// ```
pub struct TaskManagerBuilder {
    queue: Arc<dyn TaskQueue>,
    cache: Arc<dyn Cache>,
    store: Arc<dyn DocumentStore>,
    config: SpindleConfig,
    catalog: LogicCatalog,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    entries: Vec<(TaskName, TaskEntry)>,
}

impl TaskManagerBuilder {
    pub fn with_config(mut self, config: SpindleConfig) -> Self {
        self.config = config;
        self
    }

    /// Logic referenced by name from raw configuration entries.
    pub fn with_catalog(mut self, catalog: LogicCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn register(mut self, descriptor: TaskDescriptor) -> Self {
        self.entries
            .push((descriptor.name().clone(), TaskEntry::Descriptor(descriptor)));
        self
    }

    /// Add a configuration map (`name -> descriptor | raw config`).
    pub fn register_tasks<I, K, V>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<TaskName>,
        V: Into<TaskEntry>,
    {
        self.entries
            .extend(tasks.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Validate and register every collected entry.
    ///
    /// # Fail-fast
    /// 設定エラー・循環・未知の依存はここで `TaskError::Configuration` になります。
    pub async fn build(self) -> Result<TaskManager, TaskError> {
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&self.clock))));
        let results = Arc::new(ResultStore::new(
            self.store,
            self.cache,
            ids,
            self.clock,
            self.config.results_collection.clone(),
            self.config.results_cache_key.clone(),
        ));

        let manager = TaskManager {
            registry: Arc::new(RwLock::new(TaskRegistry::new())),
            catalog: self.catalog,
            scheduler: Scheduler::new(Arc::clone(&self.queue)),
            queue: self.queue,
            results,
            config: self.config,
        };
        manager.register_entries(self.entries).await?;
        Ok(manager)
    }
}

pub struct TaskManager {
    registry: Arc<RwLock<TaskRegistry>>,
    catalog: LogicCatalog,
    queue: Arc<dyn TaskQueue>,
    results: Arc<ResultStore>,
    scheduler: Scheduler,
    config: SpindleConfig,
}

impl TaskManager {
    pub fn builder(
        queue: Arc<dyn TaskQueue>,
        cache: Arc<dyn Cache>,
        store: Arc<dyn DocumentStore>,
    ) -> TaskManagerBuilder {
        TaskManagerBuilder {
            queue,
            cache,
            store,
            config: SpindleConfig::default(),
            catalog: LogicCatalog::new(),
            clock: Arc::new(SystemClock),
            ids: None,
            entries: Vec::new(),
        }
    }

    pub fn config(&self) -> &SpindleConfig {
        &self.config
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    /// Register a configuration map. The batch is all-or-nothing.
    pub async fn register_tasks<I, K, V>(&self, tasks: I) -> Result<(), TaskError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<TaskName>,
        V: Into<TaskEntry>,
    {
        self.register_entries(
            tasks
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
        .await
    }

    pub async fn register(&self, descriptor: TaskDescriptor) -> Result<(), TaskError> {
        let name = descriptor.name().clone();
        self.register_entries(vec![(name, TaskEntry::Descriptor(descriptor))])
            .await
    }

    async fn register_entries(&self, entries: Vec<(TaskName, TaskEntry)>) -> Result<(), TaskError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut registry = self.registry.write().await;

        // 検証はコピー上で行い、成功したときだけ差し替える
        let mut staged = registry.clone();
        let registered = staged.register_batch(entries, &self.catalog)?;

        for descriptor in &registered {
            let name = descriptor.name().clone();
            let previous = registry.get(&name);
            let storing = StoringTask::new(Arc::clone(descriptor), Arc::clone(&self.results));
            let binding = self.queue.register(name.clone(), Arc::new(storing)).await?;
            descriptor.bind(binding)?;

            if descriptor.depends_on().is_some() {
                let chain = ChainTask::new(
                    name.clone(),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.queue),
                );
                self.queue
                    .register(name.chain_name(), Arc::new(chain))
                    .await?;
            }

            // 上書きされた記述子が残したチェーンタスクと周期エントリを片付ける
            if let Some(previous) = &previous {
                if previous.depends_on().is_some() && descriptor.depends_on().is_none() {
                    self.queue.unregister(&name.chain_name()).await?;
                }
                self.scheduler.retire(previous, descriptor).await?;
            }
            self.scheduler.install(descriptor).await?;
        }

        *registry = staged;
        info!(registered = registered.len(), total = registry.len(), "tasks registered");
        Ok(())
    }

    pub async fn descriptor(&self, name: &TaskName) -> Option<Arc<TaskDescriptor>> {
        self.registry.read().await.resolve(name)
    }

    pub async fn task_names(&self) -> Vec<TaskName> {
        self.registry.read().await.names()
    }

    /// Fire-and-forget submission.
    ///
    /// With no arguments the task's defaults are used. A task with
    /// `depends_on` (or its `<name>_chain` alias) runs its whole chain; the
    /// arguments then go to the chain's first stage. The queue never retains
    /// the return value.
    #[instrument(skip(self, args), fields(task = %name))]
    pub async fn schedule_task(&self, name: &TaskName, args: TaskArgs) -> Result<ExecutionId, TaskError> {
        let registry = self.registry.read().await;
        let descriptor = registry
            .resolve(name)
            .ok_or_else(|| TaskError::UnknownTask(name.clone()))?;

        let execution = if descriptor.depends_on().is_some() {
            let chain = ChainBuilder::new(&registry).build(descriptor.name(), args)?;
            drop(registry);
            self.queue
                .compose_sequential(chain, SubmitOptions::ignore_result())
                .await?
        } else {
            drop(registry);
            let signature = Signature::new(descriptor.name().clone(), descriptor.resolve_args(args));
            self.queue
                .submit(signature, SubmitOptions::ignore_result())
                .await?
        };
        debug!(%execution, "task submitted");
        Ok(execution)
    }

    /// Submit, and when `synchronous` wait up to the configured deadline.
    pub async fn run_task(
        &self,
        name: &TaskName,
        synchronous: bool,
        args: TaskArgs,
    ) -> Result<TaskRun, TaskError> {
        if synchronous {
            self.run_task_with_timeout(name, args, self.config.run_timeout)
                .await
                .map(TaskRun::Completed)
        } else {
            self.schedule_task(name, args).await.map(TaskRun::Submitted)
        }
    }

    /// Submit once and return the next new result of `name`.
    #[instrument(skip(self, args), fields(task = %name))]
    pub async fn run_task_with_timeout(
        &self,
        name: &TaskName,
        args: TaskArgs,
        timeout: Duration,
    ) -> Result<Option<Value>, TaskError> {
        let descriptor = self
            .descriptor(name)
            .await
            .ok_or_else(|| TaskError::UnknownTask(name.clone()))?;
        let target = descriptor.name().clone();

        let before = self.results.pointer(&target).await?;
        let execution = self.schedule_task(name, args).await?;
        let deadline = Instant::now() + timeout;
        let mut step = self.config.poll_initial;

        loop {
            let moved = self.results.pointer_moved();
            tokio::pin!(moved);
            moved.as_mut().enable();

            let current = self.results.pointer(&target).await?;
            if current.is_some() && current != before {
                return self.results.get_result(&target).await;
            }

            if let Some(status) = self.queue.status(execution).await? {
                match status.state {
                    TaskState::Failed => {
                        return Err(TaskError::TaskFailed {
                            task: target,
                            reason: status.error.unwrap_or_default(),
                        });
                    }
                    // 結果は成功報告より前に書かれているので、ここで読めば最新
                    TaskState::Succeeded => {
                        if descriptor.store_results() == StorePolicy::None {
                            return Ok(None);
                        }
                        return self.results.get_result(&target).await;
                    }
                    _ => {}
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TaskError::Timeout {
                    task: target,
                    waited: timeout,
                });
            }
            tokio::select! {
                _ = &mut moved => {}
                _ = tokio::time::sleep(step.min(deadline - now)) => {}
            }
            step = (step * 2).min(self.config.poll_max);
        }
    }

    pub async fn get_result(&self, name: &TaskName) -> Result<Option<Value>, TaskError> {
        self.results.get_result(name).await
    }

    pub async fn get_all_results(&self, name: &TaskName) -> Result<Vec<Value>, TaskError> {
        self.results.get_all_results(name).await
    }

    /// Run independent signatures concurrently and wait for all of them.
    ///
    /// Signatures without arguments use their task's defaults. With
    /// `cache_as`, the list of results is stored under that name as the
    /// latest result (no descriptor of that name needs to exist).
    #[instrument(skip(self, signatures), fields(members = signatures.len()))]
    pub async fn parallelize(
        &self,
        signatures: Vec<Signature>,
        cache_as: Option<&TaskName>,
    ) -> Result<Vec<Value>, TaskError> {
        let signatures = {
            let registry = self.registry.read().await;
            signatures
                .into_iter()
                .map(|sig| {
                    let descriptor = registry.require(&sig.task)?;
                    Ok(Signature::new(sig.task, descriptor.resolve_args(sig.args)))
                })
                .collect::<Result<Vec<_>, TaskError>>()?
        };

        let group = self.queue.fan_out(signatures).await?;
        let group_id = group.id();
        let values = group.join().await.map_err(|e| match e {
            QueueError::MemberFailed { task, reason, .. } => TaskError::TaskFailed { task, reason },
            other => other.into(),
        })?;

        if let Some(name) = cache_as {
            self.results
                .record(name, group_id, Value::Array(values.clone()), StorePolicy::Latest)
                .await?;
        }
        Ok(values)
    }

    pub async fn status(&self, execution: ExecutionId) -> Result<Option<ExecutionStatus>, TaskError> {
        Ok(self.queue.status(execution).await?)
    }
}
