//! Worker-side task bodies registered with the queue.
//!
//! - **StoringTask**: ロジックを実行し、ポリシーに従って結果を記録する
//! - **ChainTask**: `<name>_chain` の本体。チェーンを組んで投入するだけで、
//!   自身の結果は記録しない（各段が自分の結果を記録する）

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::app::chain::ChainBuilder;
use crate::app::registry::TaskRegistry;
use crate::app::result_store::ResultStore;
use crate::domain::{ExecutionId, TaskArgs, TaskDescriptor, TaskFailure, TaskName};
use crate::ports::{QueueTask, SubmitOptions, TaskQueue};

pub struct StoringTask {
    descriptor: Arc<TaskDescriptor>,
    results: Arc<ResultStore>,
}

impl StoringTask {
    pub fn new(descriptor: Arc<TaskDescriptor>, results: Arc<ResultStore>) -> Self {
        Self {
            descriptor,
            results,
        }
    }
}

#[async_trait]
impl QueueTask for StoringTask {
    async fn run(&self, execution: ExecutionId, args: TaskArgs) -> Result<Value, TaskFailure> {
        let name = self.descriptor.name();
        let value = self.descriptor.logic().call(args).await?;

        // 記録に失敗したら実行自体を失敗扱いにする（呼び出し側へ届く）
        if let Err(e) = self
            .results
            .record(name, execution, value.clone(), self.descriptor.store_results())
            .await
        {
            error!(task = %name, %execution, error = %e, "recording result failed");
            return Err(TaskFailure::new(e.to_string()));
        }
        Ok(value)
    }
}

pub struct ChainTask {
    target: TaskName,
    registry: Arc<RwLock<TaskRegistry>>,
    queue: Arc<dyn TaskQueue>,
}

impl ChainTask {
    pub fn new(
        target: TaskName,
        registry: Arc<RwLock<TaskRegistry>>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            target,
            registry,
            queue,
        }
    }
}

#[async_trait]
impl QueueTask for ChainTask {
    /// Returns the id of the submitted chain.
    async fn run(&self, execution: ExecutionId, args: TaskArgs) -> Result<Value, TaskFailure> {
        let chain = {
            let registry = self.registry.read().await;
            ChainBuilder::new(&registry)
                .build(&self.target, args)
                .map_err(|e| TaskFailure::new(e.to_string()))?
        };
        let stages = chain.len();
        let chain_id = self
            .queue
            .compose_sequential(chain, SubmitOptions::ignore_result())
            .await
            .map_err(|e| TaskFailure::new(e.to_string()))?;

        debug!(task = %self.target, %execution, chain = %chain_id, stages, "chain submitted");
        Ok(Value::String(chain_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StorePolicy;
    use crate::impls::{InMemoryCache, InMemoryDocumentStore, InMemoryTaskQueue};
    use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
    use crate::typed::typed;
    use serde_json::json;

    fn results() -> Arc<ResultStore> {
        Arc::new(ResultStore::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
            "_task_results_",
            "_task_results_",
        ))
    }

    #[tokio::test]
    async fn storing_task_records_per_policy() {
        let results = results();
        let ids = UlidGenerator::new(SystemClock);

        let add = Arc::new(
            TaskDescriptor::builder("add", typed(|(x, y): (i64, i64)| Ok(x + y))).build(),
        );
        let out = StoringTask::new(add, Arc::clone(&results))
            .run(ids.generate_execution_id(), TaskArgs::positional([json!(2), json!(2)]))
            .await
            .unwrap();
        assert_eq!(out, json!(4));
        assert_eq!(results.get_result(&"add".into()).await.unwrap(), Some(json!(4)));

        let quiet = Arc::new(
            TaskDescriptor::builder("quiet", typed(|(): ()| Ok(1)))
                .store_results(StorePolicy::None)
                .build(),
        );
        StoringTask::new(quiet, Arc::clone(&results))
            .run(ids.generate_execution_id(), TaskArgs::new())
            .await
            .unwrap();
        assert_eq!(results.get_result(&"quiet".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn storing_task_does_not_record_failures() {
        let results = results();
        let ids = UlidGenerator::new(SystemClock);
        let boom = Arc::new(
            TaskDescriptor::builder("boom", typed(|(): ()| Err::<(), _>(TaskFailure::new("nope"))))
                .build(),
        );
        let err = StoringTask::new(boom, Arc::clone(&results))
            .run(ids.generate_execution_id(), TaskArgs::new())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "nope");
        assert_eq!(results.get_result(&"boom".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn chain_task_submits_the_chain() {
        let queue = Arc::new(InMemoryTaskQueue::start(
            1,
            Arc::new(UlidGenerator::new(SystemClock)),
        ));
        let results = results();

        let mut registry = TaskRegistry::new();
        let add = registry
            .register(
                TaskDescriptor::builder("add", typed(|(x, y): (i64, i64)| Ok(x + y)))
                    .default_args([json!(2), json!(2)])
                    .build(),
            )
            .unwrap();
        let double = registry
            .register(
                TaskDescriptor::builder("double", typed(|x: i64| Ok(x * 2)))
                    .depends_on("add")
                    .build(),
            )
            .unwrap();
        for d in [add, double] {
            queue
                .register(d.name().clone(), Arc::new(StoringTask::new(d, Arc::clone(&results))))
                .await
                .unwrap();
        }

        let chain_task = ChainTask::new(
            "double".into(),
            Arc::new(RwLock::new(registry)),
            queue.clone(),
        );
        let chain_id = chain_task
            .run(UlidGenerator::new(SystemClock).generate_execution_id(), TaskArgs::new())
            .await
            .unwrap();
        let chain_id: ExecutionId = chain_id.as_str().unwrap().parse().unwrap();

        let status = queue.wait_settled(chain_id).await.unwrap();
        assert!(status.state.is_terminal());
        assert_eq!(results.get_result(&"add".into()).await.unwrap(), Some(json!(4)));
        assert_eq!(results.get_result(&"double".into()).await.unwrap(), Some(json!(8)));
    }
}
