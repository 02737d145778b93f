use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use spindle_core::domain::{Signature, TaskArgs, TaskFailure, TaskName};
use spindle_core::impls::{BeatLoop, InMemoryCache, InMemoryDocumentStore, InMemoryTaskQueue};
use spindle_core::ports::{Clock, SystemClock, UlidGenerator};
use spindle_core::typed::{LogicCatalog, TaskLogic, typed};
use spindle_core::{CacheClient, SpindleConfig, TaskManager, TaskRun};

#[derive(Debug, Deserialize)]
struct InsertOptions {
    table: String,
}

#[derive(Debug, Clone, Serialize)]
struct Row {
    table: String,
    value: Value,
}

/// 上流の値を「テーブル」に追記するだけのロジック
struct Inserter {
    rows: Mutex<Vec<Row>>,
}

#[async_trait]
impl TaskLogic for Inserter {
    async fn call(&self, args: TaskArgs) -> Result<Value, TaskFailure> {
        let opts: InsertOptions = serde_json::from_value(Value::Object(args.kwargs))
            .map_err(|e| TaskFailure::new(format!("kwargs: {e}")))?;
        let value = args
            .args
            .into_iter()
            .next()
            .ok_or_else(|| TaskFailure::new("nothing to insert"))?;

        let mut rows = self.rows.lock().await;
        rows.push(Row {
            table: opts.table,
            value,
        });
        serde_json::to_value(&rows[rows.len() - 1]).map_err(|e| TaskFailure::new(e.to_string()))
    }
}

/// 現在時刻（UNIX 秒）を返すだけの周期タスク
fn heartbeat(clock: Arc<dyn Clock>) -> Arc<dyn TaskLogic> {
    typed(move |(): ()| Ok(clock.now().timestamp()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SpindleConfig::from_env()?;

    // (A) 外部協調者（ここではすべてインメモリ）
    let queue = Arc::new(InMemoryTaskQueue::start(
        config.workers,
        Arc::new(UlidGenerator::new(SystemClock)),
    ));
    let cache = Arc::new(InMemoryCache::new());
    let store = Arc::new(InMemoryDocumentStore::new());

    // (B) 設定辞書から参照されるロジック
    let mut catalog = LogicCatalog::new();
    catalog.insert("add", typed(|(x, y): (i64, i64)| Ok(x + y)))?;
    catalog.insert(
        "insert",
        Arc::new(Inserter {
            rows: Mutex::new(Vec::new()),
        }),
    )?;
    catalog.insert("heartbeat", heartbeat(Arc::new(SystemClock)))?;

    // (C) 登録
    let manager = TaskManager::builder(queue.clone(), cache.clone(), store)
        .with_config(config)
        .with_catalog(catalog)
        .register_tasks([
            ("add", json!({ "logic": "add", "default_args": [2, 2] })),
            (
                "insert",
                json!({
                    "logic": "insert",
                    "depends_on": "add",
                    "default_kwargs": { "table": "sums" },
                }),
            ),
            (
                "heartbeat",
                json!({ "logic": "heartbeat", "schedule": {}, "store_results": "all" }),
            ),
        ])
        .build()
        .await?;

    // (D) 同期実行: チェーン add -> insert
    let insert = TaskName::new("insert");
    let run = manager.run_task(&insert, true, TaskArgs::new()).await?;
    info!(result = ?run.into_result(), "insert finished");

    // (E) 非同期実行と結果の取得
    let add = TaskName::new("add");
    if let TaskRun::Submitted(execution) = manager
        .run_task(&add, false, TaskArgs::positional([json!(40), json!(2)]))
        .await?
    {
        let status = queue.wait_settled(execution).await?;
        info!(%execution, state = ?status.state, latest = ?manager.get_result(&add).await?, "add settled");
    }

    // (F) fan-out / fan-in
    let sums = manager
        .parallelize(
            (1..=3)
                .map(|i| Signature::new("add", TaskArgs::positional([json!(i), json!(i)])))
                .collect(),
            Some(&TaskName::new("sums")),
        )
        .await?;
    info!(?sums, "parallel run finished");

    let peek = CacheClient::new(cache);
    info!(pointers = ?peek.get_dynamic(&manager.config().results_cache_key).await?, "result pointers");

    // (G) 周期トリガを少しだけ回す
    let beat = BeatLoop::new(queue.clone(), Arc::new(SystemClock)).with_max_sleep(Duration::from_millis(200));
    let (stop_tx, stop_rx) = watch::channel(false);
    let beat_task = tokio::spawn(async move { beat.run(stop_rx).await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    let _ = stop_tx.send(true);
    beat_task.await?;

    info!(
        heartbeats = manager.get_all_results(&TaskName::new("heartbeat")).await?.len(),
        "done"
    );
    queue.shutdown().await;
    Ok(())
}
