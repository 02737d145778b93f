use std::sync::{Arc, Mutex};
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;

use spindle_core::domain::{Signature, TaskArgs, TaskDescriptor, TaskName};
use spindle_core::impls::{InMemoryCache, InMemoryDocumentStore, InMemoryTaskQueue};
use spindle_core::ports::{Cache, SubmitOptions, SystemClock, TaskQueue, UlidGenerator};
use spindle_core::typed::{LogicCatalog, typed};
use spindle_core::{SpindleConfig, TaskManager, TaskRun};

struct World {
    queue: Arc<InMemoryTaskQueue>,
    cache: Arc<InMemoryCache>,
    store: Arc<InMemoryDocumentStore>,
}

#[fixture]
fn world() -> World {
    World {
        queue: Arc::new(InMemoryTaskQueue::start(
            4,
            Arc::new(UlidGenerator::new(SystemClock)),
        )),
        cache: Arc::new(InMemoryCache::new()),
        store: Arc::new(InMemoryDocumentStore::new()),
    }
}

fn config() -> SpindleConfig {
    SpindleConfig::default()
        .with_run_timeout(Duration::from_secs(5))
        .with_poll_interval(Duration::from_millis(1), Duration::from_millis(20))
}

fn add_catalog() -> LogicCatalog {
    let mut catalog = LogicCatalog::new();
    catalog
        .insert("add", typed(|(x, y): (i64, i64)| Ok(x + y)))
        .unwrap();
    catalog
}

#[rstest]
#[tokio::test]
async fn add_with_defaults_runs_synchronously(world: World) {
    let manager = TaskManager::builder(world.queue.clone(), world.cache.clone(), world.store.clone())
        .with_config(config())
        .with_catalog(add_catalog())
        .register_tasks([("add", json!({ "logic": "add", "default_args": [2, 2] }))])
        .build()
        .await
        .unwrap();

    let run = manager
        .run_task(&TaskName::new("add"), true, TaskArgs::new())
        .await
        .unwrap();

    assert_eq!(run, TaskRun::Completed(Some(json!(4))));
    assert_eq!(world.store.len("_task_results_").await, 1);
}

#[rstest]
#[tokio::test]
async fn derived_chain_task_feeds_insert(world: World) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);

    let manager = TaskManager::builder(world.queue.clone(), world.cache.clone(), world.store.clone())
        .with_config(config())
        .register(
            TaskDescriptor::builder("add", typed(|(x, y): (i64, i64)| Ok(x + y)))
                .default_args([json!(2), json!(2)])
                .build(),
        )
        .register(
            TaskDescriptor::builder(
                "insert",
                typed(move |value: i64| {
                    recorder.lock().unwrap().push(value);
                    Ok(format!("inserted {value}"))
                }),
            )
            .depends_on("add")
            .build(),
        )
        .build()
        .await
        .unwrap();

    let execution = world
        .queue
        .submit(
            Signature::new("insert_chain", TaskArgs::new()),
            SubmitOptions::default(),
        )
        .await
        .unwrap();
    world.queue.wait_settled(execution).await.unwrap();
    let chain: spindle_core::ExecutionId = world
        .queue
        .result(execution)
        .await
        .and_then(|v| v.as_str().and_then(|s| s.parse().ok()))
        .unwrap();
    world.queue.wait_settled(chain).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![4]);
    assert_eq!(
        manager.get_result(&TaskName::new("insert")).await.unwrap(),
        Some(json!("inserted 4"))
    );
}

#[rstest]
#[tokio::test]
async fn parallelize_caches_under_an_unregistered_name(world: World) {
    let manager = TaskManager::builder(world.queue.clone(), world.cache.clone(), world.store.clone())
        .with_config(config())
        .with_catalog(add_catalog())
        .register_tasks([("add", json!({ "logic": "add" }))])
        .build()
        .await
        .unwrap();

    let values = manager
        .parallelize(
            (1..=3)
                .map(|i| Signature::new("add", TaskArgs::positional([json!(i), json!(100)])))
                .collect(),
            Some(&TaskName::new("batch1")),
        )
        .await
        .unwrap();

    assert_eq!(values, vec![json!(101), json!(102), json!(103)]);
    assert_eq!(
        manager.get_result(&TaskName::new("batch1")).await.unwrap(),
        Some(json!([101, 102, 103]))
    );
}

#[rstest]
#[tokio::test]
async fn three_stage_chain_runs_in_order(world: World) {
    let trace = Arc::new(Mutex::new(Vec::<String>::new()));
    let stage = |label: &'static str, f: fn(i64) -> i64| {
        let trace = Arc::clone(&trace);
        typed(move |x: i64| {
            trace.lock().unwrap().push(format!("{label}:{x}"));
            Ok(f(x))
        })
    };

    let manager = TaskManager::builder(world.queue.clone(), world.cache.clone(), world.store.clone())
        .with_config(config())
        .register(
            TaskDescriptor::builder("a", stage("a", |x| x + 1))
                .default_args([json!(1)])
                .build(),
        )
        .register(
            TaskDescriptor::builder("b", stage("b", |x| x * 10))
                .depends_on("a")
                .build(),
        )
        .register(
            TaskDescriptor::builder("c", stage("c", |x| x - 3))
                .depends_on("b")
                .build(),
        )
        .build()
        .await
        .unwrap();

    let result = manager
        .run_task(&TaskName::new("c"), true, TaskArgs::new())
        .await
        .unwrap()
        .into_result();

    assert_eq!(result, Some(json!(17)));
    assert_eq!(*trace.lock().unwrap(), vec!["a:1", "b:2", "c:20"]);
}

#[rstest]
#[tokio::test]
async fn pointer_and_result_agree(world: World) {
    let manager = TaskManager::builder(world.queue.clone(), world.cache.clone(), world.store.clone())
        .with_config(config())
        .with_catalog(add_catalog())
        .register_tasks([("add", json!({ "logic": "add" }))])
        .build()
        .await
        .unwrap();
    let add = TaskName::new("add");

    assert_eq!(world.cache.hash_get("_task_results_", "add").await.unwrap(), None);
    assert_eq!(manager.get_result(&add).await.unwrap(), None);

    for i in 0..5 {
        let returned = manager
            .run_task(&add, true, TaskArgs::positional([json!(i), json!(i)]))
            .await
            .unwrap()
            .into_result();
        // 同期実行の直後は、返った値が最新結果そのもの
        assert_eq!(returned, Some(json!(i * 2)));
        assert_eq!(manager.get_result(&add).await.unwrap(), returned);
    }

    let pointer = world
        .cache
        .hash_get("_task_results_", "add")
        .await
        .unwrap()
        .unwrap();
    assert!(pointer.starts_with("result-"));
    assert_eq!(world.store.len("_task_results_").await, 1);
}
