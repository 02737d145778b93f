//! ResultStore - 実行結果の永続化と名前による取得
//!
//! # 書き込み方針（StorePolicy）
//! - **Latest**: `task_name` をキーにした 1 回の upsert。1 タスク名につき
//!   レコードは高々 1 件（同名の古い All レコードはこのとき削除）
//! - **All**: 追記
//! - **None**: 何もしない
//!
//! どちらの書き込みでも、キャッシュの hash（既定 `_task_results_`）に
//! 「タスク名 → 最新 ResultId」のポインタを書きます。書き込みとポインタ
//! 更新はストア単位で直列化されるので、ポインタが古い値に戻ることはありません。
//!
//! ストアがエンコードできない結果は、文字列化して 1 回だけ再試行します。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::futures::Notified;
use tokio::sync::{Mutex, Notify, OnceCell};
use tracing::{debug, warn};

use crate::domain::{ExecutionId, ResultId, StorePolicy, TaskName, TaskResultRecord};
use crate::error::TaskError;
use crate::ports::{
    Cache, Clock, DocumentStore, Filter, IdGenerator, IndexField, StoreError,
};

pub struct ResultStore {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn Cache>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    collection: String,
    pointer_key: String,
    index_ready: OnceCell<()>,
    write_lock: Mutex<()>,
    changed: Notify,
}

impl ResultStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn Cache>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        collection: impl Into<String>,
        pointer_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cache,
            ids,
            clock,
            collection: collection.into(),
            pointer_key: pointer_key.into(),
            index_ready: OnceCell::new(),
            write_lock: Mutex::new(()),
            changed: Notify::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Persist one result. Returns the new record id, or `None` under `StorePolicy::None`.
    pub async fn record(
        &self,
        task_name: &TaskName,
        task_id: ExecutionId,
        result: Value,
        policy: StorePolicy,
    ) -> Result<Option<ResultId>, TaskError> {
        if policy == StorePolicy::None {
            return Ok(None);
        }
        self.ensure_index().await?;

        let record = TaskResultRecord {
            id: self.ids.generate_result_id(),
            task_name: task_name.clone(),
            task_id,
            task_result: result,
            recorded_at: self.clock.now(),
        };

        {
            let _guard = self.write_lock.lock().await;
            self.write(&record, policy).await?;
            self.cache
                .hash_set(&self.pointer_key, task_name.as_str(), &record.id.to_string())
                .await?;
        }
        self.changed.notify_waiters();

        debug!(task = %task_name, execution = %task_id, record = %record.id, ?policy, "result recorded");
        Ok(Some(record.id))
    }

    /// The most recent result for `task_name`, if any.
    pub async fn get_result(&self, task_name: &TaskName) -> Result<Option<Value>, TaskError> {
        let Some(pointer) = self.pointer(task_name).await? else {
            return Ok(None);
        };
        let doc = self
            .store
            .find_one(&self.collection, &Filter::by_id(pointer.clone()))
            .await?;
        match doc {
            Some(mut doc) => Ok(doc.remove("task_result")),
            None => {
                debug!(task = %task_name, record = %pointer, "result pointer has no record");
                Ok(None)
            }
        }
    }

    /// Every stored result for `task_name`, in insertion order.
    pub async fn get_all_results(&self, task_name: &TaskName) -> Result<Vec<Value>, TaskError> {
        let docs = self
            .store
            .find(
                &self.collection,
                &Filter::new().where_eq("task_name", task_name.as_str()),
            )
            .await?;
        Ok(docs
            .into_iter()
            .filter_map(|mut d| d.remove("task_result"))
            .collect())
    }

    /// Raw pointer value (the latest record id) for `task_name`.
    pub async fn pointer(&self, task_name: &TaskName) -> Result<Option<String>, TaskError> {
        Ok(self
            .cache
            .hash_get(&self.pointer_key, task_name.as_str())
            .await?)
    }

    /// Resolves on the next pointer move made through this store.
    ///
    /// Call `enable()` on the pinned future before reading the pointer, or
    /// a move between the read and the wait is missed.
    pub fn pointer_moved(&self) -> Notified<'_> {
        self.changed.notified()
    }

    async fn ensure_index(&self) -> Result<(), StoreError> {
        self.index_ready
            .get_or_try_init(|| async {
                self.store
                    .create_index(
                        &self.collection,
                        &[IndexField::asc("task_name"), IndexField::desc("task_id")],
                    )
                    .await
            })
            .await
            .map(|_| ())
    }

    async fn write(&self, record: &TaskResultRecord, policy: StorePolicy) -> Result<(), TaskError> {
        match self.write_once(record, policy).await {
            Err(StoreError::InvalidDocument(reason)) => {
                warn!(task = %record.task_name, %reason, "result not storable; retrying as string");
                let coerced = record.coerced_to_string();
                self.write_once(&coerced, policy)
                    .await
                    .map_err(|e| match e {
                        StoreError::InvalidDocument(reason) => TaskError::Serialization {
                            task: record.task_name.clone(),
                            reason,
                        },
                        other => other.into(),
                    })
            }
            other => other.map_err(Into::into),
        }
    }

    async fn write_once(&self, record: &TaskResultRecord, policy: StorePolicy) -> Result<(), StoreError> {
        let doc = match record.to_document() {
            Ok(Value::Object(doc)) => doc,
            Ok(_) => return Err(StoreError::NotAnObject),
            Err(e) => return Err(StoreError::InvalidDocument(e.to_string())),
        };
        match policy {
            StorePolicy::Latest => {
                let by_name = Filter::new().where_eq("task_name", record.task_name.as_str());
                let kept = self.store.upsert(&self.collection, &by_name, doc).await?;
                // 以前 All で書かれた分が残っていれば消す（1 名 1 件を保つ）
                for stale in self.store.find(&self.collection, &by_name).await? {
                    if let Some(id) = stale.get("_id").and_then(Value::as_str)
                        && id != kept
                    {
                        self.store.delete_by_id(&self.collection, id).await?;
                    }
                }
            }
            StorePolicy::All => {
                self.store.insert(&self.collection, doc).await?;
            }
            StorePolicy::None => {}
        }
        Ok(())
    }
}
