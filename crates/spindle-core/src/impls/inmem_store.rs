//! InMemoryDocumentStore - 開発用のドキュメントストア
//!
//! # 実装詳細
//! - collection ごとに `Vec<Document>` を挿入順で保持
//! - MongoDB と同じく、`$` で始まるキーや `.` を含むキーは保存できない
//!   （`StoreError::InvalidDocument`）
//! - インデックスは定義を記録するだけ（検索は線形）

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::ports::{Document, DocumentStore, Filter, IndexField, StoreError};

#[derive(Debug, Default)]
struct Collection {
    docs: Vec<Document>,
    indexes: Vec<Vec<IndexField>>,
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index definitions recorded for `collection`, in creation order.
    pub async fn indexes(&self, collection: &str) -> Vec<Vec<IndexField>> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |c| c.docs.len())
    }
}

fn document_id(doc: &Document) -> Result<String, StoreError> {
    match doc.get("_id") {
        Some(Value::String(id)) => Ok(id.clone()),
        _ => Err(StoreError::MissingId),
    }
}

fn check_key(key: &str) -> Result<(), StoreError> {
    if key.starts_with('$') || key.contains('.') {
        return Err(StoreError::InvalidDocument(format!(
            "key '{key}' must not start with '$' or contain '.'"
        )));
    }
    Ok(())
}

fn validate_keys(value: &Value) -> Result<(), StoreError> {
    match value {
        Value::Object(map) => map.iter().try_for_each(|(key, inner)| {
            check_key(key)?;
            validate_keys(inner)
        }),
        Value::Array(items) => items.iter().try_for_each(validate_keys),
        _ => Ok(()),
    }
}

fn validate(doc: &Document) -> Result<String, StoreError> {
    let id = document_id(doc)?;
    doc.iter().try_for_each(|(key, inner)| {
        check_key(key)?;
        validate_keys(inner)
    })?;
    Ok(id)
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, collection: &str, doc: Document) -> Result<String, StoreError> {
        let id = validate(&doc)?;
        let mut collections = self.collections.write().await;
        let coll = collections.entry(collection.to_string()).or_default();
        if coll.docs.iter().any(|d| d.get("_id") == doc.get("_id")) {
            return Err(StoreError::Backend(format!("duplicate _id '{id}'")));
        }
        coll.docs.push(doc);
        Ok(id)
    }

    async fn upsert(
        &self,
        collection: &str,
        filter: &Filter,
        doc: Document,
    ) -> Result<String, StoreError> {
        let id = validate(&doc)?;
        let mut collections = self.collections.write().await;
        let coll = collections.entry(collection.to_string()).or_default();
        match coll.docs.iter_mut().find(|d| filter.matches(d)) {
            Some(existing) => *existing = doc,
            None => coll.docs.push(doc),
        }
        Ok(id)
    }

    async fn delete_by_id(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = coll.docs.len();
        coll.docs
            .retain(|d| d.get("_id").and_then(Value::as_str) != Some(id));
        Ok(coll.docs.len() != before)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|c| c.docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn create_index(
        &self,
        collection: &str,
        fields: &[IndexField],
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let coll = collections.entry(collection.to_string()).or_default();
        if !coll.indexes.iter().any(|ix| ix.as_slice() == fields) {
            coll.indexes.push(fields.to_vec());
        }
        Ok(())
    }
}
