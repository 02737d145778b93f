//! DocumentStore port - 外部ドキュメントデータベース（MongoDB など）
//!
//! ドキュメントは JSON オブジェクトで、`_id` に文字列の識別子を持ちます。
//! フィルタはトップレベルフィールドの等値条件だけをサポートします。

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store's native encoding cannot represent the document.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("document has no string '_id'")]
    MissingId,

    #[error("document is not a JSON object")]
    NotAnObject,

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Equality filter on top-level fields. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(Map<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().where_eq("_id", Value::String(id.into()))
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.0.iter().all(|(k, v)| doc.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexField {
    pub field: String,
    pub order: SortOrder,
}

impl IndexField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document carrying its own `_id`; returns that id.
    async fn insert(&self, collection: &str, doc: Document) -> Result<String, StoreError>;

    /// Atomically replace the first document matching `filter`, or insert.
    async fn upsert(
        &self,
        collection: &str,
        filter: &Filter,
        doc: Document,
    ) -> Result<String, StoreError>;

    async fn delete_by_id(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn find_one(&self, collection: &str, filter: &Filter)
    -> Result<Option<Document>, StoreError>;

    /// All matches, in insertion order.
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    /// Idempotent.
    async fn create_index(&self, collection: &str, fields: &[IndexField])
    -> Result<(), StoreError>;
}
