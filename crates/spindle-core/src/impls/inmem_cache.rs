//! InMemoryCache - 開発用の KV キャッシュ
//!
//! Redis と同じく、キーごとに「文字列」か「hash」のどちらか一方を持ちます。
//! 種類の違う操作は `CacheError::WrongType` になります。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::ports::{Cache, CacheError};

#[derive(Debug, Clone)]
enum Entry {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.entries.read().await.get(key) {
            None => Ok(None),
            Some(Entry::Text(v)) => Ok(Some(v.clone())),
            Some(Entry::Hash(_)) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        // SET は種類に関係なく上書き（Redis と同じ）
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry::Text(value.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        match self.entries.read().await.get(key) {
            None => Ok(None),
            Some(Entry::Hash(h)) => Ok(h.get(field).cloned()),
            Some(Entry::Text(_)) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        match entry {
            Entry::Hash(h) => {
                h.insert(field.to_string(), value.to_string());
                Ok(())
            }
            Entry::Text(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        match self.entries.read().await.get(key) {
            None => Ok(HashMap::new()),
            Some(Entry::Hash(h)) => Ok(h.clone()),
            Some(Entry::Text(_)) => Err(CacheError::WrongType(key.to_string())),
        }
    }
}
