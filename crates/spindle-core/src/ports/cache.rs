//! Cache port - 外部 KV ストア（Redis など）
//!
//! 文字列と hash だけを扱う薄いインターフェースです。
//! 型を保った読み書きは `app::cache_client::CacheClient` が担当します。

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The key holds a value of another kind (string vs hash).
    #[error("key '{0}' holds a value of the wrong type")]
    WrongType(String),

    #[error("cache value encoding failed: {0}")]
    Encoding(String),

    #[error("cache backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Remove a key of either kind. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;
}
