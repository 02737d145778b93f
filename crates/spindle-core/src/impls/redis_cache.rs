//! RedisCache - Redis をバックエンドにした Cache
//!
//! `redis` feature を有効にしたときだけコンパイルされます。
//! 接続は `ConnectionManager` が保持し、切断時は自動で再接続します。

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::config::CacheSettings;
use crate::ports::{Cache, CacheError};

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(settings: &CacheSettings) -> Result<Self, CacheError> {
        let url = settings.connection_string();
        let client = redis::Client::open(url.as_str()).map_err(backend)?;
        let conn = client.get_connection_manager().await.map_err(backend)?;
        info!(host = %settings.host, port = settings.port, db = settings.db, "connected to redis");
        Ok(Self { conn })
    }
}

fn backend(err: redis::RedisError) -> CacheError {
    CacheError::Backend(err.to_string())
}

fn classify(key: &str) -> impl FnOnce(redis::RedisError) -> CacheError + '_ {
    move |err| {
        if err.code() == Some("WRONGTYPE") {
            CacheError::WrongType(key.to_string())
        } else {
            backend(err)
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key).await.map_err(classify(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(classify(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del::<_, i64>(key).await.map_err(classify(key))?;
        Ok(removed > 0)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.hget::<_, _, Option<String>>(key, field).await.map_err(classify(key))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(classify(key))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.hgetall::<_, HashMap<String, String>>(key).await.map_err(classify(key))
    }
}
