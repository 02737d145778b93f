//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryCache**: 開発用の KV キャッシュ
//! - **InMemoryDocumentStore**: 開発用のドキュメントストア
//! - **InMemoryTaskQueue**: tokio ワーカーで動く開発用キュー
//! - **BeatLoop**: 周期トリガ表の発火
//! - **RedisCache**: 本番用キャッシュ（`redis` feature）

pub mod beat;
pub mod inmem_cache;
pub mod inmem_queue;
pub mod inmem_store;
#[cfg(feature = "redis")]
pub mod redis_cache;

pub use self::beat::BeatLoop;
pub use self::inmem_cache::InMemoryCache;
pub use self::inmem_queue::InMemoryTaskQueue;
pub use self::inmem_store::InMemoryDocumentStore;
#[cfg(feature = "redis")]
pub use self::redis_cache::RedisCache;
