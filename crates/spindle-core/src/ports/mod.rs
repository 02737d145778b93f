//! Ports - 外部システムへの抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。HTTP サーバ・
//! ドキュメントストア・キャッシュ・分散キューはすべて外部の協調者で、
//! このクレートは薄いクライアントインターフェース越しにだけ触れます。
//!
//! - **Cache**: 結果ポインタ（task name → 最新 ResultId）の置き場所
//! - **DocumentStore**: 結果レコードの正本
//! - **TaskQueue**: 投入・合成・周期トリガ

pub mod cache;
pub mod clock;
pub mod document_store;
pub mod id_generator;
pub mod task_queue;

pub use self::cache::{Cache, CacheError};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::document_store::{Document, DocumentStore, Filter, IndexField, SortOrder, StoreError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_queue::{
    GroupHandle, PeriodicEntry, QueueError, QueueTask, SubmitOptions, TaskBinding, TaskQueue,
};
