//! App - アプリケーション層
//!
//! ports を組み合わせて、タスク管理の振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **TaskManager / TaskManagerBuilder**: 登録・投入・同期実行・結果取得の入口
//! - **TaskRegistry**: 名前 → TaskDescriptor（循環検出つき）
//! - **ChainBuilder**: `depends_on` を辿ってチェーンを組む
//! - **ResultStore**: ポリシーに従った結果の永続化とポインタ管理
//! - **Scheduler**: cron 付きタスクの周期トリガ設定
//! - **StoringTask / ChainTask**: キューに登録されるタスク本体
//! - **CacheClient**: 任意の値をキャッシュへ出し入れする補助

pub mod cache_client;
pub mod chain;
pub mod manager;
pub mod registry;
pub mod result_store;
pub mod scheduler;
pub mod worker;

pub use self::cache_client::CacheClient;
pub use self::chain::ChainBuilder;
pub use self::manager::{TaskManager, TaskManagerBuilder, TaskRun};
pub use self::registry::TaskRegistry;
pub use self::result_store::ResultStore;
pub use self::scheduler::Scheduler;
pub use self::worker::{ChainTask, StoringTask};
