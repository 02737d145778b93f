//! Typed - タスクロジックの型付き API
//!
//! - **logic**: `TaskLogic` trait と `from_fn` / `typed` アダプタ
//! - **catalog**: 設定の `logic` 名を解決する `LogicCatalog`

pub mod catalog;
pub mod logic;

pub use self::catalog::LogicCatalog;
pub use self::logic::{TaskLogic, from_fn, typed};
