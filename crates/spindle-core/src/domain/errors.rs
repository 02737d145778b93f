//! Errors - タスクロジックが返す失敗
//!
//! オーケストレーション層のエラー（設定エラー・タイムアウトなど）は
//! `crate::error::TaskError` にあります。ここはワーカー側で
//! ロジックが失敗したときの値だけを定義します。

use std::fmt;

/// TaskFailure はタスクロジックの失敗
///
/// キューは Failed 状態とともにこのメッセージを保持し、
/// 同期実行の呼び出し側へ `TaskError::TaskFailed` として届けます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    message: String,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TaskFailure {}

impl From<String> for TaskFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TaskFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for TaskFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("json: {err}"))
    }
}
