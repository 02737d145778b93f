//! State - 実行単位の状態

use serde::{Deserialize, Serialize};

/// TaskState は 1 回の実行の状態を表現
///
/// # 状態遷移
/// - Unscheduled → Queued → Running → {Succeeded, Failed}
///
/// Succeeded だけが結果ストアへの書き込みを伴います。
/// リトライはこの層では扱いません。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Unscheduled,
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

/// ExecutionStatus はキューが報告する実行の状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionStatus {
    pub fn queued() -> Self {
        Self {
            state: TaskState::Queued,
            error: None,
        }
    }

    pub fn running() -> Self {
        Self {
            state: TaskState::Running,
            error: None,
        }
    }

    pub fn succeeded() -> Self {
        Self {
            state: TaskState::Succeeded,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: TaskState::Failed,
            error: Some(error.into()),
        }
    }
}
