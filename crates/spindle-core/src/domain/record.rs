//! Persisted execution outcome.
//!
//! The document form is what the result collection stores; `_id` carries the
//! record identity so the cached pointer can resolve it with a single lookup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ExecutionId, ResultId, TaskName};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultRecord {
    #[serde(rename = "_id")]
    pub id: ResultId,
    pub task_name: TaskName,
    pub task_id: ExecutionId,
    pub task_result: Value,
    pub recorded_at: DateTime<Utc>,
}

impl TaskResultRecord {
    /// Same record with the result replaced by its string form.
    ///
    /// Used when the store refuses to encode the original value.
    pub fn coerced_to_string(&self) -> Self {
        let text = match &self.task_result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            task_result: Value::String(text),
            ..self.clone()
        }
    }

    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_document(doc: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(doc)
    }
}
