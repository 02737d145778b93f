use std::time::Duration;

use thiserror::Error;

use crate::domain::TaskName;
use crate::ports::{CacheError, QueueError, StoreError};

#[derive(Debug, Error)]
pub enum TaskError {
    /// Invalid or missing task configuration, detected at registration.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown task '{0}'")]
    UnknownTask(TaskName),

    #[error("task '{0}' is already bound to a queue task")]
    AlreadyBound(TaskName),

    /// The result could not be stored even after string coercion.
    #[error("result of task '{task}' could not be stored: {reason}")]
    Serialization { task: TaskName, reason: String },

    /// A synchronous run saw no new result before its deadline.
    #[error("timed out after {waited:?} waiting for a new result of task '{task}'")]
    Timeout { task: TaskName, waited: Duration },

    /// The queue reported the execution as failed.
    #[error("task '{task}' failed: {reason}")]
    TaskFailed { task: TaskName, reason: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
