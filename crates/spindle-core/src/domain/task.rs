use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Unique routing/lookup key of a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the derived task that runs this task's dependency chain.
    pub fn chain_name(&self) -> TaskName {
        TaskName(format!("{}_chain", self.0))
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Positional + keyword arguments of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl TaskArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            args: args.into_iter().collect(),
            kwargs: Map::new(),
        }
    }

    /// The shape a chained stage receives: the upstream value as sole positional argument.
    pub fn single(value: Value) -> Self {
        Self::positional([value])
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

/// A task name bound to concrete arguments, ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub task: TaskName,
    pub args: TaskArgs,
}

impl Signature {
    pub fn new(task: impl Into<TaskName>, args: TaskArgs) -> Self {
        Self {
            task: task.into(),
            args,
        }
    }
}

/// Ordered stages of a dependency chain, dependency first and target last.
///
/// Ephemeral: built on demand and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskChain {
    stages: Vec<Signature>,
}

impl TaskChain {
    pub fn new(stages: Vec<Signature>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Signature] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<Signature> {
        self.stages
    }

    /// The task whose output is the chain's output.
    pub fn target(&self) -> Option<&TaskName> {
        self.stages.last().map(|s| &s.task)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
