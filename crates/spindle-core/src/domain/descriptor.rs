//! TaskDescriptor - 名前付きの遅延実行単位
//!
//! 起動時に一度だけ作られ、以後は不変です。例外はキューが払い出す
//! `TaskBinding` で、これは一度だけ束縛できます（再束縛はエラー）。

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::{CronSchedule, TaskArgs, TaskName};
use crate::error::TaskError;
use crate::ports::TaskBinding;
use crate::typed::TaskLogic;

/// Result-storage policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorePolicy {
    /// Keep only the most recent result (at most one record per task name).
    #[default]
    Latest,
    /// Keep every result.
    All,
    /// Keep nothing.
    None,
}

impl<'de> Deserialize<'de> for StorePolicy {
    /// Accepts `"latest" | "all" | "none"`, `true` (all), `false` (none) and `null` (latest).
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None => Ok(StorePolicy::Latest),
            Some(Value::Bool(true)) => Ok(StorePolicy::All),
            Some(Value::Bool(false)) => Ok(StorePolicy::None),
            Some(Value::String(s)) => match s.as_str() {
                "latest" => Ok(StorePolicy::Latest),
                "all" => Ok(StorePolicy::All),
                "none" => Ok(StorePolicy::None),
                other => Err(de::Error::custom(format!(
                    "unsupported store_results '{other}' (expected \"latest\", \"all\", \"none\" or false)"
                ))),
            },
            Some(other) => Err(de::Error::custom(format!(
                "unsupported store_results {other}"
            ))),
        }
    }
}

pub struct TaskDescriptor {
    name: TaskName,
    logic: Arc<dyn TaskLogic>,
    schedule: Option<CronSchedule>,
    default_args: Option<Vec<Value>>,
    default_kwargs: Option<Map<String, Value>>,
    depends_on: Option<TaskName>,
    store_results: StorePolicy,
    binding: OnceLock<TaskBinding>,
}

impl TaskDescriptor {
    pub fn builder(name: impl Into<TaskName>, logic: Arc<dyn TaskLogic>) -> TaskDescriptorBuilder {
        TaskDescriptorBuilder {
            name: name.into(),
            logic,
            schedule: None,
            default_args: None,
            default_kwargs: None,
            depends_on: None,
            store_results: StorePolicy::default(),
        }
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn logic(&self) -> &Arc<dyn TaskLogic> {
        &self.logic
    }

    pub fn schedule(&self) -> Option<&CronSchedule> {
        self.schedule.as_ref()
    }

    pub fn depends_on(&self) -> Option<&TaskName> {
        self.depends_on.as_ref()
    }

    pub fn store_results(&self) -> StorePolicy {
        self.store_results
    }

    /// The arguments used when a caller submits none.
    pub fn default_invocation(&self) -> TaskArgs {
        TaskArgs {
            args: self.default_args.clone().unwrap_or_default(),
            kwargs: self.default_kwargs.clone().unwrap_or_default(),
        }
    }

    /// Caller arguments, or the defaults when the caller gave none.
    pub fn resolve_args(&self, supplied: TaskArgs) -> TaskArgs {
        if supplied.is_empty() {
            self.default_invocation()
        } else {
            supplied
        }
    }

    pub fn binding(&self) -> Option<&TaskBinding> {
        self.binding.get()
    }

    /// Attach the queue-side handle. Only the first call succeeds.
    pub fn bind(&self, binding: TaskBinding) -> Result<(), TaskError> {
        self.binding
            .set(binding)
            .map_err(|_| TaskError::AlreadyBound(self.name.clone()))
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("default_args", &self.default_args)
            .field("default_kwargs", &self.default_kwargs)
            .field("depends_on", &self.depends_on)
            .field("store_results", &self.store_results)
            .field("bound", &self.binding.get().is_some())
            .finish_non_exhaustive()
    }
}

pub struct TaskDescriptorBuilder {
    name: TaskName,
    logic: Arc<dyn TaskLogic>,
    schedule: Option<CronSchedule>,
    default_args: Option<Vec<Value>>,
    default_kwargs: Option<Map<String, Value>>,
    depends_on: Option<TaskName>,
    store_results: StorePolicy,
}

impl TaskDescriptorBuilder {
    pub fn schedule(mut self, schedule: CronSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn default_args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.default_args = Some(args.into_iter().collect());
        self
    }

    pub fn default_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.default_kwargs = Some(kwargs);
        self
    }

    pub fn depends_on(mut self, name: impl Into<TaskName>) -> Self {
        self.depends_on = Some(name.into());
        self
    }

    pub fn store_results(mut self, policy: StorePolicy) -> Self {
        self.store_results = policy;
        self
    }

    pub fn build(self) -> TaskDescriptor {
        TaskDescriptor {
            name: self.name,
            logic: self.logic,
            schedule: self.schedule,
            default_args: self.default_args,
            default_kwargs: self.default_kwargs,
            depends_on: self.depends_on,
            store_results: self.store_results,
            binding: OnceLock::new(),
        }
    }
}
