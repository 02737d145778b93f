//! Raw task configuration entries.
//!
//! A configuration map (`name -> entry`) may mix already-built descriptors
//! with plain JSON objects. The JSON form names its logic; the callable itself
//! is looked up in a [`LogicCatalog`] because code cannot live in config.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{CronSchedule, StorePolicy, TaskDescriptor, TaskName};
use crate::error::TaskError;
use crate::typed::LogicCatalog;

/// The JSON form of one task entry. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Name of the logic in the catalog (required).
    pub logic: Option<String>,

    /// Presence implies periodic registration.
    #[serde(default)]
    pub schedule: Option<CronSchedule>,

    #[serde(default)]
    pub default_args: Option<Vec<Value>>,

    #[serde(default)]
    pub default_kwargs: Option<Map<String, Value>>,

    #[serde(default)]
    pub depends_on: Option<TaskName>,

    #[serde(default)]
    pub store_results: StorePolicy,
}

impl TaskConfig {
    pub fn from_value(name: &TaskName, value: Value) -> Result<Self, TaskError> {
        serde_json::from_value(value).map_err(|e| {
            TaskError::Configuration(format!("task '{name}': {e}"))
        })
    }

    /// Resolve the logic and build the descriptor.
    pub fn into_descriptor(
        self,
        name: TaskName,
        catalog: &LogicCatalog,
    ) -> Result<TaskDescriptor, TaskError> {
        let logic_name = self.logic.ok_or_else(|| {
            TaskError::Configuration(format!("task '{name}': missing required key 'logic'"))
        })?;
        let logic = catalog.get(&logic_name).ok_or_else(|| {
            TaskError::Configuration(format!(
                "task '{name}': logic '{logic_name}' is not in the catalog"
            ))
        })?;

        let mut builder = TaskDescriptor::builder(name, logic).store_results(self.store_results);
        if let Some(schedule) = self.schedule {
            builder = builder.schedule(schedule);
        }
        if let Some(args) = self.default_args {
            builder = builder.default_args(args);
        }
        if let Some(kwargs) = self.default_kwargs {
            builder = builder.default_kwargs(kwargs);
        }
        if let Some(dep) = self.depends_on {
            builder = builder.depends_on(dep);
        }
        Ok(builder.build())
    }
}

/// One value of the task configuration map.
pub enum TaskEntry {
    Descriptor(TaskDescriptor),
    Config(Value),
}

impl TaskEntry {
    pub fn into_descriptor(
        self,
        name: &TaskName,
        catalog: &LogicCatalog,
    ) -> Result<TaskDescriptor, TaskError> {
        match self {
            TaskEntry::Descriptor(d) => {
                if d.name() != name {
                    return Err(TaskError::Configuration(format!(
                        "descriptor named '{}' registered under key '{name}'",
                        d.name()
                    )));
                }
                Ok(d)
            }
            TaskEntry::Config(value) => {
                TaskConfig::from_value(name, value)?.into_descriptor(name.clone(), catalog)
            }
        }
    }
}

impl From<TaskDescriptor> for TaskEntry {
    fn from(d: TaskDescriptor) -> Self {
        TaskEntry::Descriptor(d)
    }
}

impl From<Value> for TaskEntry {
    fn from(v: Value) -> Self {
        TaskEntry::Config(v)
    }
}
