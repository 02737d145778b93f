//! TaskRegistry - 名前 → TaskDescriptor の表
//!
//! # 不変条件
//! - 名前は一意（再登録は上書きし、warn ログを出す）
//! - `depends_on` は単方向リスト。登録時に辿って循環を検出する
//! - `depends_on` を持つタスクには派生名 `<name>_chain` のチェーンタスクがある
//! - バッチ終了時点で、すべての `depends_on` が登録済みであること
//!
//! 登録は起動時に行い、以後は読み取り専用として扱います。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{TaskDescriptor, TaskEntry, TaskName};
use crate::error::TaskError;
use crate::typed::LogicCatalog;

#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    tasks: HashMap<TaskName, Arc<TaskDescriptor>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one descriptor, replacing any previous one of the same name.
    ///
    /// Dangling `depends_on` links are allowed here (the dependency may come
    /// later in the same batch); `validate` rejects them.
    pub fn register(&mut self, descriptor: TaskDescriptor) -> Result<Arc<TaskDescriptor>, TaskError> {
        let name = descriptor.name().clone();

        if let Some(schedule) = descriptor.schedule() {
            schedule
                .compile()
                .map_err(|e| TaskError::Configuration(format!("task '{name}': {e}")))?;
        }
        self.check_chain_names(&descriptor)?;
        if let Some(cycle) = self.cycle_through(&descriptor) {
            let path: Vec<_> = cycle.iter().map(TaskName::as_str).collect();
            return Err(TaskError::Configuration(format!(
                "dependency cycle: {}",
                path.join(" -> ")
            )));
        }

        let descriptor = Arc::new(descriptor);
        if self
            .tasks
            .insert(name.clone(), Arc::clone(&descriptor))
            .is_some()
        {
            warn!(task = %name, "task re-registered; previous descriptor replaced");
        } else {
            debug!(task = %name, depends_on = ?descriptor.depends_on(), "task registered");
        }
        Ok(descriptor)
    }

    /// Register a batch of configuration entries and validate the result.
    pub fn register_batch<I>(
        &mut self,
        entries: I,
        catalog: &LogicCatalog,
    ) -> Result<Vec<Arc<TaskDescriptor>>, TaskError>
    where
        I: IntoIterator<Item = (TaskName, TaskEntry)>,
    {
        let mut registered = Vec::new();
        for (name, entry) in entries {
            let descriptor = entry.into_descriptor(&name, catalog)?;
            registered.push(self.register(descriptor)?);
        }
        self.validate()?;
        Ok(registered)
    }

    /// Every `depends_on` must name a registered task.
    pub fn validate(&self) -> Result<(), TaskError> {
        let mut dangling: Vec<_> = self
            .tasks
            .values()
            .filter_map(|d| {
                d.depends_on()
                    .filter(|dep| !self.tasks.contains_key(*dep))
                    .map(|dep| format!("'{}' depends on unknown task '{dep}'", d.name()))
            })
            .collect();
        if dangling.is_empty() {
            return Ok(());
        }
        dangling.sort();
        Err(TaskError::Configuration(dangling.join("; ")))
    }

    pub fn get(&self, name: &TaskName) -> Option<Arc<TaskDescriptor>> {
        self.tasks.get(name).cloned()
    }

    pub fn require(&self, name: &TaskName) -> Result<Arc<TaskDescriptor>, TaskError> {
        self.get(name)
            .ok_or_else(|| TaskError::UnknownTask(name.clone()))
    }

    /// Look up a task by its own name or by its derived chain name.
    pub fn resolve(&self, name: &TaskName) -> Option<Arc<TaskDescriptor>> {
        if let Some(d) = self.get(name) {
            return Some(d);
        }
        let base = name.as_str().strip_suffix("_chain")?;
        self.get(&TaskName::new(base))
            .filter(|d| d.depends_on().is_some())
    }

    /// Derived chain tasks: `(<name>_chain, target)` for each task with `depends_on`.
    pub fn chain_tasks(&self) -> Vec<(TaskName, Arc<TaskDescriptor>)> {
        let mut chains: Vec<_> = self
            .tasks
            .values()
            .filter(|d| d.depends_on().is_some())
            .map(|d| (d.name().chain_name(), Arc::clone(d)))
            .collect();
        chains.sort_by(|a, b| a.0.cmp(&b.0));
        chains
    }

    pub fn names(&self) -> Vec<TaskName> {
        let mut names: Vec<_> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Follow `depends_on` from `descriptor` (as if it were registered) and
    /// return the path if it comes back around.
    fn cycle_through(&self, descriptor: &TaskDescriptor) -> Option<Vec<TaskName>> {
        let start = descriptor.name();
        let mut path = vec![start.clone()];
        let mut visited = HashSet::from([start.clone()]);
        let mut next = descriptor.depends_on().cloned();

        while let Some(current) = next {
            path.push(current.clone());
            if !visited.insert(current.clone()) {
                return (&current == start).then_some(path);
            }
            next = self
                .tasks
                .get(&current)
                .and_then(|d| d.depends_on().cloned());
        }
        None
    }

    /// A task may not take the derived chain name of another task, and vice versa.
    fn check_chain_names(&self, descriptor: &TaskDescriptor) -> Result<(), TaskError> {
        let name = descriptor.name();
        if let Some(base) = name.as_str().strip_suffix("_chain")
            && self
                .tasks
                .get(&TaskName::new(base))
                .is_some_and(|d| d.depends_on().is_some())
        {
            return Err(TaskError::Configuration(format!(
                "task '{name}' collides with the chain task derived from '{base}'"
            )));
        }
        if descriptor.depends_on().is_some() && self.tasks.contains_key(&name.chain_name()) {
            return Err(TaskError::Configuration(format!(
                "task '{}' already exists; it would collide with the chain task derived from '{name}'",
                name.chain_name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CronSchedule;
    use crate::typed::typed;
    use rstest::rstest;
    use serde_json::json;

    fn task(name: &str) -> TaskDescriptor {
        TaskDescriptor::builder(name, typed(|(): ()| Ok(()))).build()
    }

    fn task_after(name: &str, dep: &str) -> TaskDescriptor {
        TaskDescriptor::builder(name, typed(|(): ()| Ok(())))
            .depends_on(dep)
            .build()
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = TaskRegistry::new();
        registry.register(task("a")).unwrap();
        registry.register(task_after("b", "a")).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&"a".into()).is_some());
        assert!(matches!(
            registry.require(&"zzz".into()),
            Err(TaskError::UnknownTask(n)) if n.as_str() == "zzz"
        ));
        registry.validate().unwrap();
    }

    #[test]
    fn reregistering_replaces() {
        let mut registry = TaskRegistry::new();
        registry.register(task("a")).unwrap();
        registry.register(task_after("a", "b")).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&"a".into()).unwrap().depends_on().map(TaskName::as_str),
            Some("b")
        );
    }

    #[rstest]
    #[case::self_loop(vec![("a", "a")], "a -> a")]
    #[case::two_cycle(vec![("a", "b"), ("b", "a")], "b -> a -> b")]
    #[case::three_cycle(vec![("a", "b"), ("b", "c"), ("c", "a")], "c -> a -> b -> c")]
    fn cycles_are_rejected_at_registration(
        #[case] edges: Vec<(&str, &str)>,
        #[case] expected_path: &str,
    ) {
        let mut registry = TaskRegistry::new();
        let (last, rest) = edges.split_last().unwrap();
        for (name, dep) in rest {
            registry.register(task_after(name, dep)).unwrap();
        }
        let err = registry.register(task_after(last.0, last.1)).unwrap_err();
        assert!(
            matches!(&err, TaskError::Configuration(msg) if msg.contains(expected_path)),
            "{err}"
        );
        assert!(registry.get(&last.0.into()).is_none());
    }

    #[test]
    fn dangling_dependency_fails_validation() {
        let mut registry = TaskRegistry::new();
        registry.register(task_after("b", "missing")).unwrap();
        let err = registry.validate().unwrap_err();
        assert!(matches!(err, TaskError::Configuration(msg) if msg.contains("missing")));
    }

    #[test]
    fn batch_allows_forward_references() {
        let mut catalog = LogicCatalog::new();
        catalog.insert("noop", typed(|(): ()| Ok(()))).unwrap();

        let mut registry = TaskRegistry::new();
        let registered = registry
            .register_batch(
                [
                    (TaskName::new("b"), TaskEntry::from(json!({ "logic": "noop", "depends_on": "a" }))),
                    (TaskName::new("a"), TaskEntry::from(json!({ "logic": "noop" }))),
                ],
                &catalog,
            )
            .unwrap();
        assert_eq!(registered.len(), 2);
    }

    #[test]
    fn invalid_schedule_is_a_configuration_error() {
        let mut registry = TaskRegistry::new();
        let bad = TaskDescriptor::builder("a", typed(|(): ()| Ok(())))
            .schedule(CronSchedule::every_minute().with_minute("99"))
            .build();
        assert!(matches!(registry.register(bad), Err(TaskError::Configuration(_))));
    }

    #[test]
    fn chain_tasks_are_derived() {
        let mut registry = TaskRegistry::new();
        registry.register(task("a")).unwrap();
        registry.register(task_after("b", "a")).unwrap();
        registry.register(task_after("c", "b")).unwrap();

        let chains: Vec<_> = registry
            .chain_tasks()
            .into_iter()
            .map(|(n, d)| (n.to_string(), d.name().to_string()))
            .collect();
        assert_eq!(
            chains,
            vec![
                ("b_chain".to_string(), "b".to_string()),
                ("c_chain".to_string(), "c".to_string())
            ]
        );
        assert_eq!(registry.resolve(&"c_chain".into()).unwrap().name().as_str(), "c");
        assert!(registry.resolve(&"a_chain".into()).is_none());
    }

    #[test]
    fn chain_name_collisions_are_rejected() {
        let mut registry = TaskRegistry::new();
        registry.register(task("a")).unwrap();
        registry.register(task_after("b", "a")).unwrap();
        assert!(matches!(
            registry.register(task("b_chain")),
            Err(TaskError::Configuration(_))
        ));

        registry.register(task("x_chain")).unwrap();
        assert!(matches!(
            registry.register(task_after("x", "a")),
            Err(TaskError::Configuration(_))
        ));
    }
}
