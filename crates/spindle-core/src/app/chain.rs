//! ChainBuilder - `depends_on` を辿って実行順のチェーンを組み立てる
//!
//! # アルゴリズム
//! 1. 対象タスクを末尾に置く
//! 2. `depends_on` があれば、その呼び出しを先頭に挿入して辿る
//! 3. 依存がなくなったら終了（依存が先、対象が最後）
//!
//! 先頭のタスクだけが位置引数を持ちます（呼び出し側の引数、なければ既定値）。
//! 後続のタスクは既定の kwargs だけを持ち、位置引数には直前の出力が入ります。

use std::collections::{HashSet, VecDeque};

use crate::app::registry::TaskRegistry;
use crate::domain::{Signature, TaskArgs, TaskChain, TaskName};
use crate::error::TaskError;

pub struct ChainBuilder<'a> {
    registry: &'a TaskRegistry,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(registry: &'a TaskRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, target: &TaskName, supplied: TaskArgs) -> Result<TaskChain, TaskError> {
        let mut stages = VecDeque::new();
        let mut visited = HashSet::new();
        let mut current = self.registry.require(target)?;

        loop {
            if !visited.insert(current.name().clone()) {
                // 登録時に弾いているので、ここに来るのは表が壊れているときだけ
                return Err(TaskError::Configuration(format!(
                    "dependency cycle through '{}'",
                    current.name()
                )));
            }
            let Some(dep) = current.depends_on() else {
                break;
            };
            stages.push_front(Signature::new(
                current.name().clone(),
                TaskArgs {
                    args: Vec::new(),
                    kwargs: current.default_invocation().kwargs,
                },
            ));
            current = self.registry.require(dep)?;
        }

        stages.push_front(Signature::new(
            current.name().clone(),
            current.resolve_args(supplied),
        ));
        Ok(TaskChain::new(stages.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskDescriptor;
    use crate::typed::typed;
    use serde_json::{Map, json};

    fn registry() -> TaskRegistry {
        let mut kwargs = Map::new();
        kwargs.insert("scale".into(), json!(10));

        let mut registry = TaskRegistry::new();
        registry
            .register(
                TaskDescriptor::builder("a", typed(|(x, y): (i64, i64)| Ok(x + y)))
                    .default_args([json!(2), json!(2)])
                    .build(),
            )
            .unwrap();
        registry
            .register(
                TaskDescriptor::builder("b", typed(|x: i64| Ok(x * 2)))
                    .depends_on("a")
                    .default_args([json!(99)])
                    .build(),
            )
            .unwrap();
        registry
            .register(
                TaskDescriptor::builder("c", typed(|x: i64| Ok(x + 1)))
                    .depends_on("b")
                    .default_kwargs(kwargs)
                    .build(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn orders_dependency_first() {
        let registry = registry();
        let chain = ChainBuilder::new(&registry)
            .build(&"c".into(), TaskArgs::new())
            .unwrap();

        let names: Vec<_> = chain.stages().iter().map(|s| s.task.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(chain.target().map(TaskName::as_str), Some("c"));
    }

    #[test]
    fn head_gets_defaults_and_downstream_only_kwargs() {
        let registry = registry();
        let chain = ChainBuilder::new(&registry)
            .build(&"c".into(), TaskArgs::new())
            .unwrap();

        let stages = chain.stages();
        assert_eq!(stages[0].args.args, vec![json!(2), json!(2)]);
        assert!(stages[1].args.is_empty());
        assert!(stages[2].args.args.is_empty());
        assert_eq!(stages[2].args.kwargs["scale"], json!(10));
    }

    #[test]
    fn caller_args_go_to_the_head() {
        let registry = registry();
        let chain = ChainBuilder::new(&registry)
            .build(&"b".into(), TaskArgs::positional([json!(5), json!(6)]))
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.stages()[0].args.args, vec![json!(5), json!(6)]);
    }

    #[test]
    fn task_without_dependency_is_a_single_stage() {
        let registry = registry();
        let chain = ChainBuilder::new(&registry)
            .build(&"a".into(), TaskArgs::new())
            .unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn missing_link_is_unknown_task() {
        let mut registry = TaskRegistry::new();
        registry
            .register(
                TaskDescriptor::builder("x", typed(|(): ()| Ok(())))
                    .depends_on("gone")
                    .build(),
            )
            .unwrap();
        let err = ChainBuilder::new(&registry)
            .build(&"x".into(), TaskArgs::new())
            .unwrap_err();
        assert!(matches!(err, TaskError::UnknownTask(n) if n.as_str() == "gone"));
    }
}
