//! Scheduler - cron 付きタスクを周期トリガ表に載せる
//!
//! `depends_on` を持つタスクは、周期実行ではチェーンタスク `<name>_chain`
//! を対象にします（周期トリガは単一のタスクしか扱えないため）。
//! 同じ名前の再登録は後勝ちです。再登録でスケジュールが消えたり、
//! 対象が `<name>` と `<name>_chain` の間で変わったりしたら、古いエントリは
//! `retire` で取り除きます。

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{TaskArgs, TaskDescriptor};
use crate::error::TaskError;
use crate::ports::{PeriodicEntry, TaskQueue};

#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<dyn TaskQueue>,
}

impl Scheduler {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self { queue }
    }

    /// The periodic entry for `descriptor`, or `None` if it has no schedule.
    pub fn entry_for(descriptor: &TaskDescriptor) -> Option<PeriodicEntry> {
        let schedule = descriptor.schedule()?.clone();
        let entry = match descriptor.depends_on() {
            // チェーンタスクは各段の既定値で自分でチェーンを組む
            Some(_) => {
                let chain = descriptor.name().chain_name();
                PeriodicEntry {
                    name: chain.clone(),
                    target: chain,
                    schedule,
                    args: TaskArgs::new(),
                }
            }
            None => PeriodicEntry {
                name: descriptor.name().clone(),
                target: descriptor.name().clone(),
                schedule,
                args: descriptor.default_invocation(),
            },
        };
        Some(entry)
    }

    pub async fn install(
        &self,
        descriptor: &TaskDescriptor,
    ) -> Result<Option<PeriodicEntry>, TaskError> {
        let Some(entry) = Self::entry_for(descriptor) else {
            return Ok(None);
        };
        let name = entry.name.clone();
        let cron = entry.schedule.expression();
        if let Some(previous) = self.queue.install_periodic(entry.clone()).await? {
            warn!(entry = %name, previous = %previous.schedule.expression(), %cron, "periodic entry overwritten");
        } else {
            info!(entry = %name, %cron, "periodic entry installed");
        }
        Ok(Some(entry))
    }

    /// Remove the entry `previous` installed unless `current` takes over its name.
    pub async fn retire(
        &self,
        previous: &TaskDescriptor,
        current: &TaskDescriptor,
    ) -> Result<Option<PeriodicEntry>, TaskError> {
        let Some(stale) = Self::entry_for(previous) else {
            return Ok(None);
        };
        if Self::entry_for(current).is_some_and(|e| e.name == stale.name) {
            return Ok(None);
        }
        let removed = self.queue.remove_periodic(&stale.name).await?;
        if removed.is_some() {
            info!(entry = %stale.name, "periodic entry removed");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CronSchedule;
    use crate::typed::typed;
    use serde_json::json;

    #[test]
    fn plain_task_targets_itself_with_defaults() {
        let d = TaskDescriptor::builder("report", typed(|x: i64| Ok(x)))
            .schedule(CronSchedule::every_minute().with_minute("0").with_hour("6"))
            .default_args([json!(7)])
            .build();

        let entry = Scheduler::entry_for(&d).unwrap();
        assert_eq!(entry.name.as_str(), "report");
        assert_eq!(entry.target.as_str(), "report");
        assert_eq!(entry.args.args, vec![json!(7)]);
        assert_eq!(entry.schedule.expression(), "0 6 * * *");
    }

    #[test]
    fn dependent_task_targets_its_chain() {
        let d = TaskDescriptor::builder("insert", typed(|x: i64| Ok(x)))
            .schedule(CronSchedule::every_minute())
            .depends_on("add")
            .build();

        let entry = Scheduler::entry_for(&d).unwrap();
        assert_eq!(entry.name.as_str(), "insert_chain");
        assert_eq!(entry.target.as_str(), "insert_chain");
        assert!(entry.args.is_empty());
    }

    #[tokio::test]
    async fn retire_removes_entries_the_new_descriptor_does_not_own() {
        use crate::impls::InMemoryTaskQueue;
        use crate::ports::{SystemClock, UlidGenerator};

        let queue = Arc::new(InMemoryTaskQueue::start(
            1,
            Arc::new(UlidGenerator::new(SystemClock)),
        ));
        let scheduler = Scheduler::new(queue.clone());
        let chained = TaskDescriptor::builder("insert", typed(|x: i64| Ok(x)))
            .schedule(CronSchedule::every_minute().with_minute("0"))
            .depends_on("add")
            .build();
        let rescheduled = TaskDescriptor::builder("insert", typed(|x: i64| Ok(x)))
            .schedule(CronSchedule::every_minute().with_minute("30"))
            .depends_on("add")
            .build();
        let plain = TaskDescriptor::builder("insert", typed(|x: i64| Ok(x))).build();

        scheduler.install(&chained).await.unwrap();
        // 同じ名前を引き継ぐなら消さない（install が上書きする）
        assert!(scheduler.retire(&chained, &rescheduled).await.unwrap().is_none());
        assert_eq!(queue.periodic_entries().await.unwrap().len(), 1);

        let removed = scheduler.retire(&chained, &plain).await.unwrap();
        assert_eq!(removed.map(|e| e.name), Some("insert_chain".into()));
        assert!(queue.periodic_entries().await.unwrap().is_empty());
    }

    #[test]
    fn unscheduled_task_has_no_entry() {
        let d = TaskDescriptor::builder("once", typed(|(): ()| Ok(()))).build();
        assert!(Scheduler::entry_for(&d).is_none());
    }
}
