//! BeatLoop - 周期トリガ表の発火
//!
//! キューの周期トリガ表を読み、発火時刻を過ぎたエントリを投入します。
//!
//! # フロー
//! 1. `periodic_entries()` で表を取得
//! 2. エントリごとに「前回発火（なければ起動時刻）より後の最初の発火時刻」を計算
//! 3. それが現在時刻以前なら `ignore_result` 付きで投入
//!
//! 取りこぼした複数回分はまとめて 1 回だけ発火します。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::domain::{ExecutionId, Signature, TaskName};
use crate::ports::{Clock, QueueError, SubmitOptions, TaskQueue};

const MIN_SLEEP: Duration = Duration::from_millis(10);

pub struct BeatLoop {
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
    last_fired: Mutex<HashMap<TaskName, DateTime<Utc>>>,
    max_sleep: Duration,
}

impl BeatLoop {
    pub fn new(queue: Arc<dyn TaskQueue>, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        Self {
            queue,
            clock,
            started_at,
            last_fired: Mutex::new(HashMap::new()),
            max_sleep: Duration::from_secs(1),
        }
    }

    /// Upper bound on one sleep, so newly installed entries are picked up.
    pub fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep.max(MIN_SLEEP);
        self
    }

    /// Submit every due entry once. Returns the submitted executions.
    pub async fn tick(&self) -> Result<Vec<ExecutionId>, QueueError> {
        let now = self.clock.now();
        let entries = self.queue.periodic_entries().await?;
        let mut last_fired = self.last_fired.lock().await;
        let mut submitted = Vec::new();

        for entry in entries {
            let anchor = last_fired
                .get(&entry.name)
                .copied()
                .unwrap_or(self.started_at);
            let next = match entry.schedule.next_after(anchor) {
                Ok(next) => next,
                Err(e) => {
                    warn!(entry = %entry.name, error = %e, "skipping periodic entry");
                    continue;
                }
            };
            if next > now {
                continue;
            }

            let signature = Signature::new(entry.target.clone(), entry.args.clone());
            let id = self
                .queue
                .submit(signature, SubmitOptions::ignore_result())
                .await?;
            debug!(entry = %entry.name, target = %entry.target, %id, "periodic entry fired");
            last_fired.insert(entry.name, now);
            submitted.push(id);
        }
        Ok(submitted)
    }

    /// Time until the earliest entry is due, clamped to `[MIN_SLEEP, max_sleep]`.
    async fn next_sleep(&self) -> Duration {
        let now = self.clock.now();
        let Ok(entries) = self.queue.periodic_entries().await else {
            return self.max_sleep;
        };
        let last_fired = self.last_fired.lock().await;
        entries
            .iter()
            .filter_map(|entry| {
                let anchor = last_fired
                    .get(&entry.name)
                    .copied()
                    .unwrap_or(self.started_at);
                entry.schedule.next_after(anchor).ok()
            })
            .min()
            .and_then(|next| (next - now).to_std().ok())
            .unwrap_or(self.max_sleep)
            .clamp(MIN_SLEEP, self.max_sleep)
    }

    /// Fire entries until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("beat loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.tick().await {
                warn!(error = %e, "beat tick failed");
            }
            let sleep = self.next_sleep().await;
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }
        info!("beat loop stopped");
    }
}
