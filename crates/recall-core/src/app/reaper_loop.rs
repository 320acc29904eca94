//! ReaperLoop - 放置された task の回収
//!
//! 前のプロセスが processing のまま落ちた task は、`updated_at` が
//! `stuck_task_age` より古いことだけを手がかりに再投入する（crash-only）。
//!
//! # フロー
//! 1. 起動時: `scan()` で stale な processing（と、設定次第で pending）を集める
//! 2. feeder が submit と同じ bounded queue に流す
//! 3. 実行中は `stuck_task_check_interval` ごとに processing を再スキャン
//!
//! 実際の所有権移動は worker の `reclaim_stale` が行う。ここでは候補を流すだけ。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::worker_loop::{Origin, QueuedTask, Tracker};
use crate::config::RunnerConfig;
use crate::domain::{StoreError, TaskRecord, TaskStatus};
use crate::ports::TaskStore;

/// 起動時の recovery 対象を集める。クエリ自体の失敗はそのまま返す。
pub(crate) async fn scan(
    store: &dyn TaskStore,
    config: &RunnerConfig,
) -> Result<Vec<TaskRecord>, StoreError> {
    let mut found = store
        .find_by_status_older_than(TaskStatus::Processing, config.stuck_task_age())
        .await?;
    let stale = found.len();
    if config.recover_pending {
        found.extend(store.list_by_status(TaskStatus::Pending).await?);
    }
    if !found.is_empty() {
        tracing::info!(
            stale_processing = stale,
            pending = found.len() - stale,
            "recovering tasks from a previous run"
        );
    }
    Ok(found)
}

pub(crate) struct ReaperLoop {
    store: Arc<dyn TaskStore>,
    config: RunnerConfig,
    tracker: Arc<Tracker>,
    tx: mpsc::Sender<QueuedTask>,
    shutdown: CancellationToken,
}

impl ReaperLoop {
    pub fn new(
        store: Arc<dyn TaskStore>,
        config: RunnerConfig,
        tracker: Arc<Tracker>,
        tx: mpsc::Sender<QueuedTask>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            config,
            tracker,
            tx,
            shutdown,
        }
    }

    /// 起動時に集めた task を queue に流す。queue が詰まっていても start() を待たせない。
    pub fn spawn_feeder(&self, recovered: Vec<TaskRecord>) -> JoinHandle<()> {
        let tracker = Arc::clone(&self.tracker);
        let tx = self.tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let fed = feed(&tracker, &tx, &shutdown, recovered).await;
            tracing::debug!(fed, "recovery feed finished");
        })
    }

    /// `stuck_task_check_interval` が None なら何もしない
    pub fn spawn_monitor(self) -> Option<JoinHandle<()>> {
        let period = self.config.stuck_task_check_interval()?;
        Some(tokio::spawn(async move { self.run(period).await }))
    }

    async fn run(self, period: Duration) {
        // 起動直後は scan() 済みなので 1 周期後から
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self
                .store
                .find_by_status_older_than(TaskStatus::Processing, self.config.stuck_task_age())
                .await
            {
                Ok(stuck) if stuck.is_empty() => {}
                Ok(stuck) => {
                    let fed = feed(&self.tracker, &self.tx, &self.shutdown, stuck).await;
                    if fed > 0 {
                        tracing::warn!(fed, "requeued stuck processing tasks");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "stuck task scan failed"),
            }
        }
        tracing::debug!("stuck task monitor stopped");
    }
}

/// 自分が既に持っている task は飛ばす。流した数を返す。
async fn feed(
    tracker: &Tracker,
    tx: &mpsc::Sender<QueuedTask>,
    shutdown: &CancellationToken,
    records: Vec<TaskRecord>,
) -> usize {
    let mut fed = 0;
    for record in records {
        let id = record.id;
        if !tracker.hold(id) {
            continue;
        }
        let queued = QueuedTask {
            record,
            origin: Origin::Recovered,
        };
        let sent = tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            r = tx.send(queued) => r.is_ok(),
        };
        if !sent {
            tracker.release(id);
            break;
        }
        fed += 1;
    }
    fed
}
