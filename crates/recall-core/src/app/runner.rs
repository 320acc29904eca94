//! TaskRunner - bounded queue + 固定数の worker
//!
//! # 学習ポイント
//! - ライフサイクルは `Mutex<Inner>` の中の `RunnerState` だけで管理する
//! - submit は queue が満杯なら待つ。待ちは呼び出し側の CancellationToken で打ち切れる
//! - queue はただの候補通知。状態の正本は TaskStore
//!
//! # 使用例
//! ```ignore
//! let runner = Arc::new(TaskRunner::new(store, factory, clock, RunnerConfig::default()));
//! runner.start().await?;
//! let id = runner.enqueue(&MemoGenerationTask { memo_id, user_id }, &cancel).await?;
//! runner.stop().await?;
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::reaper_loop::{self, ReaperLoop};
use super::status::{RunnerState, RunnerStatus};
use super::worker_loop::{Origin, QueuedTask, SharedReceiver, Tracker, WorkerDeps, WorkerGroup};
use crate::config::RunnerConfig;
use crate::domain::{RunnerError, StoreError, TaskId, TaskRecord};
use crate::observability::TaskCounts;
use crate::ports::{Clock, TaskStore};
use crate::typed::{PayloadCodec, Task, TaskFactory};

pub struct TaskRunner {
    store: Arc<dyn TaskStore>,
    factory: TaskFactory,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
    tracker: Arc<Tracker>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: RunnerState,
    running: Option<Running>,
}

/// Running 中だけ存在するもの
struct Running {
    tx: mpsc::Sender<QueuedTask>,
    shutdown: CancellationToken,
    workers: WorkerGroup,
    background: Vec<JoinHandle<()>>,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        factory: TaskFactory,
        clock: Arc<dyn Clock>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            factory,
            clock,
            config,
            tracker: Arc::new(Tracker::default()),
            inner: Mutex::new(Inner {
                state: RunnerState::Stopped,
                running: None,
            }),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// recovery scan をしてから worker を起動する
    ///
    /// - Stopped 以外 → `AlreadyRunning`
    /// - scan のクエリが失敗 → `StoreUnavailable`（runner は Stopped のまま）
    pub async fn start(&self) -> Result<(), RunnerError> {
        let mut inner = self.inner.lock().await;
        if inner.state != RunnerState::Stopped {
            return Err(RunnerError::AlreadyRunning);
        }

        let recovered = reaper_loop::scan(self.store.as_ref(), &self.config)
            .await
            .map_err(|e| match e {
                StoreError::Unavailable(msg) => RunnerError::StoreUnavailable(msg),
                other => RunnerError::StoreUnavailable(other.to_string()),
            })?;

        let (tx, rx) = mpsc::channel(self.config.queue_size);
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));
        let shutdown = CancellationToken::new();
        self.tracker.clear();

        let deps = Arc::new(WorkerDeps {
            store: Arc::clone(&self.store),
            factory: self.factory.clone(),
            config: self.config.clone(),
            tracker: Arc::clone(&self.tracker),
        });
        let workers = WorkerGroup::spawn(self.config.worker_count, rx, deps, shutdown.clone());

        let reaper = ReaperLoop::new(
            Arc::clone(&self.store),
            self.config.clone(),
            Arc::clone(&self.tracker),
            tx.clone(),
            shutdown.clone(),
        );
        let mut background = vec![reaper.spawn_feeder(recovered)];
        background.extend(reaper.spawn_monitor());

        inner.running = Some(Running {
            tx,
            shutdown,
            workers,
            background,
        });
        inner.state = RunnerState::Running;
        tracing::info!(
            workers = self.config.worker_count,
            queue_size = self.config.queue_size,
            "task runner started"
        );
        Ok(())
    }

    /// 永続化済みの pending task を queue に積む
    ///
    /// queue が満杯なら空くまで待つ。`cancel` が先に発火したら `Cancelled`。
    /// その場合 task は pending のまま store に残る。
    pub async fn submit(&self, task: TaskRecord, cancel: &CancellationToken) -> Result<(), RunnerError> {
        let (tx, shutdown) = self.sender().await?;
        let id = task.id;
        self.tracker.hold(id);
        let queued = QueuedTask {
            record: task,
            origin: Origin::Submitted,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RunnerError::Cancelled),
            _ = shutdown.cancelled() => Err(RunnerError::NotRunning),
            sent = tx.send(queued) => sent.map_err(|_| RunnerError::NotRunning),
        };
        match &result {
            Ok(()) => tracing::debug!(task_id = %id, "task submitted"),
            Err(e) => {
                self.tracker.release(id);
                tracing::debug!(task_id = %id, error = %e, "task not submitted");
            }
        }
        result
    }

    /// 待たない版。満杯なら `QueueFull`。
    pub async fn try_submit(&self, task: TaskRecord) -> Result<(), RunnerError> {
        let (tx, _) = self.sender().await?;
        let id = task.id;
        self.tracker.hold(id);
        let queued = QueuedTask {
            record: task,
            origin: Origin::Submitted,
        };
        tx.try_send(queued).map_err(|e| {
            self.tracker.release(id);
            match e {
                mpsc::error::TrySendError::Full(_) => RunnerError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => RunnerError::NotRunning,
            }
        })
    }

    /// 型付き task を pending で保存してから submit する
    pub async fn enqueue<T: Task>(&self, task: &T, cancel: &CancellationToken) -> Result<TaskId, RunnerError> {
        self.sender().await?;
        let record = PayloadCodec::to_record(task, self.clock.now())?;
        let id = record.id;
        self.store.create(&record).await?;
        self.submit(record, cancel).await?;
        Ok(id)
    }

    /// worker を止める
    ///
    /// shutdown token を cancel し、`shutdown_grace` まで待ってから残りを abort する。
    /// queue に残っていた task は store 上 pending / processing のまま、次の起動で回収される。
    pub async fn stop(&self) -> Result<(), RunnerError> {
        let running = {
            let mut inner = self.inner.lock().await;
            if inner.state != RunnerState::Running {
                return Err(RunnerError::NotRunning);
            }
            inner.state = RunnerState::Stopping;
            inner.running.take()
        };
        tracing::info!("task runner stopping");

        if let Some(running) = running {
            let Running {
                tx,
                shutdown,
                workers,
                background,
            } = running;
            shutdown.cancel();
            let left_in_queue = tx.max_capacity() - tx.capacity();
            drop(tx);

            let aborted = workers.shutdown_and_join(self.config.shutdown_grace()).await;
            for handle in background {
                handle.abort();
                let _ = handle.await;
            }
            if aborted > 0 {
                tracing::warn!(aborted, "workers did not stop within the grace period");
            }
            if left_in_queue > 0 {
                tracing::info!(left_in_queue, "queued tasks left for the next start");
            }
        }

        self.tracker.clear();
        self.inner.lock().await.state = RunnerState::Stopped;
        tracing::info!("task runner stopped");
        Ok(())
    }

    pub async fn status(&self) -> RunnerStatus {
        let inner = self.inner.lock().await;
        let queued = inner
            .running
            .as_ref()
            .map(|r| r.tx.max_capacity() - r.tx.capacity())
            .unwrap_or(0);
        RunnerStatus {
            state: inner.state,
            worker_count: self.config.worker_count,
            queue_capacity: self.config.queue_size,
            queued,
            in_flight: self.tracker.running(),
        }
    }

    pub async fn task_counts(&self) -> Result<TaskCounts, RunnerError> {
        Ok(self.store.counts_by_status().await?)
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.state == RunnerState::Running
    }

    /// lock は sender を clone する間だけ持つ（send の await を跨がない）
    async fn sender(&self) -> Result<(mpsc::Sender<QueuedTask>, CancellationToken), RunnerError> {
        let inner = self.inner.lock().await;
        match (&inner.state, &inner.running) {
            (RunnerState::Running, Some(running)) => Ok((running.tx.clone(), running.shutdown.clone())),
            _ => Err(RunnerError::NotRunning),
        }
    }
}
