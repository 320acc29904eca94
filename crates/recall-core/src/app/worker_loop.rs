//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 1. bounded queue から `QueuedTask` を取り出す（shutdown と select で競合）
//! 2. claim: submit 由来は `pending → processing`、recovery 由来は `reclaim_stale`
//! 3. `TaskFactory::build` で実行単位を作る（失敗したら handler を呼ばずに failed）
//! 4. 子 CancellationToken を渡して別 tokio task で実行（panic を JoinError で捕まえる）
//! 5. completed / failed を store に書く
//!
//! # 学習ポイント
//! - 共有 Receiver は `Arc<Mutex<Receiver>>`。lock を待つところも shutdown と競合させる
//! - status の書き込みは `Unavailable` のときだけ有限回リトライ。
//!   諦めた task は store 上 processing のまま残り、次の recovery が拾う

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::RunnerConfig;
use crate::domain::{StoreError, TaskId, TaskRecord, TaskStatus};
use crate::ports::TaskStore;
use crate::typed::{TaskContext, TaskFactory};

/// queue に流れる 1 件
#[derive(Debug, Clone)]
pub(crate) struct QueuedTask {
    pub record: TaskRecord,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Submitted,
    /// 前のプロセスが残した task（起動時 recovery / stuck monitor）
    Recovered,
}

impl Origin {
    fn as_str(&self) -> &'static str {
        match self {
            Origin::Submitted => "submitted",
            Origin::Recovered => "recovered",
        }
    }
}

pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<QueuedTask>>>;

/// この runner が queue に積んだ or 実行中の task
///
/// stuck monitor が自分の worker が持っている task を二重に積まないために使う。
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    held: StdMutex<HashSet<TaskId>>,
    running: AtomicUsize,
}

impl Tracker {
    /// まだ持っていなければ true
    pub fn hold(&self, id: TaskId) -> bool {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).insert(id)
    }

    pub fn release(&self, id: TaskId) {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    #[cfg(test)]
    pub fn is_held(&self, id: TaskId) -> bool {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).contains(&id)
    }

    pub fn clear(&self) {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

/// worker が共有する依存
pub(crate) struct WorkerDeps {
    pub store: Arc<dyn TaskStore>,
    pub factory: TaskFactory,
    pub config: RunnerConfig,
    pub tracker: Arc<Tracker>,
}

/// Worker group handle.
/// - `shutdown` を cancel すると全 worker が次の dequeue をやめる
/// - 実行中の task には子 token 経由で cancel が伝わる
pub(crate) struct WorkerGroup {
    shutdown: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub fn spawn(
        n: usize,
        rx: SharedReceiver,
        deps: Arc<WorkerDeps>,
        shutdown: CancellationToken,
    ) -> Self {
        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let rx = Arc::clone(&rx);
            let deps = Arc::clone(&deps);
            let shutdown = shutdown.clone();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, deps, shutdown).await;
            }));
        }
        Self { shutdown, joins }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// shutdown を要求して `grace` まで待つ。間に合わなかった worker は abort する。
    ///
    /// 戻り値は abort した worker の数。
    pub async fn shutdown_and_join(self, grace: Duration) -> usize {
        self.request_shutdown();

        let aborts: Vec<AbortHandle> = self.joins.iter().map(|j| j.abort_handle()).collect();
        let joined = tokio::time::timeout(grace, async {
            for j in self.joins {
                let _ = j.await;
            }
        })
        .await;

        if joined.is_ok() {
            return 0;
        }
        let mut aborted = 0;
        for handle in aborts {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: SharedReceiver,
    deps: Arc<WorkerDeps>,
    shutdown: CancellationToken,
) {
    tracing::debug!(worker_id, "worker started");
    loop {
        // lock 待ちと recv 待ちの両方を shutdown と競合させる
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = async { rx.lock().await.recv().await } => next,
        };
        let Some(queued) = next else {
            // sender が全部 drop された
            break;
        };

        let id = queued.record.id;
        let span = tracing::info_span!(
            "task",
            worker_id,
            task_id = %id,
            task_type = %queued.record.task_type,
            origin = queued.origin.as_str(),
        );
        process(&deps, queued, &shutdown).instrument(span).await;
        deps.tracker.release(id);
    }
    tracing::debug!(worker_id, "worker stopped");
}

/// 1 件分。エラーはここで全部吸収して store の状態に変換する。
async fn process(deps: &WorkerDeps, queued: QueuedTask, shutdown: &CancellationToken) {
    let Some(claimed) = claim(deps, &queued).await else {
        return;
    };

    let exec = match deps.factory.build(&claimed) {
        Ok(exec) => exec,
        Err(e) => {
            tracing::warn!(error = %e, "could not build task");
            write_status(deps, claimed.id, TaskStatus::Failed, Some(&e.to_string())).await;
            return;
        }
    };

    let ctx = TaskContext {
        task_id: claimed.id,
        task_type: claimed.task_type.clone(),
        cancel: shutdown.child_token(),
    };

    let joined = {
        let _running = RunningGuard::enter(&deps.tracker.running);
        let handle = tokio::spawn(exec.run(ctx).in_current_span());
        // worker 自身が abort されたら実行中の task も止める
        let _abort = AbortOnDrop(handle.abort_handle());
        handle.await
    };

    match joined {
        Ok(Ok(())) => {
            tracing::info!("task completed");
            write_status(deps, claimed.id, TaskStatus::Completed, None).await;
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, kind = ?e.kind(), "task failed");
            write_status(deps, claimed.id, TaskStatus::Failed, Some(&e.to_string())).await;
        }
        Err(join) if join.is_panic() => {
            let message = format!("task panicked: {}", panic_message(join.into_panic()));
            tracing::error!(%message, "task panicked");
            write_status(deps, claimed.id, TaskStatus::Failed, Some(&message)).await;
        }
        Err(_) => {
            // abort された。store は processing のまま、次の recovery に任せる
            tracing::warn!("task aborted before finishing");
        }
    }
}

/// store 上で task を自分のものにする。取れなかったら None。
async fn claim(deps: &WorkerDeps, queued: &QueuedTask) -> Option<TaskRecord> {
    let id = queued.record.id;
    let stuck_age = deps.config.stuck_task_age();
    let reclaim = queued.origin == Origin::Recovered && queued.record.status == TaskStatus::Processing;
    let store = &deps.store;
    let (retries, delay) = (deps.config.status_update_retries, deps.config.status_retry_delay());
    let result = with_retry(retries, delay, move || async move {
        if reclaim {
            store.reclaim_stale(id, stuck_age).await
        } else {
            store.update_status(id, TaskStatus::Processing, None).await
        }
    })
    .await;

    match result {
        Ok(record) => Some(record),
        Err(StoreError::InvalidTransition { from, .. }) => {
            tracing::debug!(from, "task already claimed elsewhere");
            None
        }
        Err(StoreError::StaleClaim(_)) => {
            tracing::debug!("task was reclaimed by another runner");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not claim task; leaving it for recovery");
            None
        }
    }
}

async fn write_status(deps: &WorkerDeps, id: TaskId, status: TaskStatus, error_message: Option<&str>) {
    let store = &deps.store;
    let (retries, delay) = (deps.config.status_update_retries, deps.config.status_retry_delay());
    let result = with_retry(retries, delay, move || store.update_status(id, status, error_message)).await;
    if let Err(e) = result {
        tracing::error!(
            error = %e,
            status = status.as_str(),
            "giving up on status update; task left for recovery"
        );
    }
}

/// `Unavailable` のときだけ `retries` 回までリトライする
pub(crate) async fn with_retry<T, F, Fut>(retries: u32, base: Duration, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_unavailable() && attempt < retries => {
                attempt += 1;
                let delay = backoff(base, attempt);
                tracing::debug!(error = %e, attempt, ?delay, "store unavailable, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// base * attempt + 0..base/2 の jitter
fn backoff(base: Duration, attempt: u32) -> Duration {
    let jitter_max = (base.as_millis() / 2) as u64;
    let jitter = if jitter_max == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_max)
    };
    base.saturating_mul(attempt) + Duration::from_millis(jitter)
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub(crate) struct AbortOnDrop(pub AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
