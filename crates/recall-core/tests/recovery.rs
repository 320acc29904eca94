//! Crash recovery and store outage scenarios.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Duration;

use common::{LineGenerator, fixed_clock, memo_app, test_config, wait_for_memo, wait_for_task};
use recall_core::app::RunnerState;
use recall_core::domain::{
    Memo, MemoStatus, RunnerError, StoreError, TaskId, TaskRecord, TaskStatus, UserId,
};
use recall_core::impls::InMemoryStore;
use recall_core::observability::TaskCounts;
use recall_core::ports::{CardStore, Clock, MemoStore, TaskStore};
use recall_core::tasks::MemoGenerationTask;
use recall_core::typed::PayloadCodec;

/// 前のプロセスが processing のまま落ちた memo + task を置く
async fn crashed_memo(store: &InMemoryStore, clock: &dyn Clock, age: Duration) -> (Memo, TaskRecord) {
    let then = clock.now() - age;
    let mut memo = Memo::new(UserId::generate(), "first\nsecond", then).unwrap();
    memo.status = MemoStatus::Processing;
    let mut task = PayloadCodec::to_record(
        &MemoGenerationTask {
            memo_id: memo.id,
            user_id: memo.user_id,
        },
        then,
    )
    .unwrap();
    task.status = TaskStatus::Processing;
    store.put_memo_raw(memo.clone()).await;
    store.put_task_raw(task.clone()).await;
    (memo, task)
}

#[tokio::test]
async fn stale_processing_task_is_resumed_exactly_once() {
    let clock = fixed_clock();
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    let (memo, task) = crashed_memo(&store, clock.as_ref(), Duration::minutes(31)).await;

    // 同じ store を見ている 2 つのインスタンスが同時に再起動する
    let generator = Arc::new(LineGenerator::default());
    let first = memo_app(store.clone(), clock.clone(), generator.clone(), test_config());
    let second = memo_app(store.clone(), clock.clone(), generator.clone(), test_config());
    first.runner.start().await.unwrap();
    second.runner.start().await.unwrap();

    wait_for_task(store.as_ref(), task.id, TaskStatus::Completed).await;
    assert_eq!(wait_for_memo(store.as_ref(), memo.id).await, MemoStatus::Completed);
    first.runner.stop().await.unwrap();
    second.runner.stop().await.unwrap();

    assert_eq!(generator.calls(), 1);
    assert_eq!(store.list_cards_by_memo(memo.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn recent_processing_task_is_left_alone() {
    let clock = fixed_clock();
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    let (_, task) = crashed_memo(&store, clock.as_ref(), Duration::minutes(5)).await;

    let generator = Arc::new(LineGenerator::default());
    let app = memo_app(store.clone(), clock.clone(), generator.clone(), test_config());
    app.runner.start().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    app.runner.stop().await.unwrap();

    assert_eq!(generator.calls(), 0);
    assert_eq!(store.get_by_id(task.id).await.unwrap().status, TaskStatus::Processing);
}

#[tokio::test]
async fn pending_rows_from_a_previous_run_are_picked_up() {
    let clock = fixed_clock();
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    let memo = Memo::new(UserId::generate(), "only line", clock.now()).unwrap();
    let task = PayloadCodec::to_record(
        &MemoGenerationTask {
            memo_id: memo.id,
            user_id: memo.user_id,
        },
        clock.now(),
    )
    .unwrap();
    store.create_memo_with_task(&memo, &task).await.unwrap();

    let app = memo_app(
        store.clone(),
        clock.clone(),
        Arc::new(LineGenerator::default()),
        test_config(),
    );
    app.runner.start().await.unwrap();
    wait_for_task(store.as_ref(), task.id, TaskStatus::Completed).await;
    app.runner.stop().await.unwrap();
}

/// TaskStore の一部の操作を失敗させるラッパー
struct FlakyStore {
    inner: InMemoryStore,
    /// 終端 status への書き込みをこの回数だけ失敗させる
    failing_final_writes: AtomicUsize,
    scans_down: AtomicBool,
}

impl FlakyStore {
    fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            failing_final_writes: AtomicUsize::new(0),
            scans_down: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn create(&self, task: &TaskRecord) -> Result<(), StoreError> {
        self.inner.create(task).await
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<TaskRecord, StoreError> {
        if status.is_terminal()
            && self
                .failing_final_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.update_status(id, status, error_message).await
    }

    async fn reclaim_stale(&self, id: TaskId, older_than: Duration) -> Result<TaskRecord, StoreError> {
        self.inner.reclaim_stale(id, older_than).await
    }

    async fn get_by_id(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        self.inner.get_by_id(id).await
    }

    async fn find_by_status_older_than(
        &self,
        status: TaskStatus,
        age: Duration,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        if self.scans_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("database is locked".to_string()));
        }
        self.inner.find_by_status_older_than(status, age).await
    }

    async fn counts_by_status(&self) -> Result<TaskCounts, StoreError> {
        self.inner.counts_by_status().await
    }
}

fn flaky_app(
    flaky: Arc<FlakyStore>,
    clock: Arc<recall_core::ports::FixedClock>,
    generator: Arc<LineGenerator>,
) -> recall_core::app::App {
    use recall_core::app::AppBuilder;
    use recall_core::tasks::MemoGenerationHandler;

    let memos = Arc::new(flaky.inner.clone());
    let handler = MemoGenerationHandler::new(memos.clone(), memos, generator, clock.clone());
    AppBuilder::new()
        .register::<MemoGenerationTask, _>(handler)
        .unwrap()
        .runner_config(test_config())
        .clock(clock)
        .build(flaky)
        .unwrap()
}

#[tokio::test]
async fn transient_status_write_failures_are_retried() {
    let clock = fixed_clock();
    let inner = InMemoryStore::with_clock(clock.clone());
    let (_, task) = crashed_memo(&inner, clock.as_ref(), Duration::hours(1)).await;
    let flaky = Arc::new(FlakyStore::new(inner));
    flaky.failing_final_writes.store(2, Ordering::SeqCst);

    let app = flaky_app(flaky.clone(), clock.clone(), Arc::new(LineGenerator::default()));
    app.runner.start().await.unwrap();
    wait_for_task(flaky.as_ref(), task.id, TaskStatus::Completed).await;
    app.runner.stop().await.unwrap();
}

#[tokio::test]
async fn abandoned_status_write_is_finished_by_the_next_recovery() {
    let clock = fixed_clock();
    let inner = InMemoryStore::with_clock(clock.clone());
    let (memo, task) = crashed_memo(&inner, clock.as_ref(), Duration::hours(1)).await;
    let flaky = Arc::new(FlakyStore::new(inner.clone()));
    // 初回 + リトライ 3 回がすべて失敗する
    flaky.failing_final_writes.store(4, Ordering::SeqCst);

    let generator = Arc::new(LineGenerator::default());
    let app = flaky_app(flaky.clone(), clock.clone(), generator.clone());
    app.runner.start().await.unwrap();
    assert_eq!(wait_for_memo(&inner, memo.id).await, MemoStatus::Completed);
    // worker が諦めるまで待つ
    for _ in 0..100 {
        if app.runner.status().await.is_idle() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    app.runner.stop().await.unwrap();
    assert_eq!(inner.get_by_id(task.id).await.unwrap().status, TaskStatus::Processing);

    // 次の起動は stuck_task_age 経過後
    clock.advance(Duration::minutes(31));
    let app = flaky_app(flaky.clone(), clock.clone(), generator.clone());
    app.runner.start().await.unwrap();
    wait_for_task(flaky.as_ref(), task.id, TaskStatus::Completed).await;
    app.runner.stop().await.unwrap();

    // memo は前回 completed なので generator は再実行されない
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn start_fails_when_recovery_scan_fails() {
    let flaky = Arc::new(FlakyStore::new(InMemoryStore::new()));
    flaky.scans_down.store(true, Ordering::SeqCst);
    let app = flaky_app(flaky.clone(), fixed_clock(), Arc::new(LineGenerator::default()));

    let err = app.runner.start().await.unwrap_err();
    assert!(matches!(err, RunnerError::StoreUnavailable(_)));
    assert_eq!(app.runner.status().await.state, RunnerState::Stopped);

    flaky.scans_down.store(false, Ordering::SeqCst);
    app.runner.start().await.unwrap();
    assert_eq!(app.runner.start().await, Err(RunnerError::AlreadyRunning));
    app.runner.stop().await.unwrap();
}
