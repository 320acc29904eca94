//! Shared fixtures for the scenario tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use recall_core::app::{App, AppBuilder};
use recall_core::config::RunnerConfig;
use recall_core::domain::{
    CardContent, GenerationError, MemoId, MemoStatus, TaskId, TaskRecord, TaskStatus, UserId,
};
use recall_core::ports::{CardGenerator, CardStore, Clock, FixedClock, MemoStore, TaskStore};
use recall_core::tasks::{MemoGenerationHandler, MemoGenerationTask};

/// Splits text into one card per line. Text containing "boom" fails with the text as the reason.
#[derive(Default)]
pub struct LineGenerator {
    calls: AtomicUsize,
}

impl LineGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CardGenerator for LineGenerator {
    async fn generate_cards(
        &self,
        text: &str,
        _user_id: UserId,
        _cancel: &CancellationToken,
    ) -> Result<Vec<CardContent>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("boom") {
            return Err(GenerationError::Failed(text.to_string()));
        }
        Ok(text
            .lines()
            .map(|line| CardContent::new(line, format!("back of {line}")))
            .collect())
    }
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()))
}

/// Small, fast runner settings for tests.
pub fn test_config() -> RunnerConfig {
    RunnerConfig {
        worker_count: 2,
        queue_size: 16,
        stuck_task_check_interval_secs: 0,
        shutdown_grace_secs: 5,
        status_update_retries: 3,
        status_retry_delay_ms: 1,
        ..RunnerConfig::default()
    }
}

/// App with the memo generation handler registered.
pub fn memo_app<S>(
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    generator: Arc<dyn CardGenerator>,
    config: RunnerConfig,
) -> App
where
    S: TaskStore + MemoStore + CardStore + 'static,
{
    let handler = MemoGenerationHandler::new(store.clone(), store.clone(), generator, clock.clone());
    AppBuilder::new()
        .register::<MemoGenerationTask, _>(handler)
        .unwrap()
        .runner_config(config)
        .clock(clock)
        .build(store)
        .unwrap()
}

pub async fn wait_for_task(store: &dyn TaskStore, id: TaskId, status: TaskStatus) -> TaskRecord {
    for _ in 0..500 {
        let task = store.get_by_id(id).await.unwrap();
        if task.status == status {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let task = store.get_by_id(id).await.unwrap();
    panic!("task {id} stuck in {} (wanted {status})", task.status);
}

pub async fn wait_for_memo(store: &dyn MemoStore, id: MemoId) -> MemoStatus {
    for _ in 0..500 {
        let memo = store.get_memo(id).await.unwrap();
        if memo.status.is_terminal() {
            return memo.status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("memo {id} never finished");
}
