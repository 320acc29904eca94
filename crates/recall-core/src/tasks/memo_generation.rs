//! memo から card を生成する task
//!
//! # フロー
//! 1. cancel 済みなら generator を呼ばずに終わる
//! 2. memo を読んで所有者を確認 → memo を processing に
//! 3. CardGenerator を cancel と競合させて呼ぶ
//! 4. memo の card を丸ごと置き換える（recovery で再実行されても重複しない）
//! 5. memo を completed に
//!
//! 失敗・cancel のときは memo を failed にしてからエラーを返す。
//! task 側の failed は worker が書く。
//!
//! generator は別 tokio task で呼ぶ。panic は `GenerationError::Failed` になり、
//! 通常の失敗と同じく memo を failed にする。
//! memo status の書き込みは `Unavailable` のとき有限回リトライする。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::app::worker_loop::{AbortOnDrop, panic_message, with_retry};
use crate::config::RunnerConfig;
use crate::domain::{
    Card, CardContent, ExecutorError, GenerationError, Memo, MemoId, MemoStatus, StoreError, UserId,
};
use crate::ports::{CardGenerator, CardStore, Clock, MemoStore};
use crate::typed::{Handler, Task, TaskContext};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoGenerationTask {
    pub memo_id: MemoId,
    pub user_id: UserId,
}

impl Task for MemoGenerationTask {
    const TYPE: &'static str = "memo_generation";
}

pub struct MemoGenerationHandler {
    memos: Arc<dyn MemoStore>,
    cards: Arc<dyn CardStore>,
    generator: Arc<dyn CardGenerator>,
    clock: Arc<dyn Clock>,
    status_retries: u32,
    status_retry_delay: Duration,
}

impl MemoGenerationHandler {
    pub fn new(
        memos: Arc<dyn MemoStore>,
        cards: Arc<dyn CardStore>,
        generator: Arc<dyn CardGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let defaults = RunnerConfig::default();
        Self {
            memos,
            cards,
            generator,
            clock,
            status_retries: defaults.status_update_retries,
            status_retry_delay: defaults.status_retry_delay(),
        }
    }

    /// memo status 書き込みのリトライ設定。runner と揃えるときに使う
    pub fn with_status_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.status_retries = retries;
        self.status_retry_delay = delay;
        self
    }

    /// memo は読み込み済み・所有者チェック済み
    async fn generate(&self, memo: &Memo, ctx: &TaskContext) -> Result<usize, ExecutorError> {
        self.set_memo_status(memo.id, MemoStatus::Processing).await?;

        let contents = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ExecutorError::Cancelled),
            generated = self.call_generator(memo, &ctx.cancel) => generated?,
        };

        let now = self.clock.now();
        let cards: Vec<Card> = contents
            .into_iter()
            .map(|content| Card::new(memo.user_id, memo.id, content, now))
            .collect();
        self.cards.replace_cards_for_memo(memo.id, &cards).await?;

        self.set_memo_status(memo.id, MemoStatus::Completed).await?;
        Ok(cards.len())
    }

    async fn call_generator(
        &self,
        memo: &Memo,
        cancel: &CancellationToken,
    ) -> Result<Vec<CardContent>, GenerationError> {
        let generator = Arc::clone(&self.generator);
        let text = memo.text.clone();
        let user_id = memo.user_id;
        let cancel = cancel.clone();
        let handle = tokio::spawn(
            async move { generator.generate_cards(&text, user_id, &cancel).await }.in_current_span(),
        );
        let _abort = AbortOnDrop(handle.abort_handle());

        match handle.await {
            Ok(generated) => generated,
            Err(join) if join.is_panic() => Err(GenerationError::Failed(format!(
                "generator panicked: {}",
                panic_message(join.into_panic())
            ))),
            Err(_) => Err(GenerationError::Cancelled),
        }
    }

    async fn set_memo_status(&self, id: MemoId, status: MemoStatus) -> Result<Memo, StoreError> {
        let memos = &self.memos;
        with_retry(self.status_retries, self.status_retry_delay, move || {
            memos.update_memo_status(id, status)
        })
        .await
    }

    async fn mark_failed(&self, memo_id: MemoId, cause: &ExecutorError) {
        match self.set_memo_status(memo_id, MemoStatus::Failed).await {
            Ok(_) => {}
            // 存在しない / すでに終端なら触らない
            Err(StoreError::NotFound { .. } | StoreError::InvalidTransition { .. }) => {}
            Err(e) => {
                tracing::warn!(%memo_id, error = %e, cause = %cause, "could not mark memo failed");
            }
        }
    }
}

#[async_trait]
impl Handler<MemoGenerationTask> for MemoGenerationHandler {
    async fn handle(&self, task: MemoGenerationTask, ctx: &TaskContext) -> Result<(), ExecutorError> {
        if ctx.is_cancelled() {
            let err = ExecutorError::Cancelled;
            self.mark_failed(task.memo_id, &err).await;
            return Err(err);
        }

        let memo = self.memos.get_memo(task.memo_id).await?;
        if memo.user_id != task.user_id {
            // payload が壊れている。他人の memo は触らない
            return Err(ExecutorError::Failed(format!(
                "memo {} does not belong to user {}",
                memo.id, task.user_id
            )));
        }
        if memo.status == MemoStatus::Completed {
            // 前回の実行が memo だけ書き終えていた
            tracing::info!(memo_id = %memo.id, "memo already completed");
            return Ok(());
        }

        match self.generate(&memo, ctx).await {
            Ok(count) => {
                tracing::info!(memo_id = %memo.id, cards = count, "generated cards for memo");
                Ok(())
            }
            Err(e) => {
                self.mark_failed(memo.id, &e).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskType};
    use crate::impls::InMemoryStore;
    use crate::ports::{StatsStore, SystemClock};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// "boom" を含む text は text ごと失敗理由にする。それ以外は行ごとに card を作る
    struct LineGenerator {
        calls: AtomicUsize,
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
                return Err(GenerationError::Failed(format!("cannot split {text:?}")));
            }
            Ok(text
                .lines()
                .map(|line| CardContent::new(line, format!("answer: {line}")))
                .collect())
        }
    }

    struct Fixture {
        store: InMemoryStore,
        generator: Arc<LineGenerator>,
        handler: MemoGenerationHandler,
    }

    fn handler_with(store: &InMemoryStore, generator: Arc<dyn CardGenerator>) -> MemoGenerationHandler {
        MemoGenerationHandler::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            generator,
            Arc::new(SystemClock),
        )
        .with_status_retries(3, Duration::from_millis(1))
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let generator = Arc::new(LineGenerator {
            calls: AtomicUsize::new(0),
        });
        let handler = handler_with(&store, generator.clone());
        Fixture {
            store,
            generator,
            handler,
        }
    }

    fn ctx() -> TaskContext {
        TaskContext {
            task_id: TaskId::generate(),
            task_type: TaskType::new(MemoGenerationTask::TYPE),
            cancel: CancellationToken::new(),
        }
    }

    async fn memo(store: &InMemoryStore, text: &str) -> Memo {
        let memo = Memo::new(UserId::generate(), text, Utc::now()).unwrap();
        store.create_memo(&memo).await.unwrap();
        memo
    }

    fn task_for(memo: &Memo) -> MemoGenerationTask {
        MemoGenerationTask {
            memo_id: memo.id,
            user_id: memo.user_id,
        }
    }

    #[tokio::test]
    async fn generates_cards_and_completes_memo() {
        let f = fixture();
        let memo = memo(&f.store, "what is rust\nwhat is tokio").await;

        f.handler.handle(task_for(&memo), &ctx()).await.unwrap();

        assert_eq!(f.store.get_memo(memo.id).await.unwrap().status, MemoStatus::Completed);
        let cards = f.store.list_cards_by_memo(memo.id).await.unwrap();
        assert_eq!(cards.len(), 2);
        assert!(f.store.get_stats(memo.user_id, cards[0].id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rerun_after_crash_does_not_duplicate_cards() {
        let f = fixture();
        let memo = memo(&f.store, "a\nb").await;
        f.handler.handle(task_for(&memo), &ctx()).await.unwrap();

        // memo が processing のまま落ちた状態を再現
        let mut crashed = f.store.get_memo(memo.id).await.unwrap();
        crashed.status = MemoStatus::Processing;
        f.store.put_memo_raw(crashed).await;

        f.handler.handle(task_for(&memo), &ctx()).await.unwrap();
        assert_eq!(f.store.list_cards_by_memo(memo.id).await.unwrap().len(), 2);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn completed_memo_is_not_regenerated() {
        let f = fixture();
        let memo = memo(&f.store, "a").await;
        f.handler.handle(task_for(&memo), &ctx()).await.unwrap();
        f.handler.handle(task_for(&memo), &ctx()).await.unwrap();
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generator_failure_marks_memo_failed() {
        let f = fixture();
        let memo = memo(&f.store, "boom").await;

        let err = f.handler.handle(task_for(&memo), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(f.store.get_memo(memo.id).await.unwrap().status, MemoStatus::Failed);
        assert!(f.store.list_cards_by_memo(memo.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start_fails_without_generating() {
        let f = fixture();
        let memo = memo(&f.store, "a").await;
        let ctx = ctx();
        ctx.cancel.cancel();

        let err = f.handler.handle(task_for(&memo), &ctx).await.unwrap_err();
        assert_eq!(err, ExecutorError::Cancelled);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.store.get_memo(memo.id).await.unwrap().status, MemoStatus::Failed);
    }

    #[tokio::test]
    async fn wrong_user_is_rejected() {
        let f = fixture();
        let memo = memo(&f.store, "a").await;
        let task = MemoGenerationTask {
            memo_id: memo.id,
            user_id: UserId::generate(),
        };

        let err = f.handler.handle(task, &ctx()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Failed(_)));
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.store.get_memo(memo.id).await.unwrap().status, MemoStatus::Pending);
    }

    #[tokio::test]
    async fn missing_memo_is_a_store_error() {
        let f = fixture();
        let task = MemoGenerationTask {
            memo_id: MemoId::generate(),
            user_id: UserId::generate(),
        };
        let err = f.handler.handle(task, &ctx()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Store(StoreError::NotFound { .. })));
    }

    struct PanickingGenerator;

    #[async_trait]
    impl CardGenerator for PanickingGenerator {
        async fn generate_cards(
            &self,
            _text: &str,
            _user_id: UserId,
            _cancel: &CancellationToken,
        ) -> Result<Vec<CardContent>, GenerationError> {
            panic!("generator crashed");
        }
    }

    #[tokio::test]
    async fn generator_panic_marks_memo_failed() {
        let store = InMemoryStore::new();
        let handler = handler_with(&store, Arc::new(PanickingGenerator));
        let memo = memo(&store, "a").await;

        let err = handler.handle(task_for(&memo), &ctx()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Generation(GenerationError::Failed(_))));
        assert!(err.to_string().contains("generator crashed"));
        assert_eq!(store.get_memo(memo.id).await.unwrap().status, MemoStatus::Failed);
    }

    /// 失敗を返す直前に store を一時的に落とす
    struct OutageGenerator {
        store: InMemoryStore,
        outage: usize,
    }

    #[async_trait]
    impl CardGenerator for OutageGenerator {
        async fn generate_cards(
            &self,
            _text: &str,
            _user_id: UserId,
            _cancel: &CancellationToken,
        ) -> Result<Vec<CardContent>, GenerationError> {
            self.store.fail_next_writes(self.outage).await;
            Err(GenerationError::Failed("upstream timeout".into()))
        }
    }

    #[tokio::test]
    async fn failed_status_survives_a_short_store_outage() {
        let store = InMemoryStore::new();
        let handler = handler_with(
            &store,
            Arc::new(OutageGenerator {
                store: store.clone(),
                outage: 2,
            }),
        );
        let memo = memo(&store, "a").await;

        handler.handle(task_for(&memo), &ctx()).await.unwrap_err();
        assert_eq!(store.get_memo(memo.id).await.unwrap().status, MemoStatus::Failed);
    }
}
