//! MemoService - memo の作成と generation task の投入

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::runner::TaskRunner;
use crate::domain::{Card, Memo, MemoId, ServiceError, UserId};
use crate::ports::{CardStore, Clock, MemoStore};
use crate::tasks::MemoGenerationTask;
use crate::typed::PayloadCodec;

pub struct MemoService {
    memos: Arc<dyn MemoStore>,
    cards: Arc<dyn CardStore>,
    runner: Arc<TaskRunner>,
    clock: Arc<dyn Clock>,
}

impl MemoService {
    pub fn new(
        memos: Arc<dyn MemoStore>,
        cards: Arc<dyn CardStore>,
        runner: Arc<TaskRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            memos,
            cards,
            runner,
            clock,
        }
    }

    /// memo と pending task を 1 トランザクションで保存してから submit する
    ///
    /// submit が失敗しても memo と task は残る（次の起動の recovery が拾う）。
    /// その場合もエラーは返すので、呼び出し側は再送しないこと。
    pub async fn create_memo_and_enqueue(
        &self,
        user_id: UserId,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Memo, ServiceError> {
        let now = self.clock.now();
        let memo = Memo::new(user_id, text, now)?;
        let task = PayloadCodec::to_record(
            &MemoGenerationTask {
                memo_id: memo.id,
                user_id,
            },
            now,
        )?;

        self.memos.create_memo_with_task(&memo, &task).await?;
        tracing::info!(memo_id = %memo.id, task_id = %task.id, %user_id, "memo created");

        if let Err(e) = self.runner.submit(task, cancel).await {
            tracing::warn!(memo_id = %memo.id, error = %e, "memo saved but task not queued");
            return Err(e.into());
        }
        Ok(memo)
    }

    pub async fn get_memo(&self, user_id: UserId, memo_id: MemoId) -> Result<Memo, ServiceError> {
        let memo = self.memos.get_memo(memo_id).await?;
        if memo.user_id != user_id {
            return Err(ServiceError::Forbidden(format!("memo {memo_id}")));
        }
        Ok(memo)
    }

    pub async fn cards_for_memo(&self, user_id: UserId, memo_id: MemoId) -> Result<Vec<Card>, ServiceError> {
        self.get_memo(user_id, memo_id).await?;
        Ok(self.cards.list_cards_by_memo(memo_id).await?)
    }
}
