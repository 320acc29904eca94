//! In-memory store implementation.
//!
//! 全 port（TaskStore / MemoStore / CardStore / StatsStore）を 1 つの
//! `Mutex<State>` で実装する。1 操作 = 1 回のロックなので、
//! SQLite 実装のトランザクションと同じ原子性になる。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Card, CardId, Memo, MemoId, MemoStatus, ReviewStats, StoreError, TaskId, TaskRecord,
    TaskStatus, UserId,
};
use crate::observability::TaskCounts;
use crate::ports::{CardStore, Clock, MemoStore, StatsStore, SystemClock, TaskStore};

#[derive(Default)]
struct State {
    tasks: HashMap<TaskId, TaskRecord>,
    memos: HashMap<MemoId, Memo>,
    cards: HashMap<CardId, Card>,
    stats: HashMap<(UserId, CardId), ReviewStats>,

    /// 残り回数分の書き込みを Unavailable で失敗させる（障害注入）
    failing_writes: usize,
}

impl State {
    fn check_write(&mut self) -> Result<(), StoreError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut TaskRecord, StoreError> {
        self.tasks.get_mut(&id).ok_or_else(|| not_found("task", id))
    }

    fn insert_task(&mut self, task: &TaskRecord) -> Result<(), StoreError> {
        if self.tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate {
                entity: "task",
                id: task.id.to_string(),
            });
        }
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn insert_memo(&mut self, memo: &Memo) -> Result<(), StoreError> {
        if self.memos.contains_key(&memo.id) {
            return Err(StoreError::Duplicate {
                entity: "memo",
                id: memo.id.to_string(),
            });
        }
        self.memos.insert(memo.id, memo.clone());
        Ok(())
    }
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

/// 開発・テスト用の store
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    /// 次の `n` 回の書き込み操作を `StoreError::Unavailable` にする
    pub async fn fail_next_writes(&self, n: usize) {
        self.state.lock().await.failing_writes = n;
    }

    /// 状態遷移のチェックを通さずに task を置く（クラッシュ後の状態の再現用）
    pub async fn put_task_raw(&self, task: TaskRecord) {
        self.state.lock().await.tasks.insert(task.id, task);
    }

    pub async fn put_memo_raw(&self, memo: Memo) {
        self.state.lock().await.memos.insert(memo.id, memo);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create(&self, task: &TaskRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_write()?;
        state.insert_task(task)
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.check_write()?;
        let task = state.task_mut(id)?;
        if !task.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: task.status.as_str(),
                to: status.as_str(),
            });
        }
        task.apply_status(status, error_message, now);
        Ok(task.clone())
    }

    async fn reclaim_stale(&self, id: TaskId, older_than: Duration) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let cutoff = now - older_than;
        let mut state = self.state.lock().await;
        state.check_write()?;
        let task = state.task_mut(id)?;
        if task.status != TaskStatus::Processing || task.updated_at > cutoff {
            return Err(StoreError::StaleClaim(id.to_string()));
        }
        task.apply_status(TaskStatus::Processing, None, now);
        Ok(task.clone())
    }

    async fn get_by_id(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        let state = self.state.lock().await;
        state.tasks.get(&id).cloned().ok_or_else(|| not_found("task", id))
    }

    async fn find_by_status_older_than(
        &self,
        status: TaskStatus,
        age: Duration,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let cutoff = self.clock.now() - age;
        let state = self.state.lock().await;
        let mut found: Vec<TaskRecord> = state
            .tasks
            .values()
            .filter(|t| t.status == status && t.updated_at <= cutoff)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn counts_by_status(&self) -> Result<TaskCounts, StoreError> {
        let state = self.state.lock().await;
        let mut counts = TaskCounts::default();
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl MemoStore for InMemoryStore {
    async fn create_memo(&self, memo: &Memo) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_write()?;
        state.insert_memo(memo)
    }

    async fn create_memo_with_task(&self, memo: &Memo, task: &TaskRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_write()?;
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate {
                entity: "task",
                id: task.id.to_string(),
            });
        }
        state.insert_memo(memo)?;
        state.insert_task(task)
    }

    async fn get_memo(&self, id: MemoId) -> Result<Memo, StoreError> {
        let state = self.state.lock().await;
        state.memos.get(&id).cloned().ok_or_else(|| not_found("memo", id))
    }

    async fn update_memo_status(&self, id: MemoId, status: MemoStatus) -> Result<Memo, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.check_write()?;
        let memo = state.memos.get_mut(&id).ok_or_else(|| not_found("memo", id))?;
        if !memo.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: memo.status.as_str(),
                to: status.as_str(),
            });
        }
        memo.status = status;
        memo.updated_at = memo.updated_at.max(now);
        Ok(memo.clone())
    }
}

#[async_trait]
impl CardStore for InMemoryStore {
    async fn replace_cards_for_memo(&self, memo_id: MemoId, cards: &[Card]) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.check_write()?;

        let stale: Vec<(UserId, CardId)> = state
            .cards
            .values()
            .filter(|c| c.memo_id == memo_id)
            .map(|c| (c.user_id, c.id))
            .collect();
        for key in stale {
            state.cards.remove(&key.1);
            state.stats.remove(&key);
        }

        for card in cards {
            state.cards.insert(card.id, card.clone());
            state
                .stats
                .insert((card.user_id, card.id), ReviewStats::new(card.user_id, card.id, now));
        }
        Ok(())
    }

    async fn list_cards_by_memo(&self, memo_id: MemoId) -> Result<Vec<Card>, StoreError> {
        let state = self.state.lock().await;
        let mut cards: Vec<Card> = state
            .cards
            .values()
            .filter(|c| c.memo_id == memo_id)
            .cloned()
            .collect();
        cards.sort_by_key(|c| c.id);
        Ok(cards)
    }

    async fn get_card(&self, id: CardId) -> Result<Card, StoreError> {
        let state = self.state.lock().await;
        state.cards.get(&id).cloned().ok_or_else(|| not_found("card", id))
    }
}

#[async_trait]
impl StatsStore for InMemoryStore {
    async fn get_stats(&self, user_id: UserId, card_id: CardId) -> Result<Option<ReviewStats>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.stats.get(&(user_id, card_id)).cloned())
    }

    async fn upsert_stats(&self, stats: &ReviewStats) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_write()?;
        state.stats.insert((stats.user_id, stats.card_id), stats.clone());
        Ok(())
    }

    async fn next_due(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Option<ReviewStats>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .stats
            .values()
            .filter(|s| s.user_id == user_id && s.next_review_at <= now)
            .min_by(|a, b| a.next_review_at.cmp(&b.next_review_at).then(a.card_id.cmp(&b.card_id)))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CardContent, TaskType};
    use crate::ports::FixedClock;
    use serde_json::json;

    fn store_at(t0: DateTime<Utc>) -> (InMemoryStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(t0));
        (InMemoryStore::with_clock(clock.clone()), clock)
    }

    fn pending_task(now: DateTime<Utc>) -> TaskRecord {
        TaskRecord::new(TaskType::new("t"), json!({}), now)
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let (store, clock) = store_at(Utc::now());
        let task = pending_task(clock.now());
        store.create(&task).await.unwrap();
        let err = store.create(&task).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "task", .. }));
    }

    #[tokio::test]
    async fn update_follows_state_machine() {
        let (store, clock) = store_at(Utc::now());
        let task = pending_task(clock.now());
        store.create(&task).await.unwrap();

        let err = store.update_status(task.id, TaskStatus::Completed, None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        clock.advance(Duration::seconds(1));
        let claimed = store.update_status(task.id, TaskStatus::Processing, None).await.unwrap();
        assert_eq!(claimed.updated_at, clock.now());

        // 2 回目の claim は失敗する（二重実行の防止）
        let err = store.update_status(task.id, TaskStatus::Processing, None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let failed = store.update_status(task.id, TaskStatus::Failed, Some("boom")).await.unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn update_unknown_task_is_not_found() {
        let (store, _) = store_at(Utc::now());
        let err = store
            .update_status(TaskId::generate(), TaskStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "task", .. }));
    }

    #[tokio::test]
    async fn older_than_uses_updated_at() {
        let t0 = Utc::now();
        let (store, clock) = store_at(t0);
        let old = pending_task(t0);
        store.create(&old).await.unwrap();
        store.update_status(old.id, TaskStatus::Processing, None).await.unwrap();

        clock.advance(Duration::minutes(20));
        let fresh = pending_task(clock.now());
        store.create(&fresh).await.unwrap();
        store.update_status(fresh.id, TaskStatus::Processing, None).await.unwrap();

        clock.advance(Duration::minutes(15));
        let stuck = store
            .find_by_status_older_than(TaskStatus::Processing, Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(stuck.iter().map(|t| t.id).collect::<Vec<_>>(), vec![old.id]);

        let all = store.list_by_status(TaskStatus::Processing).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn reclaim_only_once() {
        let t0 = Utc::now();
        let (store, clock) = store_at(t0);
        let task = pending_task(t0);
        store.create(&task).await.unwrap();
        store.update_status(task.id, TaskStatus::Processing, None).await.unwrap();

        let err = store.reclaim_stale(task.id, Duration::minutes(30)).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleClaim(_)));

        clock.advance(Duration::minutes(31));
        let reclaimed = store.reclaim_stale(task.id, Duration::minutes(30)).await.unwrap();
        assert_eq!(reclaimed.status, TaskStatus::Processing);
        assert_eq!(reclaimed.updated_at, clock.now());

        // 直後の 2 回目は stale ではない
        let err = store.reclaim_stale(task.id, Duration::minutes(30)).await.unwrap_err();
        assert!(matches!(err, StoreError::StaleClaim(_)));
    }

    #[tokio::test]
    async fn injected_failures_are_unavailable() {
        let (store, clock) = store_at(Utc::now());
        store.fail_next_writes(1).await;
        let task = pending_task(clock.now());
        let err = store.create(&task).await.unwrap_err();
        assert!(err.is_unavailable());
        store.create(&task).await.unwrap();
    }

    #[tokio::test]
    async fn create_with_task_is_all_or_nothing() {
        let (store, clock) = store_at(Utc::now());
        let user = UserId::generate();
        let task = pending_task(clock.now());
        store.create(&task).await.unwrap();

        let memo = Memo::new(user, "text", clock.now()).unwrap();
        let err = store.create_memo_with_task(&memo, &task).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "task", .. }));
        assert!(store.get_memo(memo.id).await.is_err());
    }

    #[tokio::test]
    async fn replace_for_memo_overwrites_cards_and_stats() {
        let (store, clock) = store_at(Utc::now());
        let user = UserId::generate();
        let memo = Memo::new(user, "text", clock.now()).unwrap();

        let first: Vec<Card> = (0..3)
            .map(|i| Card::new(user, memo.id, CardContent::new(format!("q{i}"), "a"), clock.now()))
            .collect();
        store.replace_cards_for_memo(memo.id, &first).await.unwrap();

        let second = vec![Card::new(user, memo.id, CardContent::new("q", "a"), clock.now())];
        store.replace_cards_for_memo(memo.id, &second).await.unwrap();

        let cards = store.list_cards_by_memo(memo.id).await.unwrap();
        assert_eq!(cards.len(), 1);
        assert!(store.get_stats(user, first[0].id).await.unwrap().is_none());
        assert!(store.get_stats(user, second[0].id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn next_due_picks_earliest() {
        let t0 = Utc::now();
        let (store, _) = store_at(t0);
        let user = UserId::generate();

        let mut later = ReviewStats::new(user, CardId::generate(), t0);
        later.next_review_at = t0 - Duration::hours(1);
        let mut earlier = ReviewStats::new(user, CardId::generate(), t0);
        earlier.next_review_at = t0 - Duration::hours(5);
        let mut future = ReviewStats::new(user, CardId::generate(), t0);
        future.next_review_at = t0 + Duration::days(1);

        for s in [&later, &earlier, &future] {
            store.upsert_stats(s).await.unwrap();
        }

        let due = store.next_due(user, t0).await.unwrap().unwrap();
        assert_eq!(due.card_id, earlier.card_id);
        assert!(store.next_due(UserId::generate(), t0).await.unwrap().is_none());
    }
}
