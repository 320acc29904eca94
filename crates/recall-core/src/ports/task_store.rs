//! TaskStore port - task 状態の正本（source of truth）
//!
//! # 設計原則
//! - status と error_message は 1 回の書き込みで同時に更新する
//!   （reader が中途半端な組を観測しない）
//! - 遷移チェックは store 側で行う。`pending → processing` の成功は
//!   「この worker が claim した」ことを意味する（行単位の CAS）
//! - `updated_at` は store の Clock で打刻する
//! - recovery 用の `processing → processing` は `reclaim_stale` だけが行う

use async_trait::async_trait;
use chrono::Duration;

use crate::domain::{StoreError, TaskId, TaskRecord, TaskStatus};
use crate::observability::TaskCounts;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 新規 task を保存。同じ id が既にあれば `Duplicate`。
    async fn create(&self, task: &TaskRecord) -> Result<(), StoreError>;

    /// status を遷移させる。存在しなければ `NotFound`、
    /// 許可されない遷移なら `InvalidTransition`。
    ///
    /// `error_message` は `Failed` のときだけ保存され、それ以外ではクリアされる。
    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<TaskRecord, StoreError>;

    /// recovery 用: `processing` かつ `updated_at` が `older_than` より古い場合のみ
    /// 新しい所有者として `updated_at` を更新する。条件を満たさなければ `StaleClaim`。
    async fn reclaim_stale(&self, id: TaskId, older_than: Duration) -> Result<TaskRecord, StoreError>;

    async fn get_by_id(&self, id: TaskId) -> Result<TaskRecord, StoreError>;

    /// `status` にあり、`updated_at <= now - age` の task を古い順に返す
    async fn find_by_status_older_than(
        &self,
        status: TaskStatus,
        age: Duration,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, StoreError> {
        self.find_by_status_older_than(status, Duration::zero()).await
    }

    async fn counts_by_status(&self) -> Result<TaskCounts, StoreError>;
}
