use async_trait::async_trait;

use crate::domain::{Memo, MemoId, MemoStatus, StoreError, TaskRecord};

#[async_trait]
pub trait MemoStore: Send + Sync {
    async fn create_memo(&self, memo: &Memo) -> Result<(), StoreError>;

    /// memo と、それを処理する pending task を同一トランザクションで保存する。
    /// どちらかが失敗したら両方とも保存されない。
    async fn create_memo_with_task(&self, memo: &Memo, task: &TaskRecord) -> Result<(), StoreError>;

    async fn get_memo(&self, id: MemoId) -> Result<Memo, StoreError>;

    async fn update_memo_status(&self, id: MemoId, status: MemoStatus) -> Result<Memo, StoreError>;
}
