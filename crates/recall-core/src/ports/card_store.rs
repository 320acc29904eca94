use async_trait::async_trait;

use crate::domain::{Card, CardId, MemoId, StoreError};

#[async_trait]
pub trait CardStore: Send + Sync {
    /// memo に紐づく card を丸ごと置き換える。
    ///
    /// 各 card に対して新しい ReviewStats も作る。古い card と stats は削除される。
    /// 同じ memo で再実行しても card が重複しない（at-least-once な recovery 向け）。
    async fn replace_cards_for_memo(&self, memo_id: MemoId, cards: &[Card]) -> Result<(), StoreError>;

    async fn list_cards_by_memo(&self, memo_id: MemoId) -> Result<Vec<Card>, StoreError>;

    async fn get_card(&self, id: CardId) -> Result<Card, StoreError>;
}
