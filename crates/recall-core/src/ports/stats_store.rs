use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{CardId, ReviewStats, StoreError, UserId};

#[async_trait]
pub trait StatsStore: Send + Sync {
    /// 存在しなければ `Ok(None)`
    async fn get_stats(&self, user_id: UserId, card_id: CardId) -> Result<Option<ReviewStats>, StoreError>;

    async fn upsert_stats(&self, stats: &ReviewStats) -> Result<(), StoreError>;

    /// `next_review_at <= now` のうち最も早いもの
    async fn next_due(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Option<ReviewStats>, StoreError>;
}
