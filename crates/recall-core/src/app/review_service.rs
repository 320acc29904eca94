//! ReviewService - 回答の記録と次の復習対象
//!
//! SRS の計算は `SrsEngine`（純粋関数）。ここでは所有者チェックと
//! stats の読み書きだけをする。

use std::sync::Arc;

use crate::domain::{Card, CardId, ReviewOutcome, ReviewStats, ServiceError, StoreError, UserId};
use crate::ports::{CardStore, Clock, StatsStore};
use crate::srs::SrsEngine;

pub struct ReviewService {
    cards: Arc<dyn CardStore>,
    stats: Arc<dyn StatsStore>,
    engine: SrsEngine,
    clock: Arc<dyn Clock>,
}

impl ReviewService {
    pub fn new(
        cards: Arc<dyn CardStore>,
        stats: Arc<dyn StatsStore>,
        engine: SrsEngine,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cards,
            stats,
            engine,
            clock,
        }
    }

    /// 回答を記録して更新後の stats を返す。stats がまだ無ければ初期値から計算する。
    pub async fn submit_answer(
        &self,
        user_id: UserId,
        card_id: CardId,
        outcome: ReviewOutcome,
    ) -> Result<ReviewStats, ServiceError> {
        self.owned_card(user_id, card_id).await?;
        let now = self.clock.now();
        let current = self
            .stats
            .get_stats(user_id, card_id)
            .await?
            .unwrap_or_else(|| ReviewStats::new(user_id, card_id, now));

        let next = self.engine.next_state(&current, outcome, now)?;
        self.stats.upsert_stats(&next).await?;
        tracing::debug!(
            %user_id,
            %card_id,
            outcome = outcome.as_str(),
            interval = next.interval,
            ease_factor = next.ease_factor,
            "review recorded"
        );
        Ok(next)
    }

    /// 期限が来ている中で最も古い card。無ければ None。
    pub async fn next_due_card(&self, user_id: UserId) -> Result<Option<(Card, ReviewStats)>, ServiceError> {
        let Some(stats) = self.stats.next_due(user_id, self.clock.now()).await? else {
            return Ok(None);
        };
        let card = self.cards.get_card(stats.card_id).await?;
        Ok(Some((card, stats)))
    }

    pub async fn postpone_review(
        &self,
        user_id: UserId,
        card_id: CardId,
        days: i64,
    ) -> Result<ReviewStats, ServiceError> {
        self.owned_card(user_id, card_id).await?;
        let current = self
            .stats
            .get_stats(user_id, card_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "review_stats",
                id: card_id.to_string(),
            })?;

        let next = self.engine.postpone(&current, days, self.clock.now())?;
        self.stats.upsert_stats(&next).await?;
        tracing::debug!(%user_id, %card_id, days, "review postponed");
        Ok(next)
    }

    async fn owned_card(&self, user_id: UserId, card_id: CardId) -> Result<Card, ServiceError> {
        let card = self.cards.get_card(card_id).await?;
        if card.user_id != user_id {
            return Err(ServiceError::Forbidden(format!("card {card_id}")));
        }
        Ok(card)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CardContent, MemoId, SrsError};
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use chrono::{Duration, Utc};

    struct Fixture {
        clock: Arc<FixedClock>,
        service: ReviewService,
        user: UserId,
        card: Card,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryStore::with_clock(clock.clone());
        let user = UserId::generate();
        let card = Card::new(user, MemoId::generate(), CardContent::new("q", "a"), clock.now());
        store
            .replace_cards_for_memo(card.memo_id, std::slice::from_ref(&card))
            .await
            .unwrap();
        let service = ReviewService::new(
            Arc::new(store.clone()),
            Arc::new(store),
            SrsEngine::default(),
            clock.clone(),
        );
        Fixture {
            clock,
            service,
            user,
            card,
        }
    }

    #[tokio::test]
    async fn answer_updates_stats() {
        let f = fixture().await;
        let stats = f
            .service
            .submit_answer(f.user, f.card.id, ReviewOutcome::Good)
            .await
            .unwrap();
        assert_eq!(stats.review_count, 1);
        assert_eq!(stats.interval, 1);
        assert_eq!(stats.next_review_at, f.clock.now() + Duration::days(1));
    }

    #[tokio::test]
    async fn new_card_is_due_then_not_after_answer() {
        let f = fixture().await;
        let (card, _) = f.service.next_due_card(f.user).await.unwrap().unwrap();
        assert_eq!(card.id, f.card.id);

        f.service
            .submit_answer(f.user, f.card.id, ReviewOutcome::Easy)
            .await
            .unwrap();
        assert!(f.service.next_due_card(f.user).await.unwrap().is_none());

        f.clock.advance(Duration::days(2));
        assert!(f.service.next_due_card(f.user).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn postpone_moves_due_date() {
        let f = fixture().await;
        let before = f
            .service
            .submit_answer(f.user, f.card.id, ReviewOutcome::Good)
            .await
            .unwrap();
        let after = f.service.postpone_review(f.user, f.card.id, 3).await.unwrap();
        assert_eq!(after.next_review_at, before.next_review_at + Duration::days(3));
        assert_eq!(after.interval, before.interval);

        let err = f.service.postpone_review(f.user, f.card.id, 0).await.unwrap_err();
        assert_eq!(err, ServiceError::Srs(SrsError::InvalidDays(0)));
    }

    #[tokio::test]
    async fn other_users_card_is_forbidden() {
        let f = fixture().await;
        let stranger = UserId::generate();
        assert!(matches!(
            f.service.submit_answer(stranger, f.card.id, ReviewOutcome::Good).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.postpone_review(stranger, f.card.id, 1).await,
            Err(ServiceError::Forbidden(_))
        ));
    }
}
