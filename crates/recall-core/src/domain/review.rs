//! Review statistics - (user, card) ごとの復習状態
//!
//! 永続状態は呼び出し側（ReviewService / StatsStore）が持ち、
//! 更新は `srs` の純粋関数の出力をそのまま保存するだけ。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{CardId, UserId};

/// 新規 stats の ease factor
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

/// 復習の自己評価
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOutcome {
    Again,
    Hard,
    Good,
    Easy,
}

impl ReviewOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewOutcome::Again => "again",
            ReviewOutcome::Hard => "hard",
            ReviewOutcome::Good => "good",
            ReviewOutcome::Easy => "easy",
        }
    }

    pub fn is_correct(&self) -> bool {
        !matches!(self, ReviewOutcome::Again)
    }
}

impl fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown review outcome: {0} (expected: again|hard|good|easy)")]
pub struct UnknownOutcome(pub String);

impl FromStr for ReviewOutcome {
    type Err = UnknownOutcome;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "again" => Ok(ReviewOutcome::Again),
            "hard" => Ok(ReviewOutcome::Hard),
            "good" => Ok(ReviewOutcome::Good),
            "easy" => Ok(ReviewOutcome::Easy),
            _ => Err(UnknownOutcome(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub user_id: UserId,
    pub card_id: CardId,
    /// 日数
    pub interval: u32,
    pub ease_factor: f64,
    pub consecutive_correct: u32,
    pub review_count: u32,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub next_review_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatsValidationError {
    #[error("ease factor must be greater than 1.0 (got {0})")]
    EaseFactor(f64),
    #[error("next_review_at is before last_reviewed_at")]
    ReviewOrder,
}

impl ReviewStats {
    /// 新規カード: interval 0、すぐに復習対象になる
    pub fn new(user_id: UserId, card_id: CardId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            card_id,
            interval: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            consecutive_correct: 0,
            review_count: 0,
            last_reviewed_at: None,
            next_review_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), StatsValidationError> {
        if !(self.ease_factor > 1.0) {
            return Err(StatsValidationError::EaseFactor(self.ease_factor));
        }
        if let Some(last) = self.last_reviewed_at
            && self.next_review_at < last
        {
            return Err(StatsValidationError::ReviewOrder);
        }
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_at <= now
    }
}
