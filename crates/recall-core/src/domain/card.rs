use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CardId, MemoId, UserId};

/// generator が返す card の中身（永続化時は JSON で保存）
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CardContent {
    pub front: String,
    pub back: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl CardContent {
    pub fn new(front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            front: front.into(),
            back: back.into(),
            ..Default::default()
        }
    }
}

/// memo から生成された復習対象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub user_id: UserId,
    pub memo_id: MemoId,
    pub content: CardContent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    pub fn new(user_id: UserId, memo_id: MemoId, content: CardContent, now: DateTime<Utc>) -> Self {
        Self {
            id: CardId::generate(),
            user_id,
            memo_id,
            content,
            created_at: now,
            updated_at: now,
        }
    }
}
