//! Memo - generation task の subject
//!
//! status は task と同じ語彙を使うが、別のレコードとして管理する。
//! `processing → processing` は recovery による再実行で発生するので許可する。
//! `pending → failed` は executor が始まる前に cancel された場合。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{MemoId, UserId};
use super::task::UnknownStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl MemoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoStatus::Pending => "pending",
            MemoStatus::Processing => "processing",
            MemoStatus::Completed => "completed",
            MemoStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MemoStatus::Completed | MemoStatus::Failed)
    }

    pub fn can_transition_to(&self, next: MemoStatus) -> bool {
        matches!(
            (self, next),
            (MemoStatus::Pending, MemoStatus::Processing)
                | (MemoStatus::Pending, MemoStatus::Failed)
                | (MemoStatus::Processing, MemoStatus::Processing)
                | (MemoStatus::Processing, MemoStatus::Completed)
                | (MemoStatus::Processing, MemoStatus::Failed)
        )
    }
}

impl fmt::Display for MemoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MemoStatus::Pending),
            "processing" => Ok(MemoStatus::Processing),
            "completed" => Ok(MemoStatus::Completed),
            "failed" => Ok(MemoStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memo {
    pub id: MemoId,
    pub user_id: UserId,
    pub text: String,
    pub status: MemoStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoValidationError {
    #[error("memo text must not be empty")]
    EmptyText,
}

impl Memo {
    pub fn new(user_id: UserId, text: impl Into<String>, now: DateTime<Utc>) -> Result<Self, MemoValidationError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(MemoValidationError::EmptyText);
        }
        Ok(Self {
            id: MemoId::generate(),
            user_id,
            text,
            status: MemoStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }
}
