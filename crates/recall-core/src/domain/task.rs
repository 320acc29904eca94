//! Task record - 永続化される作業単位
//!
//! # 状態遷移
//! ```text
//! pending ──▶ processing ──▶ completed
//!                  │
//!                  └───────▶ failed
//! ```
//! - `processing → processing` は recovery 専用（`TaskStore::reclaim_stale`）で、
//!   通常の `update_status` では許可しない
//! - terminal（completed / failed）からはどこにも遷移しない
//! - エンジンは task を削除しない（監査用に残る）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 永続化される status。文字列表現はテーブルの値と一致させる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// `update_status` で許可される遷移かどうか
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// 永続化された task の 1 行分
///
/// payload は executor がクラッシュ後でも単独で実行できるだけの情報を持つ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    /// `status == Failed` のときだけ Some
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// 新しい pending task を作成
    pub fn new(task_type: TaskType, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self::with_id(TaskId::generate(), task_type, payload, now)
    }

    pub fn with_id(
        id: TaskId,
        task_type: TaskType,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            payload,
            status: TaskStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// status と error_message を同時に書き換える
    ///
    /// `updated_at` は巻き戻さない。
    pub(crate) fn apply_status(
        &mut self,
        status: TaskStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.error_message = match status {
            TaskStatus::Failed => Some(error_message.unwrap_or("unknown error").to_string()),
            _ => None,
        };
        self.updated_at = self.updated_at.max(now);
    }
}
