//! Errors - エラー型と分類
//!
//! レイヤーごとに thiserror の enum を持ち、`kind()` で運用上の分類を返す。
//!
//! | 型 | 発生源 | worker での扱い |
//! |----|--------|-----------------|
//! | `FactoryError` | payload decode / 未登録 type | 即 failed（リトライしない） |
//! | `ExecutorError` | executor 本体 | failed + メッセージ |
//! | `StoreError` | 永続化層 | Unavailable のみ有限回リトライ |
//! | `RunnerError` | submit / start | 呼び出し側へ返す |

use super::memo::MemoValidationError;
use super::review::StatsValidationError;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（DB の障害など）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: String },

    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    /// reclaim 対象がもう stale ではない（別インスタンスが先に回収した等）
    #[error("task {0} is not stale any more")]
    StaleClaim(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// TaskFactory::build のエラー。どちらも code/data の不整合なのでリトライしない。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FactoryError {
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("malformed payload for {task_type}: {reason}")]
    MalformedPayload { task_type: String, reason: String },
}

impl FactoryError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Permanent
    }
}

/// CardGenerator が返す失敗
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation failed: {0}")]
    Failed(String),

    #[error("generation rejected input: {0}")]
    InvalidInput(String),

    #[error("generation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("task cancelled")]
    Cancelled,

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),
}

impl ExecutorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::Cancelled => ErrorKind::Transient,
            ExecutorError::Generation(GenerationError::InvalidInput(_)) => ErrorKind::Permanent,
            ExecutorError::Generation(_) => ErrorKind::Transient,
            ExecutorError::Store(e) => e.kind(),
            ExecutorError::Failed(_) => ErrorKind::Permanent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("encode {task_type}: {reason}")]
    Encode { task_type: String, reason: String },

    #[error("decode {task_type}: {reason}")]
    Decode { task_type: String, reason: String },

    #[error("task type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

impl From<CodecError> for FactoryError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Decode { task_type, reason } | CodecError::Encode { task_type, reason } => {
                FactoryError::MalformedPayload { task_type, reason }
            }
            CodecError::TypeMismatch { actual, .. } => FactoryError::UnknownTaskType(actual),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("runner is already running")]
    AlreadyRunning,

    #[error("runner is not running")]
    NotRunning,

    #[error("task queue is full")]
    QueueFull,

    #[error("submission cancelled")]
    Cancelled,

    #[error("task store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<StoreError> for RunnerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => RunnerError::StoreUnavailable(msg),
            other => RunnerError::Store(other),
        }
    }
}

impl RunnerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::QueueFull | RunnerError::Cancelled => ErrorKind::Transient,
            RunnerError::StoreUnavailable(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Permanent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SrsError {
    #[error("days must be at least 1 (got {0})")]
    InvalidDays(i64),

    #[error("invalid review stats: {0}")]
    InvalidStats(#[from] StatsValidationError),

    #[error("invalid srs params: {0}")]
    InvalidParams(String),
}

/// MemoService / ReviewService のエラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    InvalidMemo(#[from] MemoValidationError),

    #[error("{0} does not belong to the user")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Srs(#[from] SrsError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
