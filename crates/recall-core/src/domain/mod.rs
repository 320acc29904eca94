//! Domain model (IDs, records, statuses, errors).
//!
//! - ids: ULID ベースの型付き ID
//! - task: 永続 task の record と状態機械
//! - memo / card: generation の subject と成果物
//! - review: 復習統計と outcome
//! - errors: レイヤーごとのエラー型

pub mod card;
pub mod errors;
pub mod ids;
pub mod memo;
pub mod review;
pub mod task;

pub use card::{Card, CardContent};
pub use errors::{
    CodecError, ErrorKind, ExecutorError, FactoryError, GenerationError, RunnerError,
    ServiceError, SrsError, StoreError,
};
pub use ids::{CardId, Id, IdMarker, MemoId, TaskId, UserId};
pub use memo::{Memo, MemoStatus};
pub use review::{ReviewOutcome, ReviewStats};
pub use task::{TaskRecord, TaskStatus, TaskType};
