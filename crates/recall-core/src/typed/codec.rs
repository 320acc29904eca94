//! PayloadCodec - payload(JSON) と Task の相互変換

use chrono::{DateTime, Utc};

use super::task::Task;
use crate::domain::{CodecError, TaskRecord, TaskType};

/// PayloadCodec は T と tasks.payload 列（JSON）を変換する
///
/// # デシリアライズフロー
/// 1. task_type が `T::TYPE` と一致するか確認
/// 2. serde_json で T にデシリアライズ
/// 3. 失敗は `CodecError::Decode`（factory では MalformedPayload になる）
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Task>(task: &T) -> Result<(TaskType, serde_json::Value), CodecError> {
        let payload = serde_json::to_value(task).map_err(|e| CodecError::Encode {
            task_type: T::TYPE.to_string(),
            reason: e.to_string(),
        })?;
        Ok((TaskType::new(T::TYPE), payload))
    }

    pub fn decode<T: Task>(task_type: &TaskType, payload: &serde_json::Value) -> Result<T, CodecError> {
        if task_type.as_str() != T::TYPE {
            return Err(CodecError::TypeMismatch {
                expected: T::TYPE.to_string(),
                actual: task_type.to_string(),
            });
        }
        T::deserialize(payload).map_err(|e| CodecError::Decode {
            task_type: T::TYPE.to_string(),
            reason: e.to_string(),
        })
    }

    /// T を新しい pending の TaskRecord にする
    pub fn to_record<T: Task>(task: &T, now: DateTime<Utc>) -> Result<TaskRecord, CodecError> {
        let (task_type, payload) = Self::encode(task)?;
        Ok(TaskRecord::new(task_type, payload, now))
    }
}
