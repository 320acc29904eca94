//! TaskFactory - 永続化された (type, payload) を実行単位に変換する
//!
//! build は payload の decode 以外の I/O をしない。
//! 依存（store や generator）は登録時に handler が持っている。

use std::sync::Arc;

use super::handler::Executable;
use super::registry::TypedRegistry;
use crate::domain::{FactoryError, TaskRecord};

#[derive(Clone)]
pub struct TaskFactory {
    registry: Arc<TypedRegistry>,
}

impl TaskFactory {
    pub fn new(registry: Arc<TypedRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypedRegistry {
        &self.registry
    }

    /// - 未登録の type → `UnknownTaskType`
    /// - payload が decode できない → `MalformedPayload`
    pub fn build(&self, task: &TaskRecord) -> Result<Box<dyn Executable>, FactoryError> {
        let handler = self
            .registry
            .get(task.task_type.as_str())
            .ok_or_else(|| FactoryError::UnknownTaskType(task.task_type.to_string()))?;
        handler.bind(&task.task_type, &task.payload)
    }
}
