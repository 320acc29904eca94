//! Handler trait - Task を実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler, Executable)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)
//!
//! # 二段階の型消去
//! 1. `TypedHandler<T, H>`: registry に入れるための `dyn DynHandler`
//! 2. `BoundTask<T, H>`: decode 済みの payload と handler を束ねた `dyn Executable`
//!
//! worker は `Executable::run` だけを知っていればよい。

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::codec::PayloadCodec;
use super::task::Task;
use crate::domain::{ExecutorError, FactoryError, TaskId, TaskType};

/// 1 回の実行に渡されるコンテキスト
///
/// `cancel` は runner の shutdown token の子。stop() で cancel される。
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Handler は Task を実行する
///
/// # 使用例
/// ```ignore
/// struct MyTaskHandler;
///
/// #[async_trait]
/// impl Handler<MyTask> for MyTaskHandler {
///     async fn handle(&self, task: MyTask, ctx: &TaskContext) -> Result<(), ExecutorError> {
///         tracing::info!(task_id = %ctx.task_id, "processing");
///         Ok(())
///     }
/// }
/// ```
///
/// recovery によって同じ payload で複数回呼ばれることがある。
/// 副作用は上書き可能（冪等）にしておくこと。
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T, ctx: &TaskContext) -> Result<(), ExecutorError>;
}

/// factory が返す実行単位
#[async_trait]
pub trait Executable: Send {
    fn task_type(&self) -> &'static str;

    async fn run(self: Box<Self>, ctx: TaskContext) -> Result<(), ExecutorError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// payload を decode して `Executable` を作るところまでを担当する（I/O はしない）。
pub trait DynHandler: Send + Sync {
    fn bind(&self, task_type: &TaskType, payload: &serde_json::Value) -> Result<Box<dyn Executable>, FactoryError>;

    fn task_type(&self) -> &'static str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: Arc<H>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            _marker: PhantomData,
        }
    }
}

impl<T: Task, H: Handler<T> + 'static> DynHandler for TypedHandler<T, H> {
    fn bind(&self, task_type: &TaskType, payload: &serde_json::Value) -> Result<Box<dyn Executable>, FactoryError> {
        let task: T = PayloadCodec::decode(task_type, payload)?;
        Ok(Box::new(BoundTask {
            task,
            handler: Arc::clone(&self.handler),
        }))
    }

    fn task_type(&self) -> &'static str {
        T::TYPE
    }
}

struct BoundTask<T: Task, H: Handler<T>> {
    task: T,
    handler: Arc<H>,
}

#[async_trait]
impl<T: Task, H: Handler<T> + 'static> Executable for BoundTask<T, H> {
    fn task_type(&self) -> &'static str {
        T::TYPE
    }

    async fn run(self: Box<Self>, ctx: TaskContext) -> Result<(), ExecutorError> {
        let BoundTask { task, handler } = *self;
        handler.handle(task, &ctx).await
    }
}
