//! AppBuilder - handler 登録から TaskRunner までの組み立て
//!
//! registry は build 時に凍結して `Arc` で factory に渡す（グローバル状態なし）。
//! 足りない handler や範囲外の設定は build で落とす。

use std::sync::Arc;

use super::runner::TaskRunner;
use crate::config::{ConfigError, RunnerConfig};
use crate::ports::{Clock, SystemClock, TaskStore};
use crate::typed::{Handler, RegistryError, Task, TaskFactory, TypedRegistry};

/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .register::<MemoGenerationTask, _>(handler)?
///     .expect_tasks(&[MemoGenerationTask::TYPE])
///     .runner_config(config.runner.clone())
///     .build(store)?;
/// app.runner.start().await?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - RunnerConfig の範囲もここでチェック
pub struct AppBuilder {
    registry: TypedRegistry,
    expected_tasks: Option<Vec<String>>,
    runner_config: RunnerConfig,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: TypedRegistry::new(),
            expected_tasks: None,
            runner_config: RunnerConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Handler を登録。同じ task_type を二度登録するとエラー。
    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn runner_config(mut self, config: RunnerConfig) -> Self {
        self.runner_config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// # 検証
    /// - expect_tasks() で設定された task_type が全て登録されているか
    /// - RunnerConfig が範囲内か
    pub fn build(self, store: Arc<dyn TaskStore>) -> Result<App, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let registered_types = self.registry.registered_types();
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|x| !registered_types.contains(x))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }
        self.runner_config.validate()?;

        let factory = TaskFactory::new(Arc::new(self.registry));
        let runner = TaskRunner::new(store, factory.clone(), self.clock, self.runner_config);
        tracing::debug!(
            task_types = ?factory.registry().registered_types(),
            "app built"
        );
        Ok(App {
            factory,
            runner: Arc::new(runner),
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 構築済みのアプリケーション
pub struct App {
    pub factory: TaskFactory,
    pub runner: Arc<TaskRunner>,
}
