//! App - アプリケーション層
//!
//! ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: registry の組み立てと起動時検証
//! - **TaskRunner**: bounded queue + worker pool、start / submit / stop
//! - **WorkerLoop**: dequeue→claim→build→run→status 記録
//! - **ReaperLoop**: 起動時の recovery と stuck task の監視
//! - **MemoService / ReviewService**: 外側（CLI や HTTP 層）から呼ぶ入口

pub mod builder;
pub mod memo_service;
mod reaper_loop;
pub mod review_service;
pub mod runner;
pub mod status;
pub(crate) mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::memo_service::MemoService;
pub use self::review_service::ReviewService;
pub use self::runner::TaskRunner;
pub use self::status::{RunnerState, RunnerStatus};
