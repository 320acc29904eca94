//! Typed - payload 型と handler の静的な対応付け
//!
//! 文字列の task_type を直接書くのは `Task::TYPE` の 1 か所だけ。
//!
//! # 構成
//! - **型付き**: `Task` / `Handler<T>`。登録時に型で結び付ける
//! - **内部（Dyn）**: `DynHandler` / `Executable` trait - object-safe, type erasure
//!
//! `TaskFactory` が registry を引いて `TaskRecord` から `Executable` を作る。

pub mod codec;
pub mod factory;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::codec::PayloadCodec;
pub use self::factory::TaskFactory;
pub use self::handler::{DynHandler, Executable, Handler, TaskContext};
pub use self::registry::{RegistryError, TypedRegistry};
pub use self::task::Task;
