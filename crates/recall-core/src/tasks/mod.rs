//! Tasks - この crate が提供する task 実装
//!
//! 新しい task を足すときは `Task` を実装した payload と `Handler` を書いて、
//! `AppBuilder::register` で登録する。

pub mod memo_generation;

pub use self::memo_generation::{MemoGenerationHandler, MemoGenerationTask};
