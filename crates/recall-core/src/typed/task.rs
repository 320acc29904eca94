//! Task - payload 型と tasks.type 列の対応
//!
//! `const TYPE` が永続化される識別子。payload は serde で JSON にする。

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task は task_type と payload の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct MemoGenerationTask {
///     memo_id: MemoId,
///     user_id: UserId,
/// }
///
/// impl Task for MemoGenerationTask {
///     const TYPE: &'static str = "memo_generation";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: tasks テーブルの payload 列への保存のため
/// - `DeserializeOwned`: payload からの復元のため（'static に対応）
/// - `Send + Sync`: worker（別 tokio task）に渡すため
/// - `'static`: Box<dyn Executable> に格納できるため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// tasks.type 列に保存される値。一度永続化したら変えないこと。
    const TYPE: &'static str;
}
