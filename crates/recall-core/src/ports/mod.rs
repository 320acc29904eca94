//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。永続化（SQLite / in-memory）や
//! 外部の生成サービスへのインターフェースを trait として定義し、実装を隠蔽します。
//!
//! # 設計原則
//! - TaskStore が task 状態の正本。runner のメモリ上のキューは候補通知に過ぎない
//! - 時刻は Clock から取る（テストで FixedClock に差し替える）

pub mod card_store;
pub mod clock;
pub mod generator;
pub mod memo_store;
pub mod stats_store;
pub mod task_store;

pub use self::card_store::CardStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::generator::CardGenerator;
pub use self::memo_store::MemoStore;
pub use self::stats_store::StatsStore;
pub use self::task_store::TaskStore;
