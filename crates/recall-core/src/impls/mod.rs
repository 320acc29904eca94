//! Impls - port の実装
//!
//! - **InMemoryStore**: 開発・テスト用。障害注入（`fail_next_writes`）付き
//! - **SqliteStore**: rusqlite による永続化。CLI はこちらを使う

pub mod memory;
pub mod sqlite;

pub use self::memory::InMemoryStore;
pub use self::sqlite::SqliteStore;
