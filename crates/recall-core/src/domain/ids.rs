//! Domain identifiers (strongly-typed IDs).
//!
//! ULID + Phantom type パターン。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: timestamp が先頭にあるため、生成順序でソートできる
//! - **分散生成可能**: 調整なしで複数プロセスで生成できる
//! - 永続化時は prefix なしの 26 文字表現を使う（`to_storage` / `parse`）
//!
//! ## Phantom Type パターン
//! `Id<T>` で共通実装を提供しつつ、`T` はコンパイル時だけのマーカー。
//! `TaskId` と `MemoId` を取り違えるとコンパイルエラーになる。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"task-", "memo-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// serde では ULID 文字列そのものとして (de)serialize される。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// ULID から Id を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// 現在時刻ベースの新しい Id
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// 永続化用の表現（prefix なし）
    pub fn to_storage(&self) -> String {
        self.ulid.to_string()
    }

    /// `to_storage` の逆変換。`Display` 形式（prefix 付き）も受け付ける。
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| IdParseError(s.to_string()))
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id: {0}")]
pub struct IdParseError(pub String);

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Memo {}

impl IdMarker for Memo {
    fn prefix() -> &'static str {
        "memo-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Card {}

impl IdMarker for Card {
    fn prefix() -> &'static str {
        "card-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum User {}

impl IdMarker for User {
    fn prefix() -> &'static str {
        "user-"
    }
}

/// Identifier of a durable task record.
pub type TaskId = Id<Task>;

/// Identifier of a memo (the subject a generation task works on).
pub type MemoId = Id<Memo>;

/// Identifier of a generated card.
pub type CardId = Id<Card>;

/// Identifier of a user.
pub type UserId = Id<User>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix() {
        let ulid = Ulid::new();
        let task = TaskId::from_ulid(ulid);
        let memo = MemoId::from_ulid(ulid);

        assert_eq!(task.as_ulid(), memo.as_ulid());
        assert!(task.to_string().starts_with("task-"));
        assert!(memo.to_string().starts_with("memo-"));
        // let _: TaskId = memo; // <- does not compile
    }

    #[test]
    fn parse_accepts_storage_and_display_forms() {
        let id = CardId::generate();
        assert_eq!(CardId::parse(&id.to_storage()).unwrap(), id);
        assert_eq!(id.to_string().parse::<CardId>().unwrap(), id);
        assert!(CardId::parse("not-a-ulid").is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = UserId::generate();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_storage()));

        let back: UserId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<Ulid>());
    }
}
