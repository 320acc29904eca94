//! SQLite store implementation.
//!
//! # 設計
//! - `Arc<tokio::sync::Mutex<Connection>>` で接続を 1 本だけ持つ
//! - 時刻は `2025-01-01T00:00:00.000000000Z` 形式の固定長 TEXT。
//!   文字列比較がそのまま時刻比較になる
//! - status 遷移は `WHERE status = <読んだ値>` 付きの UPDATE で行う。
//!   別プロセスが同じ DB を触っていても二重 claim にならない

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tokio::sync::Mutex;

use crate::domain::{
    Card, CardContent, CardId, Id, IdMarker, Memo, MemoId, MemoStatus, ReviewStats, StoreError,
    TaskId, TaskRecord, TaskStatus, TaskType, UserId,
};
use crate::domain::task::UnknownStatus;
use crate::observability::TaskCounts;
use crate::ports::{CardStore, Clock, MemoStore, StatsStore, SystemClock, TaskStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_status_updated ON tasks(status, updated_at);

CREATE TABLE IF NOT EXISTS memos (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    text TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cards (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    memo_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cards_memo ON cards(memo_id);

CREATE TABLE IF NOT EXISTS review_stats (
    user_id TEXT NOT NULL,
    card_id TEXT NOT NULL,
    interval INTEGER NOT NULL,
    ease_factor REAL NOT NULL,
    consecutive_correct INTEGER NOT NULL,
    review_count INTEGER NOT NULL,
    last_reviewed_at TEXT,
    next_review_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, card_id)
);
CREATE INDEX IF NOT EXISTS idx_review_stats_due ON review_stats(user_id, next_review_at);
";

const TASK_COLUMNS: &str = "id, type, payload, status, error_message, created_at, updated_at";
const MEMO_COLUMNS: &str = "id, user_id, text, status, created_at, updated_at";
const CARD_COLUMNS: &str = "id, user_id, memo_id, content, created_at, updated_at";
const STATS_COLUMNS: &str = "user_id, card_id, interval, ease_factor, consecutive_correct, \
     review_count, last_reviewed_at, next_review_at, created_at, updated_at";

/// SQLite-backed implementation of every store port.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(|e| unavailable("open", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| unavailable("pragma", e))?;
        Self::init(conn, clock)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| unavailable("open in-memory", e))?;
        Self::init(conn, clock)
    }

    fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(|e| unavailable("schema", e))?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            clock,
        })
    }
}

// ========================================
// 変換ヘルパー
// ========================================

fn unavailable(op: &str, e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(format!("{op}: {e}"))
}

fn is_constraint(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {s:?}: {e}")))
}

fn parse_id<T: IdMarker>(s: &str) -> Result<Id<T>, StoreError> {
    Id::parse(s).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn col<T: rusqlite::types::FromSql>(row: &Row<'_>, idx: usize) -> Result<T, StoreError> {
    row.get(idx)
        .map_err(|e| StoreError::Corrupt(format!("column {idx}: {e}")))
}

fn read_task(row: &Row<'_>) -> Result<TaskRecord, StoreError> {
    let payload: String = col(row, 2)?;
    let status: String = col(row, 3)?;
    Ok(TaskRecord {
        id: parse_id(&col::<String>(row, 0)?)?,
        task_type: TaskType::new(col::<String>(row, 1)?),
        payload: serde_json::from_str(&payload)
            .map_err(|e| StoreError::Corrupt(format!("payload: {e}")))?,
        status: status
            .parse()
            .map_err(|e: UnknownStatus| StoreError::Corrupt(e.to_string()))?,
        error_message: col(row, 4)?,
        created_at: parse_ts(&col::<String>(row, 5)?)?,
        updated_at: parse_ts(&col::<String>(row, 6)?)?,
    })
}

fn read_memo(row: &Row<'_>) -> Result<Memo, StoreError> {
    let status: String = col(row, 3)?;
    Ok(Memo {
        id: parse_id(&col::<String>(row, 0)?)?,
        user_id: parse_id(&col::<String>(row, 1)?)?,
        text: col(row, 2)?,
        status: status
            .parse()
            .map_err(|e: UnknownStatus| StoreError::Corrupt(e.to_string()))?,
        created_at: parse_ts(&col::<String>(row, 4)?)?,
        updated_at: parse_ts(&col::<String>(row, 5)?)?,
    })
}

fn read_card(row: &Row<'_>) -> Result<Card, StoreError> {
    let content: String = col(row, 3)?;
    Ok(Card {
        id: parse_id(&col::<String>(row, 0)?)?,
        user_id: parse_id(&col::<String>(row, 1)?)?,
        memo_id: parse_id(&col::<String>(row, 2)?)?,
        content: serde_json::from_str::<CardContent>(&content)
            .map_err(|e| StoreError::Corrupt(format!("card content: {e}")))?,
        created_at: parse_ts(&col::<String>(row, 4)?)?,
        updated_at: parse_ts(&col::<String>(row, 5)?)?,
    })
}

fn read_stats(row: &Row<'_>) -> Result<ReviewStats, StoreError> {
    let last_reviewed_at: Option<String> = col(row, 6)?;
    Ok(ReviewStats {
        user_id: parse_id(&col::<String>(row, 0)?)?,
        card_id: parse_id(&col::<String>(row, 1)?)?,
        interval: col(row, 2)?,
        ease_factor: col(row, 3)?,
        consecutive_correct: col(row, 4)?,
        review_count: col(row, 5)?,
        last_reviewed_at: last_reviewed_at.as_deref().map(parse_ts).transpose()?,
        next_review_at: parse_ts(&col::<String>(row, 7)?)?,
        created_at: parse_ts(&col::<String>(row, 8)?)?,
        updated_at: parse_ts(&col::<String>(row, 9)?)?,
    })
}

fn insert_task(conn: &Connection, task: &TaskRecord) -> Result<(), StoreError> {
    let payload = serde_json::to_string(&task.payload)
        .map_err(|e| StoreError::Corrupt(format!("payload: {e}")))?;
    conn.execute(
        &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            task.id.to_storage(),
            task.task_type.as_str(),
            payload,
            task.status.as_str(),
            task.error_message,
            ts(task.created_at),
            ts(task.updated_at),
        ],
    )
    .map_err(|e| {
        if is_constraint(&e) {
            StoreError::Duplicate {
                entity: "task",
                id: task.id.to_string(),
            }
        } else {
            unavailable("insert task", e)
        }
    })?;
    Ok(())
}

fn insert_memo(conn: &Connection, memo: &Memo) -> Result<(), StoreError> {
    conn.execute(
        &format!("INSERT INTO memos ({MEMO_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![
            memo.id.to_storage(),
            memo.user_id.to_storage(),
            memo.text,
            memo.status.as_str(),
            ts(memo.created_at),
            ts(memo.updated_at),
        ],
    )
    .map_err(|e| {
        if is_constraint(&e) {
            StoreError::Duplicate {
                entity: "memo",
                id: memo.id.to_string(),
            }
        } else {
            unavailable("insert memo", e)
        }
    })?;
    Ok(())
}

fn select_task(conn: &Connection, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
    let mut stmt = conn
        .prepare_cached(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
        .map_err(|e| unavailable("select task", e))?;
    let mut rows = stmt
        .query(params![id.to_storage()])
        .map_err(|e| unavailable("select task", e))?;
    match rows.next().map_err(|e| unavailable("select task", e))? {
        Some(row) => read_task(row).map(Some),
        None => Ok(None),
    }
}

fn select_memo(conn: &Connection, id: MemoId) -> Result<Option<Memo>, StoreError> {
    let mut stmt = conn
        .prepare_cached(&format!("SELECT {MEMO_COLUMNS} FROM memos WHERE id = ?1"))
        .map_err(|e| unavailable("select memo", e))?;
    let mut rows = stmt
        .query(params![id.to_storage()])
        .map_err(|e| unavailable("select memo", e))?;
    match rows.next().map_err(|e| unavailable("select memo", e))? {
        Some(row) => read_memo(row).map(Some),
        None => Ok(None),
    }
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create(&self, task: &TaskRecord) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        insert_task(&db, task)
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let mut db = self.db.lock().await;
        let tx = db.transaction().map_err(|e| unavailable("begin", e))?;

        let mut task = select_task(&tx, id)?.ok_or_else(|| not_found("task", id))?;
        if !task.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: task.status.as_str(),
                to: status.as_str(),
            });
        }
        let previous = task.status;
        task.apply_status(status, error_message, now);

        let changed = tx
            .execute(
                "UPDATE tasks SET status = ?1, error_message = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    task.status.as_str(),
                    task.error_message,
                    ts(task.updated_at),
                    id.to_storage(),
                    previous.as_str(),
                ],
            )
            .map_err(|e| unavailable("update task status", e))?;
        if changed == 0 {
            // 別の接続が先に遷移させた
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: previous.as_str(),
                to: status.as_str(),
            });
        }
        tx.commit().map_err(|e| unavailable("commit", e))?;
        Ok(task)
    }

    async fn reclaim_stale(&self, id: TaskId, older_than: Duration) -> Result<TaskRecord, StoreError> {
        let now = self.clock.now();
        let cutoff = now - older_than;
        let mut db = self.db.lock().await;
        let tx = db.transaction().map_err(|e| unavailable("begin", e))?;

        let changed = tx
            .execute(
                "UPDATE tasks SET updated_at = ?1
                 WHERE id = ?2 AND status = 'processing' AND updated_at <= ?3",
                params![ts(now), id.to_storage(), ts(cutoff)],
            )
            .map_err(|e| unavailable("reclaim task", e))?;

        let task = select_task(&tx, id)?.ok_or_else(|| not_found("task", id))?;
        if changed == 0 {
            return Err(StoreError::StaleClaim(id.to_string()));
        }
        tx.commit().map_err(|e| unavailable("commit", e))?;
        Ok(task)
    }

    async fn get_by_id(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        let db = self.db.lock().await;
        select_task(&db, id)?.ok_or_else(|| not_found("task", id))
    }

    async fn find_by_status_older_than(
        &self,
        status: TaskStatus,
        age: Duration,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let cutoff = self.clock.now() - age;
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare_cached(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE status = ?1 AND updated_at <= ?2
                 ORDER BY updated_at ASC, id ASC"
            ))
            .map_err(|e| unavailable("find tasks", e))?;
        let mut rows = stmt
            .query(params![status.as_str(), ts(cutoff)])
            .map_err(|e| unavailable("find tasks", e))?;

        let mut found = Vec::new();
        while let Some(row) = rows.next().map_err(|e| unavailable("find tasks", e))? {
            match read_task(row) {
                Ok(task) => found.push(task),
                // 読めない行は飛ばす。1 行のせいで recovery 全体を止めない
                Err(StoreError::Corrupt(reason)) => {
                    let id: Option<String> = row.get(0).ok();
                    tracing::warn!(
                        id = id.as_deref().unwrap_or("?"),
                        %reason,
                        "skipping undecodable task row"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }

    async fn counts_by_status(&self) -> Result<TaskCounts, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare_cached("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .map_err(|e| unavailable("count tasks", e))?;
        let mut rows = stmt.query([]).map_err(|e| unavailable("count tasks", e))?;

        let mut counts = TaskCounts::default();
        while let Some(row) = rows.next().map_err(|e| unavailable("count tasks", e))? {
            let status: String = col(row, 0)?;
            let n: i64 = col(row, 1)?;
            let n = usize::try_from(n).unwrap_or_default();
            match status.parse::<TaskStatus>() {
                Ok(TaskStatus::Pending) => counts.pending = n,
                Ok(TaskStatus::Processing) => counts.processing = n,
                Ok(TaskStatus::Completed) => counts.completed = n,
                Ok(TaskStatus::Failed) => counts.failed = n,
                Err(e) => return Err(StoreError::Corrupt(e.to_string())),
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl MemoStore for SqliteStore {
    async fn create_memo(&self, memo: &Memo) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        insert_memo(&db, memo)
    }

    async fn create_memo_with_task(&self, memo: &Memo, task: &TaskRecord) -> Result<(), StoreError> {
        let mut db = self.db.lock().await;
        let tx = db.transaction().map_err(|e| unavailable("begin", e))?;
        insert_memo(&tx, memo)?;
        insert_task(&tx, task)?;
        tx.commit().map_err(|e| unavailable("commit", e))
    }

    async fn get_memo(&self, id: MemoId) -> Result<Memo, StoreError> {
        let db = self.db.lock().await;
        select_memo(&db, id)?.ok_or_else(|| not_found("memo", id))
    }

    async fn update_memo_status(&self, id: MemoId, status: MemoStatus) -> Result<Memo, StoreError> {
        let now = self.clock.now();
        let mut db = self.db.lock().await;
        let tx = db.transaction().map_err(|e| unavailable("begin", e))?;

        let mut memo = select_memo(&tx, id)?.ok_or_else(|| not_found("memo", id))?;
        if !memo.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: memo.status.as_str(),
                to: status.as_str(),
            });
        }
        let previous = memo.status;
        memo.status = status;
        memo.updated_at = memo.updated_at.max(now);

        let changed = tx
            .execute(
                "UPDATE memos SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    memo.status.as_str(),
                    ts(memo.updated_at),
                    id.to_storage(),
                    previous.as_str()
                ],
            )
            .map_err(|e| unavailable("update memo status", e))?;
        if changed == 0 {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: previous.as_str(),
                to: status.as_str(),
            });
        }
        tx.commit().map_err(|e| unavailable("commit", e))?;
        Ok(memo)
    }
}

#[async_trait]
impl CardStore for SqliteStore {
    async fn replace_cards_for_memo(&self, memo_id: MemoId, cards: &[Card]) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut db = self.db.lock().await;
        let tx = db.transaction().map_err(|e| unavailable("begin", e))?;

        tx.execute(
            "DELETE FROM review_stats WHERE card_id IN (SELECT id FROM cards WHERE memo_id = ?1)",
            params![memo_id.to_storage()],
        )
        .map_err(|e| unavailable("delete stats", e))?;
        tx.execute(
            "DELETE FROM cards WHERE memo_id = ?1",
            params![memo_id.to_storage()],
        )
        .map_err(|e| unavailable("delete cards", e))?;

        for card in cards {
            let content = serde_json::to_string(&card.content)
                .map_err(|e| StoreError::Corrupt(format!("card content: {e}")))?;
            tx.execute(
                &format!("INSERT INTO cards ({CARD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    card.id.to_storage(),
                    card.user_id.to_storage(),
                    memo_id.to_storage(),
                    content,
                    ts(card.created_at),
                    ts(card.updated_at),
                ],
            )
            .map_err(|e| unavailable("insert card", e))?;
            write_stats(&tx, &ReviewStats::new(card.user_id, card.id, now))?;
        }
        tx.commit().map_err(|e| unavailable("commit", e))
    }

    async fn list_cards_by_memo(&self, memo_id: MemoId) -> Result<Vec<Card>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare_cached(&format!(
                "SELECT {CARD_COLUMNS} FROM cards WHERE memo_id = ?1 ORDER BY id ASC"
            ))
            .map_err(|e| unavailable("list cards", e))?;
        let mut rows = stmt
            .query(params![memo_id.to_storage()])
            .map_err(|e| unavailable("list cards", e))?;

        let mut cards = Vec::new();
        while let Some(row) = rows.next().map_err(|e| unavailable("list cards", e))? {
            cards.push(read_card(row)?);
        }
        Ok(cards)
    }

    async fn get_card(&self, id: CardId) -> Result<Card, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare_cached(&format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?1"))
            .map_err(|e| unavailable("get card", e))?;
        let mut rows = stmt
            .query(params![id.to_storage()])
            .map_err(|e| unavailable("get card", e))?;
        match rows.next().map_err(|e| unavailable("get card", e))? {
            Some(row) => read_card(row),
            None => Err(not_found("card", id)),
        }
    }
}

fn write_stats(conn: &Connection, stats: &ReviewStats) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO review_stats ({STATS_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (user_id, card_id) DO UPDATE SET
                interval = excluded.interval,
                ease_factor = excluded.ease_factor,
                consecutive_correct = excluded.consecutive_correct,
                review_count = excluded.review_count,
                last_reviewed_at = excluded.last_reviewed_at,
                next_review_at = excluded.next_review_at,
                updated_at = excluded.updated_at"
        ),
        params![
            stats.user_id.to_storage(),
            stats.card_id.to_storage(),
            stats.interval,
            stats.ease_factor,
            stats.consecutive_correct,
            stats.review_count,
            stats.last_reviewed_at.map(ts),
            ts(stats.next_review_at),
            ts(stats.created_at),
            ts(stats.updated_at),
        ],
    )
    .map_err(|e| unavailable("upsert stats", e))?;
    Ok(())
}

#[async_trait]
impl StatsStore for SqliteStore {
    async fn get_stats(&self, user_id: UserId, card_id: CardId) -> Result<Option<ReviewStats>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare_cached(&format!(
                "SELECT {STATS_COLUMNS} FROM review_stats WHERE user_id = ?1 AND card_id = ?2"
            ))
            .map_err(|e| unavailable("get stats", e))?;
        let mut rows = stmt
            .query(params![user_id.to_storage(), card_id.to_storage()])
            .map_err(|e| unavailable("get stats", e))?;
        match rows.next().map_err(|e| unavailable("get stats", e))? {
            Some(row) => read_stats(row).map(Some),
            None => Ok(None),
        }
    }

    async fn upsert_stats(&self, stats: &ReviewStats) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        write_stats(&db, stats)
    }

    async fn next_due(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Option<ReviewStats>, StoreError> {
        let db = self.db.lock().await;
        let card_id: Option<String> = db
            .query_row(
                "SELECT card_id FROM review_stats
                 WHERE user_id = ?1 AND next_review_at <= ?2
                 ORDER BY next_review_at ASC, card_id ASC
                 LIMIT 1",
                params![user_id.to_storage(), ts(now)],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| unavailable("next due", e))?;
        drop(db);

        match card_id {
            Some(card_id) => self.get_stats(user_id, parse_id(&card_id)?).await,
            None => Ok(None),
        }
    }
}
