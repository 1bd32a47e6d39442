// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Durable per-session message log, backed by SQLite via rusqlite.
//!
//! The store is deliberately dumb: it persists what it is given and never
//! generates content.  In particular, `compact` takes the summary text from
//! the caller; the runner may want to produce it with whatever provider is
//! currently healthy, and that decision does not belong here.
//!
//! Reads order by `(created_at, ordinal)`.  Normal appends are strictly
//! ordinal-ordered (equal timestamps tie-break on the autoincrement
//! ordinal), while the compaction summary is written with a timestamp one
//! hour in the past so it sorts ahead of the retained tail.

use std::path::Path;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use otto_model::Message;

use crate::Result;

/// Messages kept (besides the summary) by [`SessionStore::compact`].
pub const COMPACT_RETAIN: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// A conversation session.  The key is caller-chosen and unique; the id is
/// generated on first reference and never changes.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe store handle.  All access funnels through one connection
/// behind a mutex, so writers serialise and `get_or_create` is atomic from
/// every caller's point of view.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (or create) the database at `path` and initialise the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        info!(path = %path.display(), "opening session store");
        let conn = Connection::open(path)?;
        // WAL keeps concurrent readers cheap.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                key TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                ordinal INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT,
                tool_calls TEXT,
                tool_results TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(session_id);
            ",
        )?;
        Ok(())
    }

    /// Resolve a session by key, creating it on first reference.
    /// Concurrent callers with the same key observe the same id.
    pub fn get_or_create(&self, key: &str) -> Result<Session> {
        let conn = self.conn.lock();
        let now = now_str();
        conn.execute(
            "INSERT OR IGNORE INTO sessions (id, key, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![uuid::Uuid::new_v4().to_string(), key, now],
        )?;
        let session = conn.query_row(
            "SELECT id, key, created_at, updated_at FROM sessions WHERE key = ?1",
            params![key],
            row_to_session,
        )?;
        Ok(session)
    }

    /// Append one message.  The store assigns the creation timestamp and a
    /// strictly increasing ordinal, and touches the session.
    pub fn append(&self, session_id: &str, msg: &Message) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_str();
        tx.execute(
            "INSERT INTO messages (session_id, role, content, tool_calls, tool_results, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                msg.role.as_str(),
                msg.content,
                to_json_opt(&msg.tool_calls)?,
                to_json_opt(&msg.tool_results)?,
                now,
            ],
        )?;
        tx.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![now, session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Read the session history in chronological order.  `limit <= 0`
    /// returns everything; otherwise the last `limit` messages, re-sorted
    /// ascending so the provider sees oldest-first context.
    pub fn read_window(&self, session_id: &str, limit: i64) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        let mut out: Vec<Message> = Vec::new();
        if limit <= 0 {
            let mut stmt = conn.prepare(
                "SELECT role, content, tool_calls, tool_results FROM messages
                 WHERE session_id = ?1 ORDER BY created_at ASC, ordinal ASC",
            )?;
            let rows = stmt.query_map(params![session_id], row_to_message)?;
            for row in rows {
                out.push(row??);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT role, content, tool_calls, tool_results FROM messages
                 WHERE session_id = ?1 ORDER BY created_at DESC, ordinal DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![session_id, limit], row_to_message)?;
            for row in rows {
                out.push(row??);
            }
            out.reverse();
        }
        Ok(out)
    }

    /// Number of messages in a session.
    pub fn message_count(&self, session_id: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Delete all messages in a session.  The session row persists.
    pub fn reset(&self, session_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )?;
        debug!(session_id, deleted = n, "session reset");
        Ok(())
    }

    /// Replace everything but the most recent [`COMPACT_RETAIN`] messages
    /// with a single system message carrying `summary`.
    ///
    /// The summary row is timestamped one hour in the past so it sorts
    /// ahead of the retained tail.  Sessions at or below the retention
    /// count are left untouched.  Lossy by design; there is no rollback.
    /// Callers must only compact across a clean turn boundary so that
    /// retained tool results keep their matching assistant tool calls.
    pub fn compact(&self, session_id: &str, summary: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        if count <= COMPACT_RETAIN as i64 {
            return Ok(());
        }

        let deleted = tx.execute(
            "DELETE FROM messages WHERE session_id = ?1 AND ordinal NOT IN (
                 SELECT ordinal FROM messages WHERE session_id = ?1
                 ORDER BY created_at DESC, ordinal DESC LIMIT ?2
             )",
            params![session_id, COMPACT_RETAIN as i64],
        )?;

        let backdated = (Utc::now() - Duration::hours(1))
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        tx.execute(
            "INSERT INTO messages (session_id, role, content, created_at)
             VALUES (?1, 'system', ?2, ?3)",
            params![session_id, summary, backdated],
        )?;
        tx.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![now_str(), session_id],
        )?;
        tx.commit()?;

        info!(session_id, deleted, retained = COMPACT_RETAIN, "session compacted");
        Ok(())
    }

    /// Delete a session and everything in it, in one transaction.
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        tx.commit()?;
        Ok(())
    }

    /// All sessions, most recently used first.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, key, created_at, updated_at FROM sessions
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_session)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Look up a session by key without creating it.
    pub fn get(&self, key: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT id, key, created_at, updated_at FROM sessions WHERE key = ?1",
                params![key],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }
}

fn now_str() -> String {
    // Fixed-width timestamps so the TEXT column compares chronologically.
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_json_opt<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    match value {
        Some(v) => Ok(Some(serde_json::to_string(v).map_err(|e| {
            StoreError::Corrupt(format!("serializing message payload: {e}"))
        })?)),
        None => Ok(None),
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let created: String = row.get(2)?;
    let updated: String = row.get(3)?;
    Ok(Session {
        id: row.get(0)?,
        key: row.get(1)?,
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Message>> {
    let role: String = row.get(0)?;
    let content: Option<String> = row.get(1)?;
    let tool_calls: Option<String> = row.get(2)?;
    let tool_results: Option<String> = row.get(3)?;
    Ok(decode_message(role, content, tool_calls, tool_results))
}

fn decode_message(
    role: String,
    content: Option<String>,
    tool_calls: Option<String>,
    tool_results: Option<String>,
) -> Result<Message> {
    let role = role
        .parse()
        .map_err(|e: String| StoreError::Corrupt(e))?;
    let tool_calls = match tool_calls {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| StoreError::Corrupt(format!("tool_calls column: {e}")))?,
        ),
        None => None,
    };
    let tool_results = match tool_results {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| StoreError::Corrupt(format!("tool_results column: {e}")))?,
        ),
        None => None,
    };
    Ok(Message {
        role,
        content,
        tool_calls,
        tool_results,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use otto_model::{Role, ToolCall, ToolResult};

    use super::*;

    fn store() -> SessionStore {
        SessionStore::open_in_memory().unwrap()
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    #[test]
    fn get_or_create_returns_same_id_for_same_key() {
        let s = store();
        let a = s.get_or_create("k1").unwrap();
        let b = s.get_or_create("k1").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn get_or_create_is_idempotent_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let s = Arc::new(SessionStore::open(&dir.path().join("t.db")).unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = Arc::clone(&s);
            handles.push(std::thread::spawn(move || {
                s.get_or_create("shared").unwrap().id
            }));
        }
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn distinct_keys_get_distinct_ids() {
        let s = store();
        let a = s.get_or_create("a").unwrap();
        let b = s.get_or_create("b").unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn list_sessions_orders_by_recent_use() {
        let s = store();
        let a = s.get_or_create("old").unwrap();
        let b = s.get_or_create("fresh").unwrap();
        s.append(&a.id, &Message::user("x")).unwrap();
        s.append(&b.id, &Message::user("y")).unwrap();
        let listed = s.list_sessions().unwrap();
        assert_eq!(listed[0].key, "fresh");
    }

    #[test]
    fn get_does_not_create() {
        let s = store();
        assert!(s.get("ghost").unwrap().is_none());
        s.get_or_create("real").unwrap();
        assert!(s.get("real").unwrap().is_some());
    }

    // ── Message ordering ──────────────────────────────────────────────────────

    #[test]
    fn read_window_returns_messages_in_append_order() {
        let s = store();
        let sess = s.get_or_create("ord").unwrap();
        for i in 0..5 {
            s.append(&sess.id, &Message::user(format!("m{i}"))).unwrap();
        }
        let msgs = s.read_window(&sess.id, 0).unwrap();
        let texts: Vec<&str> = msgs.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn read_window_truncates_to_last_n_ascending() {
        let s = store();
        let sess = s.get_or_create("win").unwrap();
        for i in 0..7 {
            s.append(&sess.id, &Message::user(format!("m{i}"))).unwrap();
        }
        let msgs = s.read_window(&sess.id, 3).unwrap();
        let texts: Vec<&str> = msgs.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["m4", "m5", "m6"]);
    }

    #[test]
    fn read_window_includes_just_appended_message() {
        let s = store();
        let sess = s.get_or_create("fresh").unwrap();
        s.append(&sess.id, &Message::user("first")).unwrap();
        s.append(&sess.id, &Message::assistant("second")).unwrap();
        let msgs = s.read_window(&sess.id, 10).unwrap();
        assert_eq!(msgs.last().unwrap().text(), "second");
    }

    // ── Payload round-trips ───────────────────────────────────────────────────

    #[test]
    fn tool_calls_round_trip_through_db() {
        let s = store();
        let sess = s.get_or_create("tc").unwrap();
        let msg = Message::assistant_with_tools(
            "checking",
            vec![ToolCall {
                id: "c1".into(),
                name: "glob".into(),
                input: serde_json::json!({"pattern": "*.go"}),
            }],
        );
        s.append(&sess.id, &msg).unwrap();
        let back = s.read_window(&sess.id, 0).unwrap();
        let calls = back[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].input["pattern"], "*.go");
    }

    #[test]
    fn tool_results_round_trip_through_db() {
        let s = store();
        let sess = s.get_or_create("tr").unwrap();
        s.append(
            &sess.id,
            &Message::tool_results(vec![ToolResult::err("c1", "boom")]),
        )
        .unwrap();
        let back = s.read_window(&sess.id, 0).unwrap();
        let results = back[0].tool_results.as_ref().unwrap();
        assert_eq!(results[0].tool_call_id, "c1");
        assert!(results[0].is_error);
    }

    // ── Reset / delete ────────────────────────────────────────────────────────

    #[test]
    fn reset_clears_messages_but_keeps_session() {
        let s = store();
        let sess = s.get_or_create("r").unwrap();
        s.append(&sess.id, &Message::user("x")).unwrap();
        s.reset(&sess.id).unwrap();
        assert_eq!(s.message_count(&sess.id).unwrap(), 0);
        assert!(s.get("r").unwrap().is_some());
    }

    #[test]
    fn delete_session_cascades_to_messages() {
        let s = store();
        let sess = s.get_or_create("d").unwrap();
        s.append(&sess.id, &Message::user("x")).unwrap();
        s.delete_session(&sess.id).unwrap();
        assert!(s.get("d").unwrap().is_none());
        assert_eq!(s.message_count(&sess.id).unwrap(), 0);
    }

    // ── Compaction ────────────────────────────────────────────────────────────

    #[test]
    fn compact_below_retention_is_a_no_op() {
        let s = store();
        let sess = s.get_or_create("small").unwrap();
        for i in 0..COMPACT_RETAIN {
            s.append(&sess.id, &Message::user(format!("m{i}"))).unwrap();
        }
        s.compact(&sess.id, "summary").unwrap();
        let msgs = s.read_window(&sess.id, 0).unwrap();
        assert_eq!(msgs.len(), COMPACT_RETAIN);
        assert!(msgs.iter().all(|m| m.role != Role::System));
    }

    #[test]
    fn compact_keeps_summary_plus_recent_tail() {
        let s = store();
        let sess = s.get_or_create("big").unwrap();
        for i in 0..15 {
            s.append(&sess.id, &Message::user(format!("m{i}"))).unwrap();
        }
        s.compact(&sess.id, "the summary").unwrap();

        let msgs = s.read_window(&sess.id, 0).unwrap();
        assert_eq!(msgs.len(), COMPACT_RETAIN + 1);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[0].text(), "the summary");
        let tail: Vec<&str> = msgs[1..].iter().map(|m| m.text()).collect();
        assert_eq!(
            tail,
            vec!["m5", "m6", "m7", "m8", "m9", "m10", "m11", "m12", "m13", "m14"]
        );
    }

    #[test]
    fn compact_summary_sorts_ahead_in_windowed_reads() {
        let s = store();
        let sess = s.get_or_create("sorted").unwrap();
        for i in 0..12 {
            s.append(&sess.id, &Message::user(format!("m{i}"))).unwrap();
        }
        s.compact(&sess.id, "sum").unwrap();
        // A window spanning the full post-compaction set starts at the summary.
        let msgs = s.read_window(&sess.id, 11).unwrap();
        assert_eq!(msgs[0].role, Role::System);
    }

    #[test]
    fn appends_after_compact_sort_after_the_tail() {
        let s = store();
        let sess = s.get_or_create("after").unwrap();
        for i in 0..12 {
            s.append(&sess.id, &Message::user(format!("m{i}"))).unwrap();
        }
        s.compact(&sess.id, "sum").unwrap();
        s.append(&sess.id, &Message::assistant("new")).unwrap();
        let msgs = s.read_window(&sess.id, 0).unwrap();
        assert_eq!(msgs.last().unwrap().text(), "new");
    }
}
