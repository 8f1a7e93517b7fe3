//! SQLite-backed [`Memory`] implementation (`SPEC_FULL.md` §4.6, §9).
//!
//! Mirrors the teacher's `Arc<Mutex<Connection>>` + `spawn_blocking`
//! bridging idiom: `rusqlite::Connection` is not `Send` across `.await`
//! points, so every query runs inside a blocking closure dispatched through
//! [`tokio::task::spawn_blocking`]. `path = ":memory:"` shares this exact
//! query path, so `getContext` is faithful for in-memory deployments by
//! construction.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use crate::canon::{canonical_json, chain_hash};
use crate::error::{OrchestratorError, Result};
use crate::message::MessageRole;
use crate::types::ToolStatus;

use super::verify::{verify_rows, AuditRow, ChainVerification};
use super::{ConversationMessage, Memory, MessageState, ToolExecutionRow};

/// SQLite-backed store for conversation messages and the tool ledger.
pub struct SqliteMemory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMemory {
    /// Open (or create) the database at `path`. Use `":memory:"` for an
    /// ephemeral, process-local store.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        if path != ":memory:" {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            f(&guard)
        })
        .await
        .map_err(|e| OrchestratorError::storage(format!("blocking task panicked: {e}")))?
        .map_err(OrchestratorError::from)
    }
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            step_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            payload TEXT NOT NULL,
            seq INTEGER NOT NULL,
            state TEXT NOT NULL,
            tool_call_id TEXT,
            created_at TEXT NOT NULL,
            prev_hash TEXT NOT NULL,
            hash TEXT NOT NULL,
            canonical TEXT NOT NULL,
            UNIQUE(user_id, conversation_id, step_id, role, seq)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_scope_final
            ON messages(user_id, conversation_id, state, created_at, seq, id);
        CREATE INDEX IF NOT EXISTS idx_messages_step
            ON messages(user_id, conversation_id, step_id, created_at, seq, id);
        CREATE INDEX IF NOT EXISTS idx_messages_tool_call_id
            ON messages(user_id, conversation_id, tool_call_id);

        CREATE TABLE IF NOT EXISTS tool_executions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            args_hash TEXT NOT NULL,
            status TEXT NOT NULL,
            args_json TEXT NOT NULL,
            result_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            prev_hash TEXT NOT NULL,
            hash TEXT NOT NULL,
            canonical TEXT NOT NULL,
            UNIQUE(user_id, conversation_id, tool_name, args_hash, status)
        );
        CREATE INDEX IF NOT EXISTS idx_tool_executions_lookup
            ON tool_executions(user_id, conversation_id, tool_name, args_hash, status);
        CREATE INDEX IF NOT EXISTS idx_tool_executions_scope
            ON tool_executions(user_id, conversation_id, created_at, id);
        ",
    )
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ConversationMessage> {
    let role: String = row.get("role")?;
    let state: String = row.get("state")?;
    let payload_text: String = row.get("payload")?;
    Ok(ConversationMessage {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        conversation_id: row.get("conversation_id")?,
        role: match role.as_str() {
            "system" => MessageRole::System,
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::Tool,
        },
        content: row.get("content")?,
        payload: serde_json::from_str(&payload_text).unwrap_or(Value::Null),
        step_id: row.get("step_id")?,
        seq: row.get("seq")?,
        state: if state == "FINAL" {
            MessageState::Final
        } else {
            MessageState::Draft
        },
        created_at: row.get("created_at")?,
        prev_hash: row.get("prev_hash")?,
        hash: row.get("hash")?,
        canonical: row.get("canonical")?,
    })
}

fn row_to_ledger(row: &Row<'_>) -> rusqlite::Result<ToolExecutionRow> {
    let status: String = row.get("status")?;
    Ok(ToolExecutionRow {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        conversation_id: row.get("conversation_id")?,
        tool_name: row.get("tool_name")?,
        args_hash: row.get("args_hash")?,
        status: if status == "SUCCESS" {
            ToolStatus::Success
        } else {
            ToolStatus::Error
        },
        args_json: row.get("args_json")?,
        result_json: row.get("result_json")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        expires_at: row.get("expires_at")?,
        prev_hash: row.get("prev_hash")?,
        hash: row.get("hash")?,
        canonical: row.get("canonical")?,
    })
}

/// Canonical payload that a message row's hash is derived from. `state` is
/// deliberately excluded so promoting DRAFT -> FINAL never has to rehash.
fn message_canonical(role: MessageRole, content: &str, payload: &Value, step_id: &str, seq: i64) -> String {
    canonical_json(
        &serde_json::json!({
            "role": role.as_str(),
            "content": content,
            "payload": payload,
            "stepId": step_id,
            "seq": seq,
        }),
        &[],
    )
}

fn ledger_canonical(tool_name: &str, args_hash: &str, status: ToolStatus, args_json: &str, result_json: &str) -> String {
    canonical_json(
        &serde_json::json!({
            "toolName": tool_name,
            "argsHash": args_hash,
            "status": status,
            "args": serde_json::from_str::<Value>(args_json).unwrap_or(Value::Null),
            "result": serde_json::from_str::<Value>(result_json).unwrap_or(Value::Null),
        }),
        &[],
    )
}

#[async_trait::async_trait]
impl Memory for SqliteMemory {
    async fn upsert_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        step_id: &str,
        role: MessageRole,
        content: &str,
        payload: Value,
        seq: i64,
        state: MessageState,
    ) -> Result<ConversationMessage> {
        let user_id = user_id.to_string();
        let conversation_id = conversation_id.to_string();
        let step_id = step_id.to_string();
        let content = content.to_string();
        let role_str = role.as_str();
        let state_str = if matches!(state, MessageState::Final) { "FINAL" } else { "DRAFT" };
        let tool_call_id = if matches!(role, MessageRole::Tool) {
            payload.get("tool_call_id").and_then(Value::as_str).map(str::to_string)
        } else {
            None
        };

        self.with_conn(move |conn| {
            let existing: Option<(i64, String)> = conn
                .query_row(
                    "SELECT id, prev_hash FROM messages
                     WHERE user_id = ?1 AND conversation_id = ?2 AND step_id = ?3 AND role = ?4 AND seq = ?5",
                    params![user_id, conversation_id, step_id, role_str, seq],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

            let canonical = message_canonical(role, &content, &payload, &step_id, seq);
            let payload_text = serde_json::to_string(&payload).unwrap_or_default();

            let id = if let Some((id, prev_hash)) = existing {
                let hash = chain_hash(&prev_hash, &canonical);
                conn.execute(
                    "UPDATE messages SET content = ?1, payload = ?2, state = ?3, tool_call_id = ?4,
                         canonical = ?5, hash = ?6
                     WHERE id = ?7",
                    params![content, payload_text, state_str, tool_call_id, canonical, hash, id],
                )?;
                id
            } else {
                let prev_hash: String = conn
                    .query_row(
                        "SELECT hash FROM messages WHERE user_id = ?1 AND conversation_id = ?2
                         ORDER BY created_at DESC, seq DESC, id DESC LIMIT 1",
                        params![user_id, conversation_id],
                        |r| r.get(0),
                    )
                    .optional()?
                    .unwrap_or_default();
                let hash = chain_hash(&prev_hash, &canonical);
                let created_at = Utc::now().to_rfc3339();
                conn.execute(
                    "INSERT INTO messages
                        (user_id, conversation_id, step_id, role, content, payload, seq, state,
                         tool_call_id, created_at, prev_hash, hash, canonical)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        user_id, conversation_id, step_id, role_str, content, payload_text, seq,
                        state_str, tool_call_id, created_at, prev_hash, hash, canonical
                    ],
                )?;
                conn.last_insert_rowid()
            };

            conn.query_row("SELECT * FROM messages WHERE id = ?1", params![id], row_to_message)
        })
        .await
    }

    async fn promote_drafts_to_final(&self, user_id: &str, conversation_id: &str, step_id: &str) -> Result<()> {
        let user_id = user_id.to_string();
        let conversation_id = conversation_id.to_string();
        let step_id = step_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE messages SET state = 'FINAL'
                 WHERE user_id = ?1 AND conversation_id = ?2 AND step_id = ?3 AND state = 'DRAFT'",
                params![user_id, conversation_id, step_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_recent_final(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationMessage>> {
        let user_id = user_id.to_string();
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM messages WHERE user_id = ?1 AND conversation_id = ?2 AND state = 'FINAL'
                 ORDER BY created_at DESC, seq DESC, id DESC LIMIT ?3",
            )?;
            let mut rows: Vec<ConversationMessage> = stmt
                .query_map(params![user_id, conversation_id, limit], row_to_message)?
                .collect::<rusqlite::Result<_>>()?;
            rows.reverse();
            Ok(rows)
        })
        .await
    }

    async fn get_step_rows(
        &self,
        user_id: &str,
        conversation_id: &str,
        step_id: &str,
    ) -> Result<Vec<ConversationMessage>> {
        let user_id = user_id.to_string();
        let conversation_id = conversation_id.to_string();
        let step_id = step_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM messages WHERE user_id = ?1 AND conversation_id = ?2 AND step_id = ?3
                 ORDER BY created_at ASC, seq ASC, id ASC",
            )?;
            stmt.query_map(params![user_id, conversation_id, step_id], row_to_message)?
                .collect::<rusqlite::Result<_>>()
        })
        .await
    }

    async fn get_context_upto_step(
        &self,
        user_id: &str,
        conversation_id: &str,
        step_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationMessage>> {
        let user_id2 = user_id.to_string();
        let conversation_id2 = conversation_id.to_string();
        let step_id2 = step_id.to_string();
        let mut history = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM messages
                     WHERE user_id = ?1 AND conversation_id = ?2 AND state = 'FINAL' AND step_id != ?3
                     ORDER BY created_at DESC, seq DESC, id DESC LIMIT ?4",
                )?;
                let mut rows: Vec<ConversationMessage> = stmt
                    .query_map(params![user_id2, conversation_id2, step_id2, limit], row_to_message)?
                    .collect::<rusqlite::Result<_>>()?;
                rows.reverse();
                Ok(rows)
            })
            .await?;
        history.extend(self.get_step_rows(user_id, conversation_id, step_id).await?);
        Ok(history)
    }

    async fn find_step_id_by_tool_call_id(
        &self,
        user_id: &str,
        conversation_id: &str,
        tool_call_id: &str,
    ) -> Result<Option<String>> {
        let user_id = user_id.to_string();
        let conversation_id = conversation_id.to_string();
        let tool_call_id = tool_call_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT step_id FROM messages WHERE user_id = ?1 AND conversation_id = ?2 AND tool_call_id = ?3
                 ORDER BY created_at DESC, seq DESC, id DESC LIMIT 1",
                params![user_id, conversation_id, tool_call_id],
                |r| r.get(0),
            )
            .optional()
        })
        .await
    }

    async fn find_max_seq(&self, user_id: &str, conversation_id: &str, step_id: &str) -> Result<i64> {
        let user_id = user_id.to_string();
        let conversation_id = conversation_id.to_string();
        let step_id = step_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(seq), -1) FROM messages
                 WHERE user_id = ?1 AND conversation_id = ?2 AND step_id = ?3",
                params![user_id, conversation_id, step_id],
                |r| r.get(0),
            )
        })
        .await
    }

    async fn delete_drafts_older_than_hours(&self, hours: i64) -> Result<u64> {
        let cutoff = (Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        self.with_conn(move |conn| {
            let affected = conn.execute(
                "DELETE FROM messages WHERE state = 'DRAFT' AND created_at < ?1",
                params![cutoff],
            )?;
            Ok(affected as u64)
        })
        .await
    }

    async fn ledger_lookup(
        &self,
        user_id: &str,
        conversation_id: &str,
        tool_name: &str,
        args_hash: &str,
    ) -> Result<Option<ToolExecutionRow>> {
        let user_id = user_id.to_string();
        let conversation_id = conversation_id.to_string();
        let tool_name = tool_name.to_string();
        let args_hash = args_hash.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM tool_executions
                 WHERE user_id = ?1 AND conversation_id = ?2 AND tool_name = ?3 AND args_hash = ?4
                   AND status = 'SUCCESS' AND expires_at > ?5
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![user_id, conversation_id, tool_name, args_hash, now],
                row_to_ledger,
            )
            .optional()
        })
        .await
    }

    async fn ledger_upsert(
        &self,
        user_id: &str,
        conversation_id: &str,
        tool_name: &str,
        args_hash: &str,
        status: ToolStatus,
        args_json: &str,
        result_json: &str,
        ttl_seconds: i64,
    ) -> Result<ToolExecutionRow> {
        let user_id = user_id.to_string();
        let conversation_id = conversation_id.to_string();
        let tool_name = tool_name.to_string();
        let args_hash = args_hash.to_string();
        let status_str = if matches!(status, ToolStatus::Success) { "SUCCESS" } else { "ERROR" };
        let args_json = args_json.to_string();
        let result_json = result_json.to_string();

        self.with_conn(move |conn| {
            let existing: Option<(i64, String)> = conn
                .query_row(
                    "SELECT id, prev_hash FROM tool_executions
                     WHERE user_id = ?1 AND conversation_id = ?2 AND tool_name = ?3 AND args_hash = ?4 AND status = ?5",
                    params![user_id, conversation_id, tool_name, args_hash, status_str],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

            let canonical = ledger_canonical(&tool_name, &args_hash, status, &args_json, &result_json);
            let now = Utc::now();
            let now_text = now.to_rfc3339();
            let expires_at = (now + chrono::Duration::seconds(ttl_seconds)).to_rfc3339();

            let id = if let Some((id, prev_hash)) = existing {
                let hash = chain_hash(&prev_hash, &canonical);
                conn.execute(
                    "UPDATE tool_executions SET result_json = ?1, updated_at = ?2, expires_at = ?3,
                         canonical = ?4, hash = ?5
                     WHERE id = ?6",
                    params![result_json, now_text, expires_at, canonical, hash, id],
                )?;
                id
            } else {
                let prev_hash: String = conn
                    .query_row(
                        "SELECT hash FROM tool_executions WHERE user_id = ?1 AND conversation_id = ?2
                         ORDER BY created_at DESC, id DESC LIMIT 1",
                        params![user_id, conversation_id],
                        |r| r.get(0),
                    )
                    .optional()?
                    .unwrap_or_default();
                let hash = chain_hash(&prev_hash, &canonical);
                conn.execute(
                    "INSERT INTO tool_executions
                        (user_id, conversation_id, tool_name, args_hash, status, args_json, result_json,
                         created_at, updated_at, expires_at, prev_hash, hash, canonical)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        user_id, conversation_id, tool_name, args_hash, status_str, args_json, result_json,
                        now_text, now_text, expires_at, prev_hash, hash, canonical
                    ],
                )?;
                conn.last_insert_rowid()
            };

            conn.query_row("SELECT * FROM tool_executions WHERE id = ?1", params![id], row_to_ledger)
        })
        .await
    }

    async fn verify_chain(&self, user_id: &str, conversation_id: &str) -> Result<ChainVerification> {
        let user_id = user_id.to_string();
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut msg_stmt = conn.prepare(
                "SELECT * FROM messages WHERE user_id = ?1 AND conversation_id = ?2
                 ORDER BY created_at ASC, seq ASC, id ASC",
            )?;
            let messages: Vec<ConversationMessage> = msg_stmt
                .query_map(params![user_id, conversation_id], row_to_message)?
                .collect::<rusqlite::Result<_>>()?;

            let mut ledger_stmt = conn.prepare(
                "SELECT * FROM tool_executions WHERE user_id = ?1 AND conversation_id = ?2
                 ORDER BY created_at ASC, id ASC",
            )?;
            let ledger: Vec<ToolExecutionRow> = ledger_stmt
                .query_map(params![user_id, conversation_id], row_to_ledger)?
                .collect::<rusqlite::Result<_>>()?;

            let message_rows: Vec<AuditRow> = messages
                .iter()
                .map(|m| AuditRow {
                    id: m.id,
                    prev_hash: m.prev_hash.clone(),
                    hash: m.hash.clone(),
                    canonical: m.canonical.clone(),
                })
                .collect();
            let ledger_rows: Vec<AuditRow> = ledger
                .iter()
                .map(|t| AuditRow {
                    id: t.id,
                    prev_hash: t.prev_hash.clone(),
                    hash: t.hash.clone(),
                    canonical: t.canonical.clone(),
                })
                .collect();

            Ok(ChainVerification {
                messages: verify_rows(&message_rows),
                tool_ledger: verify_rows(&ledger_rows),
            })
        })
        .await
    }
}
