//! Memory & Audit (`SPEC_FULL.md` §4.6): durable conversation messages and
//! the tool execution ledger, each hash-chained per `(userId, conversationId)`
//! scope.
//!
//! This crate keeps messages and tool-ledger rows as two independent
//! hash chains sharing the same chaining rule (`hash = SHA256(prev || canonical)`).
//! `SPEC_FULL.md` §3 specifies the chaining rule identically for both row
//! kinds but does not require them to interleave into one global sequence;
//! two scope-local chains satisfy every invariant in §8 while keeping the
//! read-then-write step a single-table operation (see `DESIGN.md`).

pub mod sqlite;
pub mod verify;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::MessageRole;

pub use verify::{ChainBreak, ChainVerification};

/// Draft/final lifecycle of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageState {
    /// Provisional; written while the step is still running.
    Draft,
    /// Promoted atomically on successful step termination.
    Final,
}

/// A persisted conversation row (`SPEC_FULL.md` §3 `ConversationMessage`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Row id.
    pub id: i64,
    /// Scope.
    pub user_id: String,
    /// Scope.
    pub conversation_id: String,
    /// Message role.
    pub role: MessageRole,
    /// Plain text content.
    pub content: String,
    /// Structured payload (tool calls, tool results, etc).
    pub payload: Value,
    /// Owning step.
    pub step_id: String,
    /// Monotonic sequence number within the step.
    pub seq: i64,
    /// Draft/Final lifecycle state.
    pub state: MessageState,
    /// Creation timestamp, RFC3339.
    pub created_at: String,
    /// Previous row's hash in this scope's message chain (`""` for the first).
    pub prev_hash: String,
    /// This row's hash.
    pub hash: String,
    /// Canonical JSON of the audit payload that produced `hash`.
    pub canonical: String,
}

/// A persisted tool-ledger row (`SPEC_FULL.md` §3 `ToolExecution`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionRow {
    /// Row id.
    pub id: i64,
    /// Scope.
    pub user_id: String,
    /// Scope.
    pub conversation_id: String,
    /// Tool name.
    pub tool_name: String,
    /// SHA256 of the canonicalized arguments.
    pub args_hash: String,
    /// Outcome status.
    pub status: crate::types::ToolStatus,
    /// Canonicalized arguments as JSON text.
    pub args_json: String,
    /// Result payload as JSON text.
    pub result_json: String,
    /// Creation timestamp, RFC3339.
    pub created_at: String,
    /// Last-update timestamp, RFC3339.
    pub updated_at: String,
    /// Expiry timestamp, RFC3339.
    pub expires_at: String,
    /// Previous row's hash in this scope's tool chain.
    pub prev_hash: String,
    /// This row's hash.
    pub hash: String,
    /// Canonical JSON of the audit payload that produced `hash`.
    pub canonical: String,
}

/// Durable store for conversation messages and the tool execution ledger.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Insert-or-update a message row by its unique key
    /// `(userId, conversationId, stepId, role, seq)`, computing and storing
    /// its audit-chain hash.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<ConversationMessage>;

    /// Transition every DRAFT row for `step_id` to FINAL in one transaction.
    async fn promote_drafts_to_final(
        &self,
        user_id: &str,
        conversation_id: &str,
        step_id: &str,
    ) -> Result<()>;

    /// Most recent `limit` FINAL messages for the scope, chronological.
    async fn get_recent_final(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationMessage>>;

    /// All rows under `step_id`, regardless of state, chronological.
    async fn get_step_rows(
        &self,
        user_id: &str,
        conversation_id: &str,
        step_id: &str,
    ) -> Result<Vec<ConversationMessage>>;

    /// FINAL history plus all rows up to and including `step_id`, used for
    /// replay.
    async fn get_context_upto_step(
        &self,
        user_id: &str,
        conversation_id: &str,
        step_id: &str,
        limit: u32,
    ) -> Result<Vec<ConversationMessage>>;

    /// Reverse lookup: which step issued a given `tool_call_id`.
    async fn find_step_id_by_tool_call_id(
        &self,
        user_id: &str,
        conversation_id: &str,
        tool_call_id: &str,
    ) -> Result<Option<String>>;

    /// The next free `seq` for a step (monotonic allocator source).
    async fn find_max_seq(
        &self,
        user_id: &str,
        conversation_id: &str,
        step_id: &str,
    ) -> Result<i64>;

    /// Delete DRAFT rows older than `hours`. Invoked by a scheduled janitor.
    async fn delete_drafts_older_than_hours(&self, hours: i64) -> Result<u64>;

    /// Look up an unexpired SUCCESS ledger row for `(tool, argsHash)` in
    /// this scope.
    async fn ledger_lookup(
        &self,
        user_id: &str,
        conversation_id: &str,
        tool_name: &str,
        args_hash: &str,
    ) -> Result<Option<ToolExecutionRow>>;

    /// Insert-or-update a ledger row, computing and storing its audit-chain
    /// hash.
    #[allow(clippy::too_many_arguments)]
    async fn ledger_upsert(
        &self,
        user_id: &str,
        conversation_id: &str,
        tool_name: &str,
        args_hash: &str,
        status: crate::types::ToolStatus,
        args_json: &str,
        result_json: &str,
        ttl_seconds: i64,
    ) -> Result<ToolExecutionRow>;

    /// Verify both per-scope audit chains (messages, tool ledger).
    async fn verify_chain(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<ChainVerification>;
}
