//! Core value types shared across the orchestration core (`SPEC_FULL.md` §3).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a tool call must be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecTarget {
    /// Executed in-process by the Tool Execution Pipeline.
    Server,
    /// Executed by the caller; the loop suspends until a result is reported.
    Client,
}

/// A single tool call the model requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier within the step.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Free-form argument map.
    pub arguments: Value,
    /// Whether this call targets the server pipeline or the caller.
    pub exec_target: ExecTarget,
}

/// Status of a completed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ToolStatus {
    /// The tool executed (or was reused) successfully.
    Success,
    /// The tool failed, was disabled, or the caller reported an error.
    Error,
}

/// The outcome of executing (or reusing) a single tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The originating [`ToolCall::id`].
    pub call_id: String,
    /// Tool name.
    pub name: String,
    /// `true` iff served from the dedup ledger rather than re-executed.
    pub reused: bool,
    /// Outcome status.
    pub status: ToolStatus,
    /// Result payload, or `{"message": ...}` on error.
    pub data: Value,
}

/// Why a model call should be restricted before assembly (`SPEC_FULL.md`
/// §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The full allowed set is offered.
    Auto,
    /// No tools are offered.
    None,
    /// Exactly one named function is offered.
    Forced(String),
}

impl Default for ToolChoice {
    fn default() -> Self {
        Self::Auto
    }
}

/// Why a step stopped progressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    /// Terminal: the step produced a final answer.
    Done,
    /// Non-terminal: suspended awaiting client tool results.
    WaitClient,
    /// Terminal: an unrecoverable orchestration error occurred.
    Error,
    /// Terminal: the caller cancelled or disconnected.
    Cancelled,
}

impl FinishReason {
    /// Terminal reasons are `DONE`, `ERROR`, `CANCELLED`; `WAIT_CLIENT` is
    /// not terminal (`SPEC_FULL.md` §3 invariants).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::WaitClient)
    }
}

/// An OpenAI-style client-declared function the caller may execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientToolDeclaration {
    /// Function name.
    pub name: String,
    /// Optional human description.
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema of the function's parameters.
    #[serde(default)]
    pub parameters: Value,
}

/// One entry of an incoming resume request's `clientResults`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientToolResult {
    /// The id this answers; MUST be a previously-issued client call id.
    pub tool_call_id: String,
    /// Tool name (for audit readability; not re-validated against the id).
    pub name: String,
    /// Caller-reported outcome.
    pub status: ClientResultStatus,
    /// Result payload.
    #[serde(default)]
    pub payload: Value,
    /// Original arguments, echoed back for the audit trail.
    #[serde(default)]
    pub args: Value,
}

/// Caller-reported status for a client tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientResultStatus {
    /// The client-side tool succeeded.
    Ok,
    /// The client-side tool failed.
    Error,
}

/// The inbound orchestration request (Stage A body, `SPEC_FULL.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Scope: user id.
    pub user_id: String,
    /// Scope: conversation id.
    pub conversation_id: String,
    /// The user's turn text, for a fresh step.
    #[serde(default)]
    pub q: Option<String>,
    /// Set to resume an existing `WAIT_CLIENT` step.
    #[serde(default)]
    pub resume_step_id: Option<String>,
    /// Tool-choice policy for this step.
    #[serde(default)]
    pub tool_choice: ToolChoice,
    /// Tools the caller declares it can execute client-side.
    #[serde(default)]
    pub client_tools: Vec<ClientToolDeclaration>,
    /// Results for previously-issued client calls, on resume.
    #[serde(default)]
    pub client_results: Vec<ClientToolResult>,
}

/// The decision produced by one call to the Decision Adapter.
#[derive(Debug, Clone, Default)]
pub struct ModelDecision {
    /// Assistant draft text, if any.
    pub assistant_draft: Option<String>,
    /// Tool calls requested by the model, in the order returned.
    pub tool_calls: Vec<ToolCall>,
}

impl ModelDecision {
    /// True if the model produced neither text nor tool calls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assistant_draft.is_none() && self.tool_calls.is_empty()
    }
}

/// Per-step in-flight state (`SPEC_FULL.md` §3).
#[derive(Debug, Clone)]
pub struct StepState {
    /// Globally unique step identifier.
    pub step_id: String,
    /// Owning scope.
    pub user_id: String,
    /// Owning scope.
    pub conversation_id: String,
    /// Current iteration counter, incremented each pass of the loop.
    pub loop_count: u32,
    /// Server tool calls still awaiting execution this iteration.
    pub pending_server_calls: Vec<ToolCall>,
    /// Fingerprint of the assembled context for this iteration.
    pub context_hash: Option<String>,
    /// `toolName::canonicalArgs` keys already executed in this step.
    pub executed_keys: HashSet<String>,
    /// Terminal/non-terminal status; `None` while still running.
    pub finish_reason: Option<FinishReason>,
}

impl StepState {
    /// Create a fresh, zero-loop state for a new step.
    #[must_use]
    pub fn new(step_id: impl Into<String>, user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            loop_count: 0,
            pending_server_calls: Vec::new(),
            context_hash: None,
            executed_keys: HashSet::new(),
            finish_reason: None,
        }
    }
}

/// A line-stream / hub event kind (`data.type` in `SPEC_FULL.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepEventData {
    /// A (possibly incremental) assistant message chunk.
    Message {
        /// Text delta or full text.
        text: String,
    },
    /// A completed server tool execution.
    Tool {
        /// Tool name.
        name: String,
        /// The originating call id.
        tool_call_id: String,
        /// Served from the dedup ledger.
        reused: bool,
        /// Outcome status.
        status: ToolStatus,
        /// Canonicalized arguments used for execution.
        args: Value,
        /// Result payload.
        data: Value,
    },
    /// One or more client tool calls the caller must execute, then resume.
    ClientCalls {
        /// The step awaiting resumption.
        step_id: String,
        /// The calls issued.
        calls: Vec<ToolCall>,
    },
}

/// The top-level event envelope emitted on Stage A and Stage B.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    /// Exactly one per step, emitted first.
    Started {
        /// ISO8601 timestamp.
        ts: String,
        /// Event payload.
        data: StartedData,
    },
    /// Zero or more per step.
    Step {
        /// ISO8601 timestamp.
        ts: String,
        /// Event payload.
        data: StepEventData,
    },
    /// Terminal: the step reached `DONE`.
    Finished {
        /// ISO8601 timestamp.
        ts: String,
        /// Event payload.
        data: FinishedData,
    },
    /// Terminal: the step reached `ERROR`.
    Error {
        /// ISO8601 timestamp.
        ts: String,
        /// Event payload.
        data: ErrorData,
    },
}

/// Payload of a `started` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedData {
    /// The step id.
    pub step_id: String,
    /// The loop iteration at start (0 for a fresh step).
    pub loop_count: u32,
}

/// Payload of a `finished` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedData {
    /// The step id.
    pub step_id: String,
    /// The final loop iteration count.
    pub loop_count: u32,
}

/// Payload of an `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    /// The step id.
    pub step_id: String,
    /// The loop iteration at failure.
    pub loop_count: u32,
    /// Human-readable message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_terminality() {
        assert!(FinishReason::Done.is_terminal());
        assert!(FinishReason::Error.is_terminal());
        assert!(FinishReason::Cancelled.is_terminal());
        assert!(!FinishReason::WaitClient.is_terminal());
    }

    #[test]
    fn fresh_step_state_has_zero_loop_and_no_finish() {
        let state = StepState::new("s1", "u1", "c1");
        assert_eq!(state.loop_count, 0);
        assert!(state.finish_reason.is_none());
        assert!(state.executed_keys.is_empty());
    }

    #[test]
    fn empty_decision_has_no_draft_or_calls() {
        let decision = ModelDecision::default();
        assert!(decision.is_empty());
    }
}
