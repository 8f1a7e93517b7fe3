//! The Decision Adapter (`SPEC_FULL.md` §4.3): invokes the model, blocking
//! or streaming, and normalizes its reply into a [`ModelDecision`].

mod fake;

pub use fake::FakeProvider;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::message::ChatMessage;
use crate::tool::ToolDefinition;
use crate::types::{ModelDecision, ToolChoice};

/// A chunk of an in-progress streaming decision.
#[derive(Debug, Clone)]
pub enum DecisionChunk {
    /// An incremental slice of assistant text.
    TextDelta(String),
    /// A tool call has been fully parsed (arguments included).
    ToolCall {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
        /// Parsed arguments.
        arguments: serde_json::Value,
    },
}

/// The request passed to a [`ChatProvider`]: assembled messages plus the
/// manifest of tools currently offered.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    /// Messages in model order, system message first.
    pub messages: Vec<ChatMessage>,
    /// The tool manifest after toggle filtering and `toolChoice` narrowing.
    pub tools: Vec<ToolDefinition>,
    /// Tool-choice policy applied when building `tools`.
    pub tool_choice: ToolChoice,
}

/// Provider boundary the Decision Adapter is built against. Concrete model
/// backends (and their HTTP clients) are out of scope for this crate; only
/// the trait and a deterministic test double live here.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Invoke the model and wait for the complete response.
    async fn decide_blocking(&self, request: &DecisionRequest) -> Result<ModelDecision>;

    /// Invoke the model and stream incremental chunks. Implementations that
    /// cannot stream should fall back to issuing the whole decision as a
    /// single chunk sequence ending in the parsed tool calls.
    async fn decide_streaming(
        &self,
        request: &DecisionRequest,
    ) -> Result<BoxStream<'static, Result<DecisionChunk>>>;

    /// Name used for logging/instrumentation.
    fn provider_name(&self) -> &'static str;
}
