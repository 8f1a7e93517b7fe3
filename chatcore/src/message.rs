//! Message types exchanged between the orchestration core and the model.
//!
//! These mirror the shape of a typical chat-completion API: a role, text
//! content, and optional tool-call metadata attached to assistant turns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message providing instructions.
    System,
    /// User message.
    User,
    /// Assistant (model) message, possibly carrying tool calls.
    Assistant,
    /// Tool execution result fed back to the model.
    Tool,
}

impl MessageRole {
    /// String form used in persisted rows and audit payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool call emitted by the model inside an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Name of the function to call.
    pub name: String,
    /// Arguments, as a JSON object (already parsed, not a raw string).
    pub arguments: Value,
}

/// A single tool call as attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageToolCall {
    /// Unique identifier for the call, scoped to the step.
    pub id: String,
    /// The function invocation.
    pub function: ToolCallFunction,
}

impl ChatMessageToolCall {
    /// Build a new tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            function: ToolCallFunction {
                name: name.into(),
                arguments,
            },
        }
    }
}

/// A single chat message as sent to, or produced by, the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: MessageRole,
    /// Plain text content, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls made by the model (assistant messages only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatMessageToolCall>>,
    /// Tool call id this message answers (tool messages only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Build a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Build an assistant message with plain text only.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Build an assistant message carrying tool calls (content optional).
    #[must_use]
    pub fn assistant_with_tool_calls(
        content: Option<String>,
        tool_calls: Vec<ChatMessageToolCall>,
    ) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Build a tool-result message answering a prior tool call.
    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// True if this message carries one or more tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn role_as_str() {
        assert_eq!(MessageRole::System.as_str(), "system");
        assert_eq!(MessageRole::Tool.as_str(), "tool");
    }

    #[test]
    fn assistant_with_tool_calls_carries_no_bare_text_requirement() {
        let msg = ChatMessage::assistant_with_tool_calls(
            None,
            vec![ChatMessageToolCall::new("t1", "web_search", serde_json::json!({"q": "cats"}))],
        );
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls.unwrap()[0].function.name, "web_search");
    }

    #[test]
    fn tool_result_carries_call_id() {
        let msg = ChatMessage::tool_result("t1", "{\"ok\":true}");
        assert_eq!(msg.tool_call_id.as_deref(), Some("t1"));
    }
}
