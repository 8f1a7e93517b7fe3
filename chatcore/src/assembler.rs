//! The Context Assembler (`SPEC_FULL.md` §4.3, §4.7's sibling on the model
//! side): turns durable history plus the current step's in-flight rows into
//! the message list handed to the Decision Adapter, and fingerprints the
//! result as `contextHash`.

use crate::canon::canonical_hash;
use crate::config::{OrchestratorConfig, ToolContextRenderMode};
use crate::error::Result;
use crate::memory::{ConversationMessage, Memory};
use crate::message::{ChatMessage, ChatMessageToolCall, MessageRole};

/// Builds the model-facing message list and its fingerprint for one step.
pub struct ContextAssembler<'a> {
    memory: &'a dyn Memory,
}

impl<'a> ContextAssembler<'a> {
    /// Build an assembler over a memory backend.
    #[must_use]
    pub fn new(memory: &'a dyn Memory) -> Self {
        Self { memory }
    }

    /// Load history, render it per `config.tool_context_render_mode`, and
    /// prepend `system_prompt`. Returns the rendered messages and a SHA256
    /// fingerprint (`contextHash`) of their canonical form.
    pub async fn assemble(
        &self,
        user_id: &str,
        conversation_id: &str,
        step_id: &str,
        system_prompt: &str,
        config: &OrchestratorConfig,
    ) -> Result<(Vec<ChatMessage>, String)> {
        let rows = self
            .memory
            .get_context_upto_step(user_id, conversation_id, step_id, config.memory_max_messages)
            .await?;

        let mut messages = vec![ChatMessage::system(system_prompt)];
        for row in &rows {
            let is_current_step = row.step_id == step_id;
            messages.push(render_row(row, is_current_step, config.tool_context_render_mode));
        }

        let fingerprint_source: Vec<String> = messages
            .iter()
            .map(|m| serde_json::to_string(m).unwrap_or_default())
            .collect();
        let context_hash = canonical_hash(&serde_json::json!({ "messages": fingerprint_source }), &[]);

        Ok((messages, context_hash))
    }
}

fn render_row(row: &ConversationMessage, is_current_step: bool, mode: ToolContextRenderMode) -> ChatMessage {
    match row.role {
        MessageRole::System => ChatMessage::system(row.content.clone()),
        MessageRole::User => ChatMessage::user(row.content.clone()),
        MessageRole::Assistant => {
            if let Some(calls) = row.payload.get("tool_calls").and_then(|v| v.as_array()) {
                if !calls.is_empty() {
                    let tool_calls = calls
                        .iter()
                        .filter_map(|c| {
                            let id = c.get("id")?.as_str()?.to_string();
                            let name = c.get("name")?.as_str()?.to_string();
                            let arguments = c.get("arguments").cloned().unwrap_or(serde_json::Value::Null);
                            Some(ChatMessageToolCall::new(id, name, arguments))
                        })
                        .collect();
                    let content = if row.content.is_empty() { None } else { Some(row.content.clone()) };
                    return ChatMessage::assistant_with_tool_calls(content, tool_calls);
                }
            }
            ChatMessage::assistant(row.content.clone())
        }
        MessageRole::Tool => {
            let tool_call_id = row
                .payload
                .get("tool_call_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let summarize = match mode {
                ToolContextRenderMode::AllTool => false,
                ToolContextRenderMode::AllSummary => true,
                ToolContextRenderMode::CurrentToolHistorySummary => !is_current_step,
            };
            let content = if summarize {
                summarize_tool_frame(&row.content)
            } else {
                row.content.clone()
            };
            ChatMessage::tool_result(tool_call_id, content)
        }
    }
}

/// Collapse a tool-result frame to a short summary for historical rendering.
fn summarize_tool_frame(content: &str) -> String {
    const MAX_CHARS: usize = 200;
    if content.chars().count() <= MAX_CHARS {
        return content.to_string();
    }
    let truncated: String = content.chars().take(MAX_CHARS).collect();
    format!("{truncated}… (truncated)")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::sqlite::SqliteMemory;
    use crate::memory::MessageState;
    use serde_json::json;

    async fn seeded_memory() -> SqliteMemory {
        let memory = SqliteMemory::open(":memory:").unwrap();
        memory
            .upsert_message("u1", "c1", "s0", MessageRole::User, "hello", serde_json::Value::Null, 0, MessageState::Draft)
            .await
            .unwrap();
        memory
            .upsert_message("u1", "c1", "s0", MessageRole::Assistant, "hi there", serde_json::Value::Null, 1, MessageState::Draft)
            .await
            .unwrap();
        memory.promote_drafts_to_final("u1", "c1", "s0").await.unwrap();
        memory
    }

    #[tokio::test]
    async fn assemble_prepends_system_prompt_and_includes_history() {
        let memory = seeded_memory().await;
        let assembler = ContextAssembler::new(&memory);
        let config = OrchestratorConfig::default();
        let (messages, hash) = assembler
            .assemble("u1", "c1", "s1", "You are helpful.", &config)
            .await
            .unwrap();
        assert!(matches!(messages[0].role, MessageRole::System));
        assert_eq!(messages.len(), 3);
        assert!(!hash.is_empty());
    }

    #[tokio::test]
    async fn current_step_tool_frames_render_in_full_under_default_mode() {
        let memory = seeded_memory().await;
        memory
            .upsert_message(
                "u1",
                "c1",
                "s1",
                MessageRole::Tool,
                &"x".repeat(500),
                json!({"tool_call_id": "t1"}),
                0,
                MessageState::Draft,
            )
            .await
            .unwrap();
        let assembler = ContextAssembler::new(&memory);
        let config = OrchestratorConfig::default();
        let (messages, _) = assembler.assemble("u1", "c1", "s1", "sys", &config).await.unwrap();
        let tool_message = messages.last().unwrap();
        assert_eq!(tool_message.content.as_ref().unwrap().len(), 500);
    }

    #[tokio::test]
    async fn historical_tool_frames_summarize_under_default_mode() {
        let memory = seeded_memory().await;
        memory
            .upsert_message(
                "u1",
                "c1",
                "s0",
                MessageRole::Tool,
                &"x".repeat(500),
                json!({"tool_call_id": "t1"}),
                2,
                MessageState::Draft,
            )
            .await
            .unwrap();
        memory.promote_drafts_to_final("u1", "c1", "s0").await.unwrap();

        let assembler = ContextAssembler::new(&memory);
        let config = OrchestratorConfig::default();
        let (messages, _) = assembler.assemble("u1", "c1", "s1", "sys", &config).await.unwrap();
        let tool_message = messages.iter().find(|m| matches!(m.role, MessageRole::Tool)).unwrap();
        assert!(tool_message.content.as_ref().unwrap().contains("truncated"));
    }

    #[tokio::test]
    async fn same_history_yields_the_same_context_hash() {
        let memory = seeded_memory().await;
        let assembler = ContextAssembler::new(&memory);
        let config = OrchestratorConfig::default();
        let (_, hash1) = assembler.assemble("u1", "c1", "s1", "sys", &config).await.unwrap();
        let (_, hash2) = assembler.assemble("u1", "c1", "s1", "sys", &config).await.unwrap();
        assert_eq!(hash1, hash2);
    }
}
