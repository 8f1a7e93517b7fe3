//! The server-tool capability and registry (`SPEC_FULL.md` §4.4, §9).

pub mod builtin;
pub mod cache;
pub mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// A named, description-carrying declaration of a tool's shape, offered to
/// the Decision Adapter as part of the model's tool manifest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    /// Tool name, unique within a registry.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON schema of the tool's parameters.
    pub parameters: Value,
}

/// Error produced by a failing tool execution. Always converted into a
/// `ToolResult(status=ERROR)` by the pipeline; never propagated as a crate
/// [`crate::error::OrchestratorError`].
#[derive(Debug, Clone)]
pub struct ToolExecError {
    /// Human-readable explanation, placed into `ToolResult.data.message`.
    pub message: String,
}

impl ToolExecError {
    /// Build a new execution error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ToolExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ToolExecError {}

/// A server-executable tool capability: `{name(), schema(), execute(args)}`
/// (`SPEC_FULL.md` §9 "Dynamic dispatch").
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, unique within a registry.
    fn name(&self) -> &str;

    /// Human-readable description for the manifest.
    fn description(&self) -> String;

    /// JSON schema of the tool's parameters.
    fn schema(&self) -> Value;

    /// Run the tool against already scope-injected, canonicalization-ready
    /// arguments.
    async fn execute(&self, args: Value) -> Result<Value, ToolExecError>;

    /// The manifest entry for this tool.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description(),
            parameters: self.schema(),
        }
    }
}

/// A stub registered for every caller-declared client tool. Its `execute`
/// always fails: client tools are never invoked server-side, because the
/// loop classifies them as CLIENT and suspends before the pipeline runs.
pub struct ClientToolStub {
    name: String,
    description: String,
    schema: Value,
}

impl ClientToolStub {
    /// Build a stub for a client-declared function.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
        }
    }
}

#[async_trait]
impl Tool for ClientToolStub {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, _args: Value) -> Result<Value, ToolExecError> {
        Err(ToolExecError::new(
            "client-declared tools are never executed server-side",
        ))
    }
}

/// A name -> implementation map. Tools register once at startup; the
/// pipeline looks calls up by name on every server tool call.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look a tool up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// True if a server tool of this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Definitions for every registered server tool.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use builtin::EchoTool;

    #[test]
    fn registry_round_trips_a_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.contains("echo"));
        assert!(registry.get("echo").is_some());
        assert_eq!(registry.definitions().len(), 1);
    }

    #[tokio::test]
    async fn client_stub_always_errors() {
        let stub = ClientToolStub::new("open_url", "opens a url client-side", serde_json::json!({}));
        let err = stub.execute(serde_json::json!({})).await.unwrap_err();
        assert!(err.message.contains("never executed"));
    }
}
