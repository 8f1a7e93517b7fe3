//! The Tool Execution Pipeline (`SPEC_FULL.md` §4.4): the fixed ordered
//! path every server tool call passes through — toggle check, scope-arg
//! injection, canonicalization, cache/ledger dedup lookup, execution,
//! then ledger + cache writes.

use std::sync::Arc;

use serde_json::Value;

use crate::canon::{canonical_hash, canonicalize};
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::memory::Memory;
use crate::types::{ToolCall, ToolResult, ToolStatus};

use super::cache::ToolCache;
use super::{ToolExecError, ToolRegistry};

/// Overwrite (never merge-preserve) the two scope keys, stripping any
/// snake_case alias the model may have supplied instead.
fn inject_scope(args: &Value, user_id: &str, conversation_id: &str) -> Value {
    let mut obj = match args {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    obj.remove("user_id");
    obj.remove("conversation_id");
    obj.insert("userId".to_string(), Value::String(user_id.to_string()));
    obj.insert("conversationId".to_string(), Value::String(conversation_id.to_string()));
    Value::Object(obj)
}

/// Pipeline control keys a caller may set alongside the tool's real
/// arguments: `force` (bypass cache/ledger reuse for this call) and
/// `ttlSeconds` (raise this row's ledger lifetime, capped by
/// `dedup.max_ttl_seconds`). Stripped before scope injection so neither
/// the tool nor the dedup hash ever sees them.
struct CallControl {
    force: bool,
    ttl_seconds: Option<u64>,
}

fn extract_control(args: &Value) -> (Value, CallControl) {
    let mut obj = match args {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    let force = obj.remove("force").and_then(|v| v.as_bool()).unwrap_or(false);
    let ttl_seconds = obj.remove("ttlSeconds").and_then(|v| v.as_u64());
    (Value::Object(obj), CallControl { force, ttl_seconds })
}

fn error_result(call: &ToolCall, message: impl Into<String>) -> ToolResult {
    ToolResult {
        call_id: call.id.clone(),
        name: call.name.clone(),
        reused: false,
        status: ToolStatus::Error,
        data: serde_json::json!({ "message": message.into() }),
    }
}

/// Runs server tool calls through the fixed pipeline order.
pub struct ToolExecutionPipeline {
    registry: ToolRegistry,
    cache: Arc<ToolCache>,
    memory: Arc<dyn Memory>,
}

impl ToolExecutionPipeline {
    /// Build a pipeline over a tool registry, process-local cache, and
    /// durable memory backend.
    #[must_use]
    pub fn new(registry: ToolRegistry, cache: Arc<ToolCache>, memory: Arc<dyn Memory>) -> Self {
        Self { registry, cache, memory }
    }

    /// Run one server tool call to completion, applying dedup and caching.
    pub async fn execute(
        &self,
        call: &ToolCall,
        user_id: &str,
        conversation_id: &str,
        config: &OrchestratorConfig,
    ) -> Result<ToolResult> {
        if !config.tool_enabled(&call.name) {
            return Ok(error_result(call, format!("tool \"{}\" is disabled", call.name)));
        }

        let Some(tool) = self.registry.get(&call.name) else {
            return Ok(error_result(call, format!("unknown tool: {}", call.name)));
        };

        let (raw_args, control) = extract_control(&call.arguments);
        let scoped_args = inject_scope(&raw_args, user_id, conversation_id);
        let canonical_args = canonicalize(&scoped_args, &config.dedup.ignore_args);
        let args_hash = canonical_hash(&scoped_args, &config.dedup.ignore_args);
        let ttl_seconds = control
            .ttl_seconds
            .map(|requested| requested.clamp(config.dedup.default_ttl_seconds, config.dedup.max_ttl_seconds))
            .unwrap_or(config.dedup.default_ttl_seconds);

        if config.dedup.enabled && !control.force {
            if let Some(cached) = self.cache.get(&call.name, &args_hash) {
                return Ok(ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    reused: true,
                    status: ToolStatus::Success,
                    data: cached,
                });
            }

            if let Some(row) = self
                .memory
                .ledger_lookup(user_id, conversation_id, &call.name, &args_hash)
                .await?
            {
                let data: Value = serde_json::from_str(&row.result_json).unwrap_or(Value::Null);
                self.cache.put(&call.name, &args_hash, data.clone());
                return Ok(ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    reused: true,
                    status: ToolStatus::Success,
                    data,
                });
            }
        }

        let outcome: std::result::Result<Value, ToolExecError> = tool.execute(canonical_args.clone()).await;
        let (status, data) = match &outcome {
            Ok(value) => (ToolStatus::Success, value.clone()),
            Err(err) => (ToolStatus::Error, serde_json::json!({ "message": err.to_string() })),
        };

        if config.dedup.enabled {
            let args_json = serde_json::to_string(&canonical_args).unwrap_or_default();
            let result_json = serde_json::to_string(&data).unwrap_or_default();
            self.memory
                .ledger_upsert(
                    user_id,
                    conversation_id,
                    &call.name,
                    &args_hash,
                    status,
                    &args_json,
                    &result_json,
                    ttl_seconds as i64,
                )
                .await?;
            if matches!(status, ToolStatus::Success) {
                self.cache.put(&call.name, &args_hash, data.clone());
            }
        }

        Ok(ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            reused: false,
            status,
            data,
        })
    }
}
