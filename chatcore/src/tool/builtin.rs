//! A couple of illustrative in-tree server tools, used to exercise the
//! pipeline in tests and the demo server. Real production tools
//! (web-search, web-fetch, sandboxed exec) are out of scope per
//! `SPEC_FULL.md` §1.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, ToolExecError};

/// Echoes its `message` argument back as the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> String {
        "Echoes the given message back.".to_string()
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "The message to echo"}
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolExecError> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolExecError::new("missing required argument: message"))?;
        Ok(serde_json::json!({ "message": message }))
    }
}

/// A tiny process-local key/value scratchpad, used to exercise dedup/reuse
/// behavior with a tool that has observable side effects.
#[derive(Default)]
pub struct ScratchpadTool {
    store: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl Tool for ScratchpadTool {
    fn name(&self) -> &str {
        "scratchpad"
    }

    fn description(&self) -> String {
        "Sets or gets a value in a per-process scratchpad.".to_string()
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "op": {"type": "string", "enum": ["get", "set"]},
                "key": {"type": "string"},
                "value": {}
            },
            "required": ["op", "key"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolExecError> {
        let op = args
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolExecError::new("missing required argument: op"))?;
        let key = args
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolExecError::new("missing required argument: key"))?;

        let mut store = self
            .store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match op {
            "set" => {
                let value = args.get("value").cloned().unwrap_or(Value::Null);
                store.insert(key.to_string(), value.clone());
                Ok(serde_json::json!({ "stored": value }))
            }
            "get" => Ok(serde_json::json!({ "value": store.get(key).cloned().unwrap_or(Value::Null) })),
            other => Err(ToolExecError::new(format!("unknown op: {other}"))),
        }
    }
}
