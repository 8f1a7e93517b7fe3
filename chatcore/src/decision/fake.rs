//! A deterministic, scripted [`ChatProvider`] used by tests and the demo
//! server binary. Each call consumes the next scripted [`ModelDecision`];
//! once the script is exhausted the provider returns an empty decision.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use super::{ChatProvider, DecisionChunk, DecisionRequest};
use crate::error::Result;
use crate::types::ModelDecision;

/// Scripted provider: returns the next [`ModelDecision`] in `script` on each
/// call, in order, regardless of the request contents.
pub struct FakeProvider {
    script: Mutex<Vec<ModelDecision>>,
    calls: AtomicUsize,
    last_tool_names: Mutex<Vec<String>>,
}

impl FakeProvider {
    /// Build a provider that replays `script` in order.
    #[must_use]
    pub fn new(script: Vec<ModelDecision>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
            last_tool_names: Mutex::new(Vec::new()),
        }
    }

    /// Number of decisions served so far.
    pub fn calls_made(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Names of the tools offered in the manifest of the most recent call.
    pub fn last_tool_names(&self) -> Vec<String> {
        self.last_tool_names
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn next_decision(&self, request: &DecisionRequest) -> ModelDecision {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_tool_names.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
            request.tools.iter().map(|t| t.name.clone()).collect();
        let mut script = self.script.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if script.is_empty() {
            ModelDecision::default()
        } else {
            script.remove(0)
        }
    }
}

#[async_trait]
impl ChatProvider for FakeProvider {
    async fn decide_blocking(&self, request: &DecisionRequest) -> Result<ModelDecision> {
        Ok(self.next_decision(request))
    }

    async fn decide_streaming(
        &self,
        request: &DecisionRequest,
    ) -> Result<BoxStream<'static, Result<DecisionChunk>>> {
        let decision = self.next_decision(request);
        let mut chunks = Vec::new();
        if let Some(text) = decision.assistant_draft {
            chunks.push(Ok(DecisionChunk::TextDelta(text)));
        }
        for call in decision.tool_calls {
            chunks.push(Ok(DecisionChunk::ToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            }));
        }
        Ok(stream::iter(chunks).boxed())
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}
