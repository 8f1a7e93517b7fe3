//! The Loop Driver and Continuation (`SPEC_FULL.md` §4.1, §4.8): the
//! decide -> execute -> continue/suspend -> finalize algorithm, shared
//! verbatim by a fresh step and a resumed `WAIT_CLIENT` step.

use std::sync::Arc;

use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::assembler::ContextAssembler;
use crate::config::OrchestratorConfig;
use crate::decision::{ChatProvider, DecisionRequest};
use crate::error::{OrchestratorError, Result};
use crate::hub::SubscriberHub;
use crate::memory::{Memory, MessageState};
use crate::message::MessageRole;
use crate::step_store::StepContextStore;
use crate::tool::pipeline::ToolExecutionPipeline;
use crate::tool::{ClientToolStub, Tool, ToolRegistry};
use crate::types::{
    ClientResultStatus, ErrorData, Event, ExecTarget, FinishedData, StartedData, StepEventData, ToolCall,
    ToolStatus,
};

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Wires the Step Context Store, Decision Adapter, Tool Execution Pipeline,
/// Memory, and Subscriber Hub into the shared per-step event loop.
pub struct LoopDriver {
    step_store: StepContextStore,
    memory: Arc<dyn Memory>,
    provider: Arc<dyn ChatProvider>,
    registry: ToolRegistry,
    pipeline: ToolExecutionPipeline,
    hub: Arc<SubscriberHub>,
    config: RwLock<OrchestratorConfig>,
    system_prompt: String,
}

impl LoopDriver {
    /// Build a driver over its collaborators.
    #[must_use]
    pub fn new(
        step_store: StepContextStore,
        memory: Arc<dyn Memory>,
        provider: Arc<dyn ChatProvider>,
        registry: ToolRegistry,
        pipeline: ToolExecutionPipeline,
        hub: Arc<SubscriberHub>,
        config: OrchestratorConfig,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            step_store,
            memory,
            provider,
            registry,
            pipeline,
            hub,
            config: RwLock::new(config),
            system_prompt: system_prompt.into(),
        }
    }

    /// Replace the live configuration (PUT-merge is applied by the caller
    /// via [`OrchestratorConfig::merge`] before calling this).
    pub async fn set_config(&self, config: OrchestratorConfig) {
        *self.config.write().await = config;
    }

    /// Current configuration snapshot.
    pub async fn config_snapshot(&self) -> OrchestratorConfig {
        self.config.read().await.clone()
    }

    /// A caller disconnected or cancelled mid-step: drop its step-store
    /// entry and close its hub channel. Draft rows are left for the GC pass
    /// rather than promoted, per the draft/final invariant.
    pub async fn cancel_step(&self, step_id: &str) {
        self.step_store.clear(step_id).await;
        self.hub.publish(step_id, Event::Error {
            ts: now_ts(),
            data: ErrorData { step_id: step_id.to_string(), loop_count: 0, message: "step cancelled".to_string() },
        }).await;
        self.hub.complete(step_id).await;
    }

    /// Handle one Stage A request: either a fresh step (`q` set) or a
    /// resume of a suspended step (`resumeStepId` set). Returns the event
    /// stream for the request body; the same events are published to the
    /// Subscriber Hub for Stage B as they are produced.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, conversation_id = %request.conversation_id))]
    pub async fn run_step(self: &Arc<Self>, request: crate::types::ChatRequest) -> Result<BoxStream<'static, Event>> {
        let driver = Arc::clone(self);
        let config = driver.config_snapshot().await;

        let (step_id, is_resume) = if let Some(resume_id) = request.resume_step_id.clone() {
            let ids: Vec<String> = request.client_results.iter().map(|r| r.tool_call_id.clone()).collect();
            driver
                .step_store
                .validate_and_record_resume(&resume_id, &request.user_id, &request.conversation_id, &ids)
                .await?;
            (resume_id, true)
        } else {
            let q = request
                .q
                .clone()
                .ok_or_else(|| OrchestratorError::bad_request("q is required to start a new step"))?;
            let step_id = Uuid::new_v4().to_string();
            driver.step_store.bind(&step_id, &request.user_id, &request.conversation_id).await?;
            let seq = driver.memory.find_max_seq(&request.user_id, &request.conversation_id, &step_id).await? + 1;
            driver
                .memory
                .upsert_message(
                    &request.user_id,
                    &request.conversation_id,
                    &step_id,
                    MessageRole::User,
                    &q,
                    Value::Null,
                    seq,
                    MessageState::Draft,
                )
                .await?;
            (step_id, false)
        };

        let user_id = request.user_id.clone();
        let conversation_id = request.conversation_id.clone();
        let client_tools = request.client_tools.clone();
        let client_results = request.client_results.clone();
        let tool_choice = request.tool_choice.clone();

        Ok(stream! {
            let mut loop_count = driver
                .memory
                .get_step_rows(&user_id, &conversation_id, &step_id)
                .await
                .unwrap_or_default()
                .iter()
                .filter(|r| matches!(r.role, MessageRole::Assistant))
                .count() as u32;

            if !is_resume {
                let event = Event::Started { ts: now_ts(), data: StartedData { step_id: step_id.clone(), loop_count } };
                driver.hub.publish(&step_id, event.clone()).await;
                yield event;
            } else {
                for result in &client_results {
                    let seq = match driver.memory.find_max_seq(&user_id, &conversation_id, &step_id).await {
                        Ok(v) => v + 1,
                        Err(err) => {
                            yield finish_error(&driver, &step_id, loop_count, &err.to_string()).await;
                            return;
                        }
                    };
                    let status = match result.status {
                        ClientResultStatus::Ok => ToolStatus::Success,
                        ClientResultStatus::Error => ToolStatus::Error,
                    };
                    let payload = serde_json::json!({
                        "tool_call_id": result.tool_call_id,
                        "name": result.name,
                    });
                    if let Err(err) = driver
                        .memory
                        .upsert_message(
                            &user_id,
                            &conversation_id,
                            &step_id,
                            MessageRole::Tool,
                            &serde_json::to_string(&result.payload).unwrap_or_default(),
                            payload,
                            seq,
                            MessageState::Draft,
                        )
                        .await
                    {
                        yield finish_error(&driver, &step_id, loop_count, &err.to_string()).await;
                        return;
                    }

                    let event = Event::Step {
                        ts: now_ts(),
                        data: StepEventData::Tool {
                            name: result.name.clone(),
                            tool_call_id: result.tool_call_id.clone(),
                            reused: false,
                            status,
                            args: result.args.clone(),
                            data: result.payload.clone(),
                        },
                    };
                    driver.hub.publish(&step_id, event.clone()).await;
                    yield event;
                }
            }

            loop {
                let assembler = ContextAssembler::new(driver.memory.as_ref());
                let (messages, context_hash) = match assembler
                    .assemble(&user_id, &conversation_id, &step_id, &driver.system_prompt, &config)
                    .await
                {
                    Ok(v) => v,
                    Err(err) => {
                        yield finish_error(&driver, &step_id, loop_count, &err.to_string()).await;
                        return;
                    }
                };
                info!(step_id = %step_id, loop_count, %context_hash, "assembled context for iteration");

                let client_tool_defs = client_tools.iter().map(|c| {
                    ClientToolStub::new(c.name.clone(), c.description.clone().unwrap_or_default(), c.parameters.clone())
                        .definition()
                });
                let tools: Vec<_> = driver.registry.definitions().into_iter().chain(client_tool_defs).collect();
                let decision_request = DecisionRequest { messages, tools, tool_choice: tool_choice.clone() };
                let deadline = std::time::Duration::from_millis(config.stream_timeout_ms);
                let decision = match tokio::time::timeout(deadline, driver.provider.decide_blocking(&decision_request)).await {
                    Ok(Ok(decision)) => decision,
                    Ok(Err(err)) => {
                        yield finish_error(&driver, &step_id, loop_count, &err.to_string()).await;
                        return;
                    }
                    Err(_) => {
                        yield finish_error(&driver, &step_id, loop_count, "step deadline exceeded").await;
                        return;
                    }
                };

                let assistant_seq = match driver.memory.find_max_seq(&user_id, &conversation_id, &step_id).await {
                    Ok(v) => v + 1,
                    Err(err) => {
                        yield finish_error(&driver, &step_id, loop_count, &err.to_string()).await;
                        return;
                    }
                };
                let tool_calls_payload: Vec<Value> = decision
                    .tool_calls
                    .iter()
                    .map(|c| serde_json::json!({"id": c.id, "name": c.name, "arguments": c.arguments}))
                    .collect();
                let assistant_payload = serde_json::json!({ "tool_calls": tool_calls_payload });
                if let Err(err) = driver
                    .memory
                    .upsert_message(
                        &user_id,
                        &conversation_id,
                        &step_id,
                        MessageRole::Assistant,
                        decision.assistant_draft.as_deref().unwrap_or_default(),
                        assistant_payload,
                        assistant_seq,
                        MessageState::Draft,
                    )
                    .await
                {
                    yield finish_error(&driver, &step_id, loop_count, &err.to_string()).await;
                    return;
                }

                if let Some(text) = &decision.assistant_draft {
                    if !text.is_empty() {
                        let event = Event::Step { ts: now_ts(), data: StepEventData::Message { text: text.clone() } };
                        driver.hub.publish(&step_id, event.clone()).await;
                        yield event;
                    }
                }

                let (client_calls, server_calls): (Vec<ToolCall>, Vec<ToolCall>) = decision
                    .tool_calls
                    .into_iter()
                    .partition(|c| matches!(c.exec_target, ExecTarget::Client));

                if !client_calls.is_empty() {
                    driver.step_store.record_client_calls(&step_id, &client_calls).await;
                    let event = Event::Step {
                        ts: now_ts(),
                        data: StepEventData::ClientCalls { step_id: step_id.clone(), calls: client_calls },
                    };
                    driver.hub.publish(&step_id, event.clone()).await;
                    yield event;
                    return;
                }

                if server_calls.is_empty() {
                    match finish_done(&driver, &step_id, &user_id, &conversation_id, loop_count).await {
                        Ok(event) => {
                            yield event;
                            return;
                        }
                        Err(err) => {
                            yield finish_error(&driver, &step_id, loop_count, &err.to_string()).await;
                            return;
                        }
                    }
                }

                for call in &server_calls {
                    let seq = match driver.memory.find_max_seq(&user_id, &conversation_id, &step_id).await {
                        Ok(v) => v + 1,
                        Err(err) => {
                            yield finish_error(&driver, &step_id, loop_count, &err.to_string()).await;
                            return;
                        }
                    };
                    let result = match driver.pipeline.execute(call, &user_id, &conversation_id, &config).await {
                        Ok(result) => result,
                        Err(err) => {
                            yield finish_error(&driver, &step_id, loop_count, &err.to_string()).await;
                            return;
                        }
                    };

                    let tool_payload = serde_json::json!({ "tool_call_id": result.call_id, "name": result.name });
                    if let Err(err) = driver
                        .memory
                        .upsert_message(
                            &user_id,
                            &conversation_id,
                            &step_id,
                            MessageRole::Tool,
                            &serde_json::to_string(&result.data).unwrap_or_default(),
                            tool_payload,
                            seq,
                            MessageState::Draft,
                        )
                        .await
                    {
                        yield finish_error(&driver, &step_id, loop_count, &err.to_string()).await;
                        return;
                    }

                    let event = Event::Step {
                        ts: now_ts(),
                        data: StepEventData::Tool {
                            name: result.name.clone(),
                            tool_call_id: result.call_id.clone(),
                            reused: result.reused,
                            status: result.status,
                            args: call.arguments.clone(),
                            data: result.data.clone(),
                        },
                    };
                    driver.hub.publish(&step_id, event.clone()).await;
                    yield event;
                }

                if loop_count >= config.tools_max_loops {
                    match finish_done(&driver, &step_id, &user_id, &conversation_id, loop_count).await {
                        Ok(event) => {
                            yield event;
                            return;
                        }
                        Err(err) => {
                            yield finish_error(&driver, &step_id, loop_count, &err.to_string()).await;
                            return;
                        }
                    }
                }
                loop_count += 1;
            }
        }
        .boxed())
    }
}

/// Force a successful `DONE` finalization with whatever draft exists,
/// used both for the "model stopped issuing tool calls" case and for the
/// `loop >= toolsMaxLoops` forced cutoff.
async fn finish_done(
    driver: &Arc<LoopDriver>,
    step_id: &str,
    user_id: &str,
    conversation_id: &str,
    loop_count: u32,
) -> Result<Event> {
    driver.memory.promote_drafts_to_final(user_id, conversation_id, step_id).await?;
    driver.step_store.clear(step_id).await;
    let event = Event::Finished { ts: now_ts(), data: FinishedData { step_id: step_id.to_string(), loop_count } };
    driver.hub.publish(step_id, event.clone()).await;
    driver.hub.complete(step_id).await;
    Ok(event)
}

async fn finish_error(driver: &Arc<LoopDriver>, step_id: &str, loop_count: u32, message: &str) -> Event {
    warn!(step_id, loop_count, message, "step finished with an error");
    driver.step_store.clear(step_id).await;
    let event = Event::Error {
        ts: now_ts(),
        data: ErrorData { step_id: step_id.to_string(), loop_count, message: message.to_string() },
    };
    driver.hub.publish(step_id, event.clone()).await;
    driver.hub.complete(step_id).await;
    event
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::decision::FakeProvider;
    use crate::memory::sqlite::SqliteMemory;
    use crate::tool::builtin::EchoTool;
    use crate::tool::cache::ToolCache;
    use crate::types::{ChatRequest, ClientToolDeclaration, ModelDecision, ToolChoice};
    use std::time::Duration;

    fn build_driver(script: Vec<ModelDecision>) -> Arc<LoopDriver> {
        build_driver_with_provider(script).0
    }

    fn build_driver_with_provider(script: Vec<ModelDecision>) -> (Arc<LoopDriver>, Arc<FakeProvider>) {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let memory: Arc<dyn Memory> = Arc::new(SqliteMemory::open(":memory:").unwrap());
        let cache = Arc::new(ToolCache::new(64, Duration::from_secs(60)));
        let pipeline = ToolExecutionPipeline::new(registry.clone(), cache, Arc::clone(&memory));
        let hub = Arc::new(SubscriberHub::new(HubConfig::default()));
        let fake = Arc::new(FakeProvider::new(script));
        let provider: Arc<dyn ChatProvider> = Arc::clone(&fake) as Arc<dyn ChatProvider>;
        let driver = Arc::new(LoopDriver::new(
            StepContextStore::new(Duration::from_secs(600)),
            memory,
            provider,
            registry,
            pipeline,
            hub,
            OrchestratorConfig::default(),
            "You are helpful.",
        ));
        (driver, fake)
    }

    fn fresh_request(q: &str) -> ChatRequest {
        ChatRequest {
            user_id: "u1".to_string(),
            conversation_id: "c1".to_string(),
            q: Some(q.to_string()),
            resume_step_id: None,
            tool_choice: ToolChoice::Auto,
            client_tools: Vec::new(),
            client_results: Vec::new(),
        }
    }

    #[tokio::test]
    async fn pure_draft_step_finishes_done() {
        let driver = build_driver(vec![ModelDecision { assistant_draft: Some("hi!".to_string()), tool_calls: Vec::new() }]);
        let mut stream = driver.run_step(fresh_request("hello")).await.unwrap();
        let events: Vec<Event> = stream.by_ref().take(3).collect().await;
        assert!(matches!(events[0], Event::Started { data: StartedData { loop_count: 0, .. }, .. }));
        assert!(matches!(events[1], Event::Step { data: StepEventData::Message { .. }, .. }));
        assert!(matches!(events[2], Event::Finished { data: FinishedData { loop_count: 0, .. }, .. }));
    }

    #[tokio::test]
    async fn server_tool_round_trip_then_reuse_on_next_call() {
        let driver = build_driver(vec![
            ModelDecision {
                assistant_draft: None,
                tool_calls: vec![ToolCall {
                    id: "t1".to_string(),
                    name: "echo".to_string(),
                    arguments: serde_json::json!({"message": "hi"}),
                    exec_target: ExecTarget::Server,
                }],
            },
            ModelDecision { assistant_draft: Some("done".to_string()), tool_calls: Vec::new() },
        ]);
        let mut stream = driver.run_step(fresh_request("hello")).await.unwrap();
        let events: Vec<Event> = stream.by_ref().collect().await;
        let tool_event = events.iter().find(|e| matches!(e, Event::Step { data: StepEventData::Tool { .. }, .. }));
        assert!(tool_event.is_some());
        assert!(matches!(events.last(), Some(Event::Finished { .. })));
    }

    #[tokio::test]
    async fn caller_declared_client_tools_reach_the_decision_manifest() {
        let (driver, provider) = build_driver_with_provider(vec![ModelDecision {
            assistant_draft: Some("done".to_string()),
            tool_calls: Vec::new(),
        }]);
        let mut request = fresh_request("hello");
        request.client_tools = vec![ClientToolDeclaration {
            name: "open_url".to_string(),
            description: Some("opens a url client-side".to_string()),
            parameters: serde_json::json!({}),
        }];
        let mut stream = driver.run_step(request).await.unwrap();
        let _events: Vec<Event> = stream.by_ref().collect().await;
        let names = provider.last_tool_names();
        assert!(names.contains(&"echo".to_string()), "server tools still offered: {names:?}");
        assert!(names.contains(&"open_url".to_string()), "caller-declared client tool must reach the manifest: {names:?}");
    }

    #[tokio::test]
    async fn client_tool_call_suspends_the_step() {
        let driver = build_driver(vec![ModelDecision {
            assistant_draft: None,
            tool_calls: vec![ToolCall {
                id: "t1".to_string(),
                name: "open_url".to_string(),
                arguments: serde_json::json!({"url": "https://example.com"}),
                exec_target: ExecTarget::Client,
            }],
        }]);
        let mut stream = driver.run_step(fresh_request("hello")).await.unwrap();
        let events: Vec<Event> = stream.by_ref().collect().await;
        assert!(matches!(events.last(), Some(Event::Step { data: StepEventData::ClientCalls { .. }, .. })));
        assert!(!events.iter().any(|e| matches!(e, Event::Finished { .. })));
    }

    #[tokio::test]
    async fn tools_max_loops_forces_a_done_finish_instead_of_an_error() {
        let mut script = Vec::new();
        for i in 0..20 {
            script.push(ModelDecision {
                assistant_draft: None,
                tool_calls: vec![ToolCall {
                    id: format!("t{i}"),
                    name: "echo".to_string(),
                    arguments: serde_json::json!({"message": format!("{i}")}),
                    exec_target: ExecTarget::Server,
                }],
            });
        }
        let driver = build_driver(script);
        let mut stream = driver.run_step(fresh_request("hello")).await.unwrap();
        let events: Vec<Event> = stream.by_ref().collect().await;
        assert!(matches!(events.last(), Some(Event::Finished { .. })));
        let tool_events = events.iter().filter(|e| matches!(e, Event::Step { data: StepEventData::Tool { .. }, .. })).count();
        // loop is 0-based and the cap allows loop == tools_max_loops through once
        // (forcing DONE only after that iteration executes), so one more
        // iteration runs than the raw cap value.
        assert_eq!(tool_events as u32, OrchestratorConfig::default().tools_max_loops + 1);
    }

    #[tokio::test]
    async fn tools_max_loops_zero_finishes_done_after_the_first_decision() {
        let driver = build_driver(vec![ModelDecision {
            assistant_draft: None,
            tool_calls: vec![ToolCall {
                id: "t0".to_string(),
                name: "echo".to_string(),
                arguments: serde_json::json!({"message": "only-call"}),
                exec_target: ExecTarget::Server,
            }],
        }]);
        driver
            .set_config(OrchestratorConfig { tools_max_loops: 0, ..OrchestratorConfig::default() })
            .await;
        let mut stream = driver.run_step(fresh_request("hello")).await.unwrap();
        let events: Vec<Event> = stream.by_ref().collect().await;
        let tool_events = events.iter().filter(|e| matches!(e, Event::Step { data: StepEventData::Tool { .. }, .. })).count();
        assert_eq!(tool_events, 1, "the first decision's tool call still executes before forced finalization");
        assert!(matches!(events.last(), Some(Event::Finished { .. })));
    }
}
