//! End-to-end scenarios driving [`chatcore::Orchestrator`] directly, the way
//! a real caller (the HTTP transport, or an embedding binary) would: build
//! an orchestrator over a scripted [`FakeProvider`], drive one or more Stage
//! A requests to completion, and assert on the resulting event stream and
//! durable state.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chatcore::config::OrchestratorConfig;
use chatcore::decision::{ChatProvider, FakeProvider};
use chatcore::orchestrator::Orchestrator;
use chatcore::tool::builtin::EchoTool;
use chatcore::tool::ToolRegistry;
use chatcore::types::{
    ChatRequest, ClientResultStatus, ClientToolResult, Event, ExecTarget, ModelDecision, StepEventData, ToolCall,
    ToolChoice, ToolStatus,
};
use futures::StreamExt;

fn registry_with_echo() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool));
    registry
}

fn request(user_id: &str, conversation_id: &str, q: &str) -> ChatRequest {
    ChatRequest {
        user_id: user_id.to_string(),
        conversation_id: conversation_id.to_string(),
        q: Some(q.to_string()),
        resume_step_id: None,
        tool_choice: ToolChoice::Auto,
        client_tools: Vec::new(),
        client_results: Vec::new(),
    }
}

fn server_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall { id: id.to_string(), name: name.to_string(), arguments: args, exec_target: ExecTarget::Server }
}

fn client_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall { id: id.to_string(), name: name.to_string(), arguments: args, exec_target: ExecTarget::Client }
}

#[tokio::test]
async fn pure_draft_step_runs_to_done_with_no_tool_calls() {
    let provider: Arc<dyn ChatProvider> = Arc::new(FakeProvider::new(vec![ModelDecision {
        assistant_draft: Some("hello there".to_string()),
        tool_calls: Vec::new(),
    }]));
    let orchestrator =
        Orchestrator::new(":memory:", provider, registry_with_echo(), OrchestratorConfig::default(), "sys").unwrap();

    let events: Vec<Event> = orchestrator.handle_chat(request("u1", "c1", "hi")).await.unwrap().collect().await;

    assert!(matches!(events[0], Event::Started { .. }));
    assert!(matches!(events[1], Event::Step { data: StepEventData::Message { .. }, .. }));
    assert!(matches!(events.last(), Some(Event::Finished { .. })));
}

#[tokio::test]
async fn server_tool_call_is_reused_from_the_ledger_on_a_repeated_call() {
    let args = serde_json::json!({"message": "same args"});
    let provider: Arc<dyn ChatProvider> = Arc::new(FakeProvider::new(vec![
        ModelDecision { assistant_draft: None, tool_calls: vec![server_call("t1", "echo", args.clone())] },
        ModelDecision { assistant_draft: None, tool_calls: vec![server_call("t2", "echo", args)] },
        ModelDecision { assistant_draft: Some("done".to_string()), tool_calls: Vec::new() },
    ]));
    let orchestrator =
        Orchestrator::new(":memory:", provider, registry_with_echo(), OrchestratorConfig::default(), "sys").unwrap();

    let events: Vec<Event> = orchestrator.handle_chat(request("u1", "c1", "hi")).await.unwrap().collect().await;

    let tool_events: Vec<&StepEventData> = events
        .iter()
        .filter_map(|e| match e {
            Event::Step { data, .. } => Some(data),
            _ => None,
        })
        .collect();
    let reused_flags: Vec<bool> = tool_events
        .iter()
        .filter_map(|d| match d {
            StepEventData::Tool { reused, .. } => Some(*reused),
            _ => None,
        })
        .collect();
    assert_eq!(reused_flags, vec![false, true]);
    assert!(matches!(events.last(), Some(Event::Finished { .. })));
}

#[tokio::test]
async fn client_tool_call_suspends_and_a_later_resume_carries_it_to_done() {
    let provider: Arc<dyn ChatProvider> = Arc::new(FakeProvider::new(vec![
        ModelDecision {
            assistant_draft: None,
            tool_calls: vec![client_call("t1", "open_url", serde_json::json!({"url": "https://example.com"}))],
        },
        ModelDecision { assistant_draft: Some("read it".to_string()), tool_calls: Vec::new() },
    ]));
    let orchestrator =
        Orchestrator::new(":memory:", provider, registry_with_echo(), OrchestratorConfig::default(), "sys").unwrap();

    let first_events: Vec<Event> = orchestrator.handle_chat(request("u1", "c1", "hi")).await.unwrap().collect().await;
    assert!(!first_events.iter().any(|e| matches!(e, Event::Finished { .. })));
    let step_id = first_events
        .iter()
        .find_map(|e| match e {
            Event::Step { data: StepEventData::ClientCalls { step_id, .. }, .. } => Some(step_id.clone()),
            _ => None,
        })
        .expect("a clientCalls event must be emitted");

    let resume = ChatRequest {
        user_id: "u1".to_string(),
        conversation_id: "c1".to_string(),
        q: None,
        resume_step_id: Some(step_id),
        tool_choice: ToolChoice::Auto,
        client_tools: Vec::new(),
        client_results: vec![ClientToolResult {
            tool_call_id: "t1".to_string(),
            name: "open_url".to_string(),
            status: ClientResultStatus::Ok,
            payload: serde_json::json!({"title": "Example Domain"}),
            args: serde_json::json!({"url": "https://example.com"}),
        }],
    };
    let second_events: Vec<Event> = orchestrator.handle_chat(resume).await.unwrap().collect().await;

    assert!(second_events
        .iter()
        .any(|e| matches!(e, Event::Step { data: StepEventData::Tool { tool_call_id, .. }, .. } if tool_call_id == "t1")));
    assert!(matches!(second_events.last(), Some(Event::Finished { .. })));
}

#[tokio::test]
async fn disabled_tool_reports_an_error_result_without_failing_the_step() {
    let mut config = OrchestratorConfig::default();
    config.tool_toggles.insert("echo".to_string(), false);
    let provider: Arc<dyn ChatProvider> = Arc::new(FakeProvider::new(vec![
        ModelDecision {
            assistant_draft: None,
            tool_calls: vec![server_call("t1", "echo", serde_json::json!({"message": "hi"}))],
        },
        ModelDecision { assistant_draft: Some("ok".to_string()), tool_calls: Vec::new() },
    ]));
    let orchestrator = Orchestrator::new(":memory:", provider, registry_with_echo(), config, "sys").unwrap();

    let events: Vec<Event> = orchestrator.handle_chat(request("u1", "c1", "hi")).await.unwrap().collect().await;

    let tool_status = events.iter().find_map(|e| match e {
        Event::Step { data: StepEventData::Tool { status, .. }, .. } => Some(*status),
        _ => None,
    });
    assert_eq!(tool_status, Some(ToolStatus::Error));
    assert!(matches!(events.last(), Some(Event::Finished { .. })));
}

#[tokio::test]
async fn resume_with_an_unissued_tool_call_id_is_rejected_before_any_work_runs() {
    let provider: Arc<dyn ChatProvider> = Arc::new(FakeProvider::new(vec![ModelDecision {
        assistant_draft: None,
        tool_calls: vec![client_call("t1", "open_url", serde_json::json!({"url": "https://example.com"}))],
    }]));
    let orchestrator =
        Orchestrator::new(":memory:", provider, registry_with_echo(), OrchestratorConfig::default(), "sys").unwrap();

    let first_events: Vec<Event> = orchestrator.handle_chat(request("u1", "c1", "hi")).await.unwrap().collect().await;
    let step_id = first_events
        .iter()
        .find_map(|e| match e {
            Event::Step { data: StepEventData::ClientCalls { step_id, .. }, .. } => Some(step_id.clone()),
            _ => None,
        })
        .unwrap();

    let tampered = ChatRequest {
        user_id: "u1".to_string(),
        conversation_id: "c1".to_string(),
        q: None,
        resume_step_id: Some(step_id),
        tool_choice: ToolChoice::Auto,
        client_tools: Vec::new(),
        client_results: vec![ClientToolResult {
            tool_call_id: "forged-id".to_string(),
            name: "open_url".to_string(),
            status: ClientResultStatus::Ok,
            payload: serde_json::json!({}),
            args: serde_json::json!({}),
        }],
    };
    let err = orchestrator.handle_chat(tampered).await.unwrap_err();
    assert_eq!(err.kind(), "BAD_REQUEST");
    assert!(err.to_string().contains("forged-id"));
}

#[tokio::test]
async fn audit_chain_stays_intact_across_a_multi_loop_step_with_a_server_tool_call() {
    let provider: Arc<dyn ChatProvider> = Arc::new(FakeProvider::new(vec![
        ModelDecision {
            assistant_draft: None,
            tool_calls: vec![server_call("t1", "echo", serde_json::json!({"message": "hi"}))],
        },
        ModelDecision { assistant_draft: Some("done".to_string()), tool_calls: Vec::new() },
    ]));
    let orchestrator =
        Orchestrator::new(":memory:", provider, registry_with_echo(), OrchestratorConfig::default(), "sys").unwrap();

    let _: Vec<Event> = orchestrator.handle_chat(request("u1", "c1", "hi")).await.unwrap().collect().await;

    let report = orchestrator.verify_audit_chain("u1", "c1").await.unwrap();
    assert!(report.is_intact());
    assert!(report.messages.rows_checked > 0);
    assert!(report.tool_ledger.rows_checked > 0);
}
