//! The Step Context Store (`SPEC_FULL.md` §4.2).
//!
//! Binds `stepId -> (userId, conversationId, issued client call ids)` with a
//! TTL, giving the resume path the integrity checks it needs. Each entry is
//! guarded by its own mutex so operations on different steps never contend,
//! mirroring the per-resource lock idiom used for persistence elsewhere in
//! this crate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::{OrchestratorError, Result};
use crate::types::ToolCall;

struct Entry {
    user_id: String,
    conversation_id: String,
    issued_client_calls: HashSet<String>,
    satisfied_client_calls: HashSet<String>,
    last_touched: Instant,
}

/// In-process, TTL-bounded map from stepId to its scope and issued client
/// calls.
#[derive(Clone)]
pub struct StepContextStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl StepContextStore {
    /// Create a store with the given entry TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Bind a stepId to its scope. Idempotent for the same scope; rejects a
    /// conflicting rebind.
    pub async fn bind(&self, step_id: &str, user_id: &str, conversation_id: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(step_id) {
            Some(entry) => {
                if entry.user_id != user_id || entry.conversation_id != conversation_id {
                    return Err(OrchestratorError::bad_request(format!(
                        "stepId {step_id} is already bound to a different scope"
                    )));
                }
                entry.last_touched = Instant::now();
                Ok(())
            }
            None => {
                entries.insert(
                    step_id.to_string(),
                    Entry {
                        user_id: user_id.to_string(),
                        conversation_id: conversation_id.to_string(),
                        issued_client_calls: HashSet::new(),
                        satisfied_client_calls: HashSet::new(),
                        last_touched: Instant::now(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Merge newly-issued client call ids into the step's tracked set.
    pub async fn record_client_calls(&self, step_id: &str, calls: &[ToolCall]) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(step_id) {
            entry.last_touched = Instant::now();
            for call in calls {
                entry.issued_client_calls.insert(call.id.clone());
            }
        }
    }

    /// All client call ids ever issued for this step.
    pub async fn list_client_calls(&self, step_id: &str) -> HashSet<String> {
        let entries = self.entries.lock().await;
        entries
            .get(step_id)
            .map(|e| e.issued_client_calls.clone())
            .unwrap_or_default()
    }

    /// Issued ids not yet reported via a resume.
    pub async fn unsatisfied_client_calls(&self, step_id: &str) -> HashSet<String> {
        let entries = self.entries.lock().await;
        entries
            .get(step_id)
            .map(|e| {
                e.issued_client_calls
                    .difference(&e.satisfied_client_calls)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Validate a resume request and mark the reported ids satisfied.
    ///
    /// Rejects with `BAD_REQUEST` before making any changes if the stepId is
    /// missing, the scope mismatches, or any incoming id was never issued
    /// for this step.
    pub async fn validate_and_record_resume(
        &self,
        step_id: &str,
        user_id: &str,
        conversation_id: &str,
        incoming_tool_call_ids: &[String],
    ) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(step_id).ok_or_else(|| {
            OrchestratorError::bad_request("resumeStepId not found or already cleared")
        })?;

        if entry.user_id != user_id || entry.conversation_id != conversation_id {
            return Err(OrchestratorError::bad_request(
                "resumeStepId does not match userId/conversationId",
            ));
        }

        let unknown: Vec<&String> = incoming_tool_call_ids
            .iter()
            .filter(|id| !entry.issued_client_calls.contains(*id))
            .collect();
        if !unknown.is_empty() {
            let ids = unknown
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(OrchestratorError::bad_request(format!(
                "unknown tool_call_id for this step: [{ids}]"
            )));
        }

        let entry = entries.get_mut(step_id).expect("entry checked above");
        entry.last_touched = Instant::now();
        for id in incoming_tool_call_ids {
            entry.satisfied_client_calls.insert(id.clone());
        }
        Ok(())
    }

    /// Clear a step's entry. Only call on terminal transitions.
    pub async fn clear(&self, step_id: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(step_id);
    }

    /// Evict entries idle longer than the configured TTL. Intended to be
    /// driven by a background janitor loop.
    pub async fn evict_expired(&self) -> Vec<String> {
        let mut entries = self.entries.lock().await;
        let ttl = self.ttl;
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_touched) > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        expired
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_is_idempotent_for_same_scope() {
        let store = StepContextStore::new(Duration::from_secs(600));
        store.bind("s1", "u1", "c1").await.unwrap();
        store.bind("s1", "u1", "c1").await.unwrap();
    }

    #[tokio::test]
    async fn bind_rejects_scope_conflict() {
        let store = StepContextStore::new(Duration::from_secs(600));
        store.bind("s1", "u1", "c1").await.unwrap();
        let err = store.bind("s1", "u2", "c1").await.unwrap_err();
        assert_eq!(err.kind(), "BAD_REQUEST");
    }

    #[tokio::test]
    async fn resume_rejects_unknown_tool_call_id_before_any_state_change() {
        let store = StepContextStore::new(Duration::from_secs(600));
        store.bind("s1", "u1", "c1").await.unwrap();
        let call = ToolCall {
            id: "c1".to_string(),
            name: "open_url".to_string(),
            arguments: serde_json::json!({}),
            exec_target: crate::types::ExecTarget::Client,
        };
        store.record_client_calls("s1", std::slice::from_ref(&call)).await;

        let err = store
            .validate_and_record_resume("s1", "u1", "c1", &["bogus".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bogus"));

        let unsatisfied = store.unsatisfied_client_calls("s1").await;
        assert!(unsatisfied.contains("c1"));
    }

    #[tokio::test]
    async fn resume_rejects_missing_step() {
        let store = StepContextStore::new(Duration::from_secs(600));
        let err = store
            .validate_and_record_resume("missing", "u1", "c1", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn resume_rejects_scope_mismatch() {
        let store = StepContextStore::new(Duration::from_secs(600));
        store.bind("s1", "u1", "c1").await.unwrap();
        let err = store
            .validate_and_record_resume("s1", "u2", "c1", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[tokio::test]
    async fn resume_allows_leaving_other_issued_calls_unanswered() {
        let store = StepContextStore::new(Duration::from_secs(600));
        store.bind("s1", "u1", "c1").await.unwrap();
        let calls = vec![
            ToolCall {
                id: "c1".to_string(),
                name: "open_url".to_string(),
                arguments: serde_json::json!({}),
                exec_target: crate::types::ExecTarget::Client,
            },
            ToolCall {
                id: "c2".to_string(),
                name: "open_url".to_string(),
                arguments: serde_json::json!({}),
                exec_target: crate::types::ExecTarget::Client,
            },
        ];
        store.record_client_calls("s1", &calls).await;
        store
            .validate_and_record_resume("s1", "u1", "c1", &["c1".to_string()])
            .await
            .unwrap();
        let unsatisfied = store.unsatisfied_client_calls("s1").await;
        assert_eq!(unsatisfied.len(), 1);
        assert!(unsatisfied.contains("c2"));
    }

    #[tokio::test]
    async fn clear_removes_entry() {
        let store = StepContextStore::new(Duration::from_secs(600));
        store.bind("s1", "u1", "c1").await.unwrap();
        store.clear("s1").await;
        let err = store
            .validate_and_record_resume("s1", "u1", "c1", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
