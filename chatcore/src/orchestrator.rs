//! Top-level wiring (`SPEC_FULL.md` §9 "Global mutable state"): a single
//! struct owning every collaborator, built once at process start and
//! shared behind an `Arc` by the HTTP transport (or any other caller).

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use tokio::task::JoinHandle;

use crate::config::OrchestratorConfig;
use crate::decision::ChatProvider;
use crate::driver::LoopDriver;
use crate::error::Result;
use crate::hub::{self, SubscriberHub};
use crate::memory::sqlite::SqliteMemory;
use crate::memory::{ChainVerification, Memory};
use crate::step_store::StepContextStore;
use crate::tool::cache::ToolCache;
use crate::tool::pipeline::ToolExecutionPipeline;
use crate::tool::ToolRegistry;
use crate::types::{ChatRequest, Event};

const STEP_STORE_TTL_SECS: u64 = 3600;
const TOOL_CACHE_CAPACITY: usize = 1024;
const TOOL_CACHE_TTL_SECS: u64 = 300;

/// Owns the full orchestration core for one process: the step store, tool
/// registry/pipeline, decision adapter, memory backend, and hub, plus their
/// background tasks.
pub struct Orchestrator {
    driver: Arc<LoopDriver>,
    memory: Arc<dyn Memory>,
    hub: Arc<SubscriberHub>,
    hub_task: JoinHandle<()>,
}

impl Orchestrator {
    /// Build an orchestrator over a durable store path (use `":memory:"`
    /// for an ephemeral instance), a decision provider, a populated tool
    /// registry, starting config, and the system prompt prefixed onto
    /// every assembled context.
    pub fn new(
        db_path: &str,
        provider: Arc<dyn ChatProvider>,
        registry: ToolRegistry,
        config: OrchestratorConfig,
        system_prompt: impl Into<String>,
    ) -> Result<Self> {
        let memory: Arc<dyn Memory> = Arc::new(SqliteMemory::open(db_path)?);
        let hub = Arc::new(SubscriberHub::new(config.hub));
        let cache = Arc::new(ToolCache::new(TOOL_CACHE_CAPACITY, Duration::from_secs(TOOL_CACHE_TTL_SECS)));
        let pipeline = ToolExecutionPipeline::new(registry.clone(), cache, Arc::clone(&memory));
        let step_store = StepContextStore::new(Duration::from_secs(STEP_STORE_TTL_SECS));

        let hub_task = hub::spawn_background_tasks(Arc::clone(&hub));
        let driver = Arc::new(LoopDriver::new(
            step_store,
            Arc::clone(&memory),
            provider,
            registry,
            pipeline,
            Arc::clone(&hub),
            config,
            system_prompt,
        ));

        Ok(Self { driver, memory, hub, hub_task })
    }

    /// Run one Stage A request (fresh step or resume), returning the NDJSON
    /// line stream's event source.
    pub async fn handle_chat(&self, request: ChatRequest) -> Result<BoxStream<'static, Event>> {
        self.driver.run_step(request).await
    }

    /// Handle to the Loop Driver, for callers that need direct access (the
    /// HTTP transport's Stage B route subscribes to the hub directly rather
    /// than going through this).
    #[must_use]
    pub fn driver(&self) -> Arc<LoopDriver> {
        Arc::clone(&self.driver)
    }

    /// Apply a runtime configuration patch.
    pub async fn update_config(&self, patch: crate::config::ConfigPatch) {
        let mut config = self.driver.config_snapshot().await;
        config.merge(patch);
        self.driver.set_config(config).await;
    }

    /// Verify the audit chain for a scope. Exposed for an operator-facing
    /// `/v1/audit/verify` style endpoint.
    pub async fn verify_audit_chain(&self, user_id: &str, conversation_id: &str) -> Result<ChainVerification> {
        self.memory.verify_chain(user_id, conversation_id).await
    }

    /// Notify the driver that a caller disconnected mid-step.
    pub async fn cancel_step(&self, step_id: &str) {
        self.driver.cancel_step(step_id).await;
    }

    /// Subscribe to a step's Stage B event stream.
    pub async fn subscribe(&self, step_id: &str) -> BoxStream<'static, crate::hub::HubMessage> {
        self.hub.subscribe(step_id).await
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.hub_task.abort();
    }
}
