//! The runtime-overridable configuration surface (`SPEC_FULL.md` §6).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How historical and current-step tool frames are rendered by the
/// [`crate::assembler::ContextAssembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolContextRenderMode {
    /// Emit full tool frames everywhere, historical and current alike.
    AllTool,
    /// Summarize historical tool frames; render the current step in full.
    /// The recommended default.
    CurrentToolHistorySummary,
    /// Summarize tool frames everywhere.
    AllSummary,
}

impl Default for ToolContextRenderMode {
    fn default() -> Self {
        Self::CurrentToolHistorySummary
    }
}

/// Dedup-ledger specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Whether the ledger lookup/write path is active at all.
    pub enabled: bool,
    /// Default ledger row lifetime.
    pub default_ttl_seconds: u64,
    /// Ceiling a caller-supplied `ttlSeconds` override may not exceed.
    pub max_ttl_seconds: u64,
    /// Argument field names dropped before canonicalization/hashing.
    pub ignore_args: Vec<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: 3600,
            max_ttl_seconds: 86_400,
            ignore_args: vec![
                "timestamp".to_string(),
                "requestId".to_string(),
                "nonce".to_string(),
            ],
        }
    }
}

/// Subscriber hub timing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HubConfig {
    /// Interval between heartbeat/ping frames sent to idle subscribers.
    pub heartbeat_every_secs: u64,
    /// Idle time after which a stepId's channels are evicted.
    pub step_ttl_secs: u64,
    /// How often the janitor sweep runs.
    pub janitor_every_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_every_secs: 20,
            step_ttl_secs: 600,
            janitor_every_secs: 60,
        }
    }
}

impl HubConfig {
    /// Heartbeat interval as a [`Duration`].
    #[must_use]
    pub const fn heartbeat_every(&self) -> Duration {
        Duration::from_secs(self.heartbeat_every_secs)
    }

    /// Step TTL as a [`Duration`].
    #[must_use]
    pub const fn step_ttl(&self) -> Duration {
        Duration::from_secs(self.step_ttl_secs)
    }

    /// Janitor sweep period as a [`Duration`].
    #[must_use]
    pub const fn janitor_every(&self) -> Duration {
        Duration::from_secs(self.janitor_every_secs)
    }
}

/// The full, mergeable orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Named model profile to route decisions through.
    pub model: String,
    /// Hard ceiling on `loop` within a single step.
    pub tools_max_loops: u32,
    /// Per-tool enable/disable switches. Absent entries default to enabled.
    pub tool_toggles: HashMap<String, bool>,
    /// How many FINAL history rows the assembler loads for a scope.
    pub memory_max_messages: u32,
    /// Per-tool-call timeout.
    pub client_timeout_ms: u64,
    /// Overall step deadline.
    pub stream_timeout_ms: u64,
    /// Dedup ledger settings.
    pub dedup: DedupConfig,
    /// Subscriber hub timing.
    pub hub: HubConfig,
    /// Historical/current tool frame rendering policy.
    pub tool_context_render_mode: ToolContextRenderMode,
}

impl OrchestratorConfig {
    const DEFAULT_MODEL: &'static str = "default";
    const DEFAULT_TOOLS_MAX_LOOPS: u32 = 8;
    const DEFAULT_MEMORY_MAX_MESSAGES: u32 = 50;
    const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 30_000;
    const DEFAULT_STREAM_TIMEOUT_MS: u64 = 120_000;

    /// Whether a named tool is enabled. Unconfigured tools default to enabled.
    #[must_use]
    pub fn tool_enabled(&self, name: &str) -> bool {
        self.tool_toggles.get(name).copied().unwrap_or(true)
    }

    /// Apply a PUT-merge: present keys in `patch` override, absent keys are
    /// retained. An explicit (but present) empty `tool_toggles` map clears
    /// all toggles, per `SPEC_FULL.md` §6.
    pub fn merge(&mut self, patch: ConfigPatch) {
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(v) = patch.tools_max_loops {
            self.tools_max_loops = v;
        }
        if let Some(toggles) = patch.tool_toggles {
            self.tool_toggles = toggles;
        }
        if let Some(v) = patch.memory_max_messages {
            self.memory_max_messages = v;
        }
        if let Some(v) = patch.client_timeout_ms {
            self.client_timeout_ms = v;
        }
        if let Some(v) = patch.stream_timeout_ms {
            self.stream_timeout_ms = v;
        }
        if let Some(dedup) = patch.dedup {
            self.dedup = dedup;
        }
        if let Some(hub) = patch.hub {
            self.hub = hub;
        }
        if let Some(mode) = patch.tool_context_render_mode {
            self.tool_context_render_mode = mode;
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: Self::DEFAULT_MODEL.to_string(),
            tools_max_loops: Self::DEFAULT_TOOLS_MAX_LOOPS,
            tool_toggles: HashMap::new(),
            memory_max_messages: Self::DEFAULT_MEMORY_MAX_MESSAGES,
            client_timeout_ms: Self::DEFAULT_CLIENT_TIMEOUT_MS,
            stream_timeout_ms: Self::DEFAULT_STREAM_TIMEOUT_MS,
            dedup: DedupConfig::default(),
            hub: HubConfig::default(),
            tool_context_render_mode: ToolContextRenderMode::default(),
        }
    }
}

/// A partial, runtime-supplied configuration update (PUT merge semantics).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    /// Overrides `model` when present.
    pub model: Option<String>,
    /// Overrides `tools_max_loops` when present.
    pub tools_max_loops: Option<u32>,
    /// Full-replace of `tool_toggles` when present (an explicit empty map
    /// clears all existing toggles).
    pub tool_toggles: Option<HashMap<String, bool>>,
    /// Overrides `memory_max_messages` when present.
    pub memory_max_messages: Option<u32>,
    /// Overrides `client_timeout_ms` when present.
    pub client_timeout_ms: Option<u64>,
    /// Overrides `stream_timeout_ms` when present.
    pub stream_timeout_ms: Option<u64>,
    /// Full-replace of `dedup` when present.
    pub dedup: Option<DedupConfig>,
    /// Full-replace of `hub` when present.
    pub hub: Option<HubConfig>,
    /// Overrides `tool_context_render_mode` when present.
    pub tool_context_render_mode: Option<ToolContextRenderMode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tool_is_enabled() {
        let cfg = OrchestratorConfig::default();
        assert!(cfg.tool_enabled("web_search"));
    }

    #[test]
    fn merge_overrides_present_keys_only() {
        let mut cfg = OrchestratorConfig::default();
        let original_model = cfg.model.clone();
        cfg.merge(ConfigPatch {
            tools_max_loops: Some(3),
            ..Default::default()
        });
        assert_eq!(cfg.tools_max_loops, 3);
        assert_eq!(cfg.model, original_model);
    }

    #[test]
    fn merge_with_empty_toggle_map_clears_toggles() {
        let mut cfg = OrchestratorConfig::default();
        cfg.tool_toggles.insert("web_search".to_string(), false);
        cfg.merge(ConfigPatch {
            tool_toggles: Some(HashMap::new()),
            ..Default::default()
        });
        assert!(cfg.tool_enabled("web_search"));
    }
}
