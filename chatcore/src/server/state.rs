//! Shared router state.

use std::sync::Arc;

use crate::orchestrator::Orchestrator;

/// State shared across every route.
#[derive(Clone)]
pub struct AppState {
    /// The orchestration core.
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Wrap an orchestrator for use as router state.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}
