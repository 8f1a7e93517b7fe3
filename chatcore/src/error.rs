//! The orchestration core's error taxonomy.
//!
//! A single enum carries every failure mode the driver, store, pipeline and
//! memory layers can produce. Tool-level failures are not represented here —
//! those are captured as data in a [`crate::types::ToolResult`] and never
//! propagate as Rust errors.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors surfaced by the orchestration core.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed or invalid request: missing scope, unknown stepId, scope
    /// mismatch, unknown `tool_call_id`, or an invalid configuration value.
    #[error("bad request: {message}")]
    BadRequest {
        /// Human-readable explanation.
        message: String,
    },
    /// The model/decision adapter failed for the current iteration.
    #[error("decision adapter error: {message}")]
    Decision {
        /// Human-readable explanation.
        message: String,
    },
    /// A call or step deadline elapsed.
    #[error("timeout: {scope}")]
    Timeout {
        /// What timed out (e.g. "tool:web_search", "step").
        scope: String,
    },
    /// The caller disconnected or explicitly cancelled the step.
    #[error("step cancelled")]
    Cancelled,
    /// The durable store failed for a reason other than a raw SQLite error
    /// (e.g. a blocking task panicked).
    #[error("storage error: {message}")]
    Storage {
        /// Human-readable explanation.
        message: String,
    },
    /// The SQLite layer returned an error.
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A JSON (de)serialization error escaped an otherwise-handled boundary.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Build a [`OrchestratorError::BadRequest`].
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Build a [`OrchestratorError::Decision`].
    #[must_use]
    pub fn decision(message: impl Into<String>) -> Self {
        Self::Decision {
            message: message.into(),
        }
    }

    /// Build a [`OrchestratorError::Timeout`].
    #[must_use]
    pub fn timeout(scope: impl Into<String>) -> Self {
        Self::Timeout {
            scope: scope.into(),
        }
    }

    /// Build a [`OrchestratorError::Storage`].
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// The short error-kind tag used in the external `{error:{kind,message}}`
    /// payload (see `SPEC_FULL.md` §6/§7).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::Decision { .. } => "DECISION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Storage { .. } | Self::Sqlite(_) => "STORAGE_ERROR",
            Self::Json(_) => "BAD_REQUEST",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_bad_request() {
        let err = OrchestratorError::bad_request("unknown tool_call_id for this step: [bogus]");
        assert_eq!(err.kind(), "BAD_REQUEST");
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn kind_maps_decision_error() {
        let err = OrchestratorError::decision("upstream 500");
        assert_eq!(err.kind(), "DECISION_ERROR");
    }

    #[test]
    fn kind_maps_sqlite_error_to_storage() {
        let err = OrchestratorError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.kind(), "STORAGE_ERROR");
    }
}
