#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(tail_expr_drop_order)]
//! A two-stage, auditable chat tool-orchestration core: a Loop Driver that
//! turns a user turn into zero or more tool calls and a final answer,
//! backed by a hash-chained memory/audit trail and a dedup ledger, with a
//! Stage A (request-scoped) and Stage B (stepId-keyed) event surface that
//! agree on every event emitted for a step.
extern crate self as chatcore;

pub mod assembler;
pub mod canon;
pub mod config;
pub mod decision;
pub mod driver;
pub mod error;
pub mod hub;
pub mod memory;
pub mod message;
pub mod orchestrator;
pub mod step_store;
pub mod tool;
pub mod types;

#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

pub use config::{ConfigPatch, OrchestratorConfig};
pub use driver::LoopDriver;
pub use error::{OrchestratorError, Result};
pub use orchestrator::Orchestrator;
