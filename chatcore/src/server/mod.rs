//! The ambient HTTP transport (`SPEC_FULL.md` §6): an axum router exposing
//! Stage A (`POST /v1/chat`, NDJSON body) and Stage B
//! (`GET /v1/steps/:step_id/events`, SSE). Feature-gated behind `server` so
//! library consumers that only need the orchestration core never pull in
//! `axum`/`tower-http`.

mod routes;
mod state;

pub use routes::router;
pub use state::AppState;
