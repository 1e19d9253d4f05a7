//! Webhook server for curasync.
//!
//! Receives GitHub push events and queues a workflow run for each matching push.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
