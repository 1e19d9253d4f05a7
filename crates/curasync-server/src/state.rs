//! Application state.

use curasync_core::workflow::Workflow;
use curasync_runner::JobQueue;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<Workflow>,
    pub queue: Arc<JobQueue>,
    /// Secret for `X-Hub-Signature-256`; signatures are not checked when unset.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(workflow: Arc<Workflow>, queue: Arc<JobQueue>, webhook_secret: Option<String>) -> Self {
        Self {
            workflow,
            queue,
            webhook_secret: webhook_secret.map(Arc::from),
        }
    }
}
