//! curasync webhook server

use anyhow::Context;
use curasync_config::{ServerSettings, default_workflow, load_workflow};
use curasync_runner::{JobQueue, JobRunner, LocalProcessExecutor, Worker};
use curasync_server::{AppState, routes};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("CURASYNC_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let settings = ServerSettings::from_env().context("invalid server settings")?;

    let workflow = match &settings.workflow_path {
        Some(path) => load_workflow(path)
            .with_context(|| format!("failed to load workflow from {}", path.display()))?,
        None => default_workflow().context("built-in workflow is invalid")?,
    };
    info!(workflow = %workflow.name, steps = workflow.steps.len(), "Workflow loaded");
    let workflow = Arc::new(workflow);

    if settings.webhook_secret.is_none() {
        tracing::warn!("CURASYNC_WEBHOOK_SECRET is not set, webhook signatures will not be checked");
    }

    tokio::fs::create_dir_all(&settings.workspace)
        .await
        .with_context(|| format!("cannot create workspace {}", settings.workspace.display()))?;

    // One worker, so at most one job runs at a time
    let (queue, jobs) = JobQueue::new(settings.queue_capacity);
    let runner = Arc::new(JobRunner::new(Arc::new(LocalProcessExecutor::new())));
    let worker = Worker::new(
        "worker-1",
        jobs,
        runner,
        workflow.clone(),
        settings.workspace.clone(),
    )
    .with_access_token(settings.github_token.clone());
    let worker = tokio::spawn(worker.run());

    let state = AppState::new(workflow, Arc::new(queue), settings.webhook_secret.clone());
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    info!("Starting server on {}", settings.bind);
    let listener = TcpListener::bind(settings.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    // Dropping the router closed the queue; let the current job finish
    let stats = worker.await?;
    info!(succeeded = stats.succeeded, failed = stats.failed, "Worker stopped");

    Ok(())
}
