//! In-memory job queue and the worker that drains it.

use curasync_config::VariableContext;
use curasync_core::push::PushEvent;
use curasync_core::workflow::{JobRun, Workflow};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{RunnerError, RunnerResult};
use crate::orchestrator::{JobContext, JobEvent, JobResult, JobRunner};

// Delivery ids remembered for de-duplication.
const SEEN_DELIVERIES: usize = 1024;

/// A dispatched run waiting for the worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub run: JobRun,
    pub push: PushEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The delivery was seen before; nothing was queued.
    Duplicate,
}

#[derive(Debug, Default)]
struct SeenDeliveries {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenDeliveries {
    /// Record an id, returning false if it was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= SEEN_DELIVERIES {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    fn forget(&mut self, id: &str) {
        self.ids.remove(id);
        self.order.retain(|d| d != id);
    }
}

/// Bounded queue of jobs. Redelivered webhooks are recognised by their delivery id.
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
    seen: Mutex<SeenDeliveries>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<QueuedJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                seen: Mutex::new(SeenDeliveries::default()),
            },
            rx,
        )
    }

    /// Queue a job without waiting. A full queue is an error, not backpressure.
    pub fn enqueue(&self, delivery_id: Option<&str>, job: QueuedJob) -> RunnerResult<EnqueueOutcome> {
        if let Some(id) = delivery_id {
            let mut seen = self
                .seen
                .lock()
                .map_err(|_| curasync_core::Error::Internal("delivery set poisoned".to_string()))?;
            if !seen.insert(id) {
                debug!(delivery = %id, "Ignoring redelivered webhook");
                return Ok(EnqueueOutcome::Duplicate);
            }
        }

        let run_id = job.run.id;
        match self.tx.try_send(job) {
            Ok(()) => {
                info!(%run_id, "Job queued");
                Ok(EnqueueOutcome::Queued)
            }
            Err(e) => {
                // Let a retry of the same delivery through
                if let (Some(id), Ok(mut seen)) = (delivery_id, self.seen.lock()) {
                    seen.forget(id);
                }
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => RunnerError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => RunnerError::QueueClosed,
                })
            }
        }
    }
}

/// Jobs a worker finished before its queue closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub succeeded: usize,
    pub failed: usize,
}

impl WorkerStats {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Runs queued jobs one at a time.
pub struct Worker {
    id: String,
    jobs: mpsc::Receiver<QueuedJob>,
    runner: Arc<JobRunner>,
    workflow: Arc<Workflow>,
    workspace: PathBuf,
    access_token: Option<String>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        jobs: mpsc::Receiver<QueuedJob>,
        runner: Arc<JobRunner>,
        workflow: Arc<Workflow>,
        workspace: PathBuf,
    ) -> Self {
        Self {
            id: id.into(),
            jobs,
            runner,
            workflow,
            workspace,
            access_token: None,
        }
    }

    /// Token used when the workspace has to be cloned.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    /// Run the worker loop until every queue sender is dropped.
    ///
    /// Results are logged as each job finishes and then dropped; only the
    /// counts are kept.
    pub async fn run(mut self) -> WorkerStats {
        info!(worker_id = %self.id, "Starting worker");
        let mut stats = WorkerStats::default();

        while let Some(job) = self.jobs.recv().await {
            info!(worker_id = %self.id, run_id = %job.run.id, "Picked up job");
            match self.run_job(job).await {
                Some(result) if result.success() => {
                    stats.succeeded += 1;
                    info!(worker_id = %self.id, run_id = %result.run.id, "Job succeeded");
                }
                Some(result) => {
                    stats.failed += 1;
                    warn!(
                        worker_id = %self.id,
                        run_id = %result.run.id,
                        status = ?result.status,
                        "Job failed"
                    );
                }
                None => {
                    stats.failed += 1;
                    warn!(worker_id = %self.id, "Job task ended without a result");
                }
            }
        }

        info!(worker_id = %self.id, succeeded = stats.succeeded, failed = stats.failed, "Queue closed, worker stopping");
        stats
    }

    async fn run_job(&self, job: QueuedJob) -> Option<JobResult> {
        let mut variables = VariableContext::from_process_env();
        let missing = variables.load_secrets_from_env(&self.workflow.secrets);
        if !missing.is_empty() {
            warn!(run_id = %job.run.id, missing = ?missing, "Secrets not set in the environment");
        }
        variables.populate_git_from_push(&job.push);

        let run = job.run.id.short();
        let ctx = JobContext::new(job.run, self.workspace.clone(), variables)
            .with_access_token(self.access_token.clone());
        let (mut events, handle) = self.runner.execute(&self.workflow, ctx);

        while let Some(event) = events.recv().await {
            log_event(&run, &event);
        }

        match handle.await {
            Ok(result) => Some(result),
            Err(e) => {
                error!(error = %e, "Job task panicked");
                None
            }
        }
    }
}

fn log_event(run: &str, event: &JobEvent) {
    match event {
        JobEvent::JobStarted { run_id } => info!(%run, %run_id, "Job started"),
        JobEvent::StepStarted { step } => info!(%run, %step, "Step started"),
        JobEvent::StepLog { step, line } => {
            debug!(%run, %step, stream = ?line.stream, "{}", line.content)
        }
        JobEvent::StepCompleted { step, status } => info!(%run, %step, ?status, "Step completed"),
        JobEvent::JobCompleted { status } => info!(%run, ?status, "Job completed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use curasync_core::executor::{CommandResult, CommandSpec, Executor, LogLine};
    use curasync_core::workflow::TriggerInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job() -> QueuedJob {
        let payload = serde_json::json!({
            "ref": "refs/heads/main",
            "before": "0000000",
            "after": "2222222",
            "repository": { "full_name": "lab/curations" }
        });
        QueuedJob {
            run: JobRun::new("upload-new-asset", TriggerInfo::manual()),
            push: PushEvent::from_github_payload(&payload).unwrap(),
        }
    }

    #[test]
    fn test_duplicate_delivery_is_ignored() {
        let (queue, _rx) = JobQueue::new(4);
        assert_eq!(queue.enqueue(Some("d-1"), job()).unwrap(), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(Some("d-1"), job()).unwrap(), EnqueueOutcome::Duplicate);
        assert_eq!(queue.enqueue(Some("d-2"), job()).unwrap(), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(None, job()).unwrap(), EnqueueOutcome::Queued);
    }

    #[test]
    fn test_full_queue_rejects_and_forgets_delivery() {
        let (queue, _rx) = JobQueue::new(1);
        queue.enqueue(Some("d-1"), job()).unwrap();
        assert!(matches!(
            queue.enqueue(Some("d-2"), job()),
            Err(RunnerError::QueueFull)
        ));
        // Still full, but d-2 must not be reported as a duplicate
        assert!(matches!(
            queue.enqueue(Some("d-2"), job()),
            Err(RunnerError::QueueFull)
        ));
    }

    #[test]
    fn test_closed_queue() {
        let (queue, rx) = JobQueue::new(1);
        drop(rx);
        assert!(matches!(
            queue.enqueue(None, job()),
            Err(RunnerError::QueueClosed)
        ));
    }

    #[test]
    fn test_seen_deliveries_are_bounded() {
        let mut seen = SeenDeliveries::default();
        for i in 0..=SEEN_DELIVERIES {
            assert!(seen.insert(&i.to_string()));
        }
        assert_eq!(seen.order.len(), SEEN_DELIVERIES);
        // The oldest id was evicted
        assert!(seen.insert("0"));
    }

    /// Counts calls and exits with `exit_code`.
    struct CountingExecutor(AtomicUsize, i32);

    #[async_trait]
    impl Executor for CountingExecutor {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(
            &self,
            _spec: CommandSpec,
            _logs: mpsc::Sender<LogLine>,
        ) -> curasync_core::Result<CommandResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(CommandResult {
                exit_code: Some(self.1),
                stdout: String::new(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
            })
        }
    }

    async fn drain(exit_code: i32, jobs: usize) -> (WorkerStats, usize) {
        let workflow = curasync_config::parse_workflow(
            r#"
            workflow "echo"
            step "say" {
                run "echo" "${git.short_sha}"
            }
            "#,
        )
        .unwrap();
        let executor = Arc::new(CountingExecutor(AtomicUsize::new(0), exit_code));
        let runner = Arc::new(JobRunner::new(executor.clone()));
        let dir = tempfile::tempdir().unwrap();

        let (queue, rx) = JobQueue::new(jobs);
        for i in 0..jobs {
            queue.enqueue(Some(&i.to_string()), job()).unwrap();
        }
        drop(queue);

        let worker = Worker::new("w-1", rx, runner, Arc::new(workflow), dir.path().to_path_buf());
        let stats = worker.run().await;
        (stats, executor.0.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_worker_runs_jobs_sequentially() {
        let (stats, calls) = drain(0, 2).await;
        assert_eq!(stats, WorkerStats { succeeded: 2, failed: 0 });
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_worker_counts_failed_jobs() {
        let (stats, calls) = drain(1, 3).await;
        assert_eq!(stats, WorkerStats { succeeded: 0, failed: 3 });
        assert_eq!(stats.total(), 3);
        assert_eq!(calls, 3);
    }
}
