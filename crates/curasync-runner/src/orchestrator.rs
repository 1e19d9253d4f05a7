//! Job runner - executes workflow steps strictly in declaration order.

use chrono::Utc;
use curasync_config::VariableContext;
use curasync_core::RunId;
use curasync_core::executor::{Executor, LogLine};
use curasync_core::push::PushEvent;
use curasync_core::workflow::{
    JobRun, JobStatus, Step, StepAction, StepResult, StepStatus, TriggerInfo, TriggerKind,
    Workflow,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::steps::{CheckoutSource, check_result, plan_commands};
use crate::trigger::matches_push;

/// Event emitted during job execution.
#[derive(Debug, Clone)]
pub enum JobEvent {
    JobStarted { run_id: RunId },
    StepStarted { step: String },
    StepLog { step: String, line: LogLine },
    StepCompleted { step: String, status: StepStatus },
    JobCompleted { status: JobStatus },
}

/// Result of a job execution.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub run: JobRun,
    pub status: JobStatus,
    pub steps: Vec<StepResult>,
}

impl JobResult {
    pub fn success(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded)
    }
}

/// Everything a job needs besides the workflow itself.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub run: JobRun,
    /// Directory the repository is checked out into and commands run in.
    pub workspace: PathBuf,
    pub source: CheckoutSource,
    /// Variables for interpolation; secrets declared by the workflow must already be loaded.
    pub variables: VariableContext,
}

impl JobContext {
    pub fn new(run: JobRun, workspace: PathBuf, variables: VariableContext) -> Self {
        let source = CheckoutSource {
            clone_url: run.trigger.clone_url.clone(),
            access_token: None,
        };
        Self {
            run,
            workspace,
            source,
            variables,
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        if let Some(token) = &token {
            // The token ends up in clone URLs and must never reach the logs
            self.variables
                .secrets
                .insert("__checkout_token".to_string(), token.clone());
        }
        self.source.access_token = token;
        self
    }
}

/// Runs workflows through an executor.
pub struct JobRunner {
    executor: Arc<dyn Executor>,
}

impl JobRunner {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Decide whether a push event starts a run. At most one run is created per event,
    /// however many triggers match.
    pub fn dispatch(workflow: &Workflow, push: &PushEvent) -> Option<JobRun> {
        if !matches_push(workflow, push) {
            info!(
                workflow = %workflow.name,
                branch = ?push.branch,
                "Trigger conditions not met, skipping"
            );
            return None;
        }

        let run = JobRun::new(
            workflow.name.clone(),
            TriggerInfo {
                kind: TriggerKind::Push,
                actor: Some(push.pusher.clone()),
                branch: push.branch.clone(),
                sha: Some(push.after.clone()),
                clone_url: push.clone_url.clone(),
            },
        );
        info!(workflow = %workflow.name, run_id = %run.id, sha = %push.short_sha(), "Dispatched run");
        Some(run)
    }

    /// Execute a workflow, returning a channel of events and a handle to get the final result.
    pub fn execute(
        &self,
        workflow: &Workflow,
        ctx: JobContext,
    ) -> (mpsc::Receiver<JobEvent>, tokio::task::JoinHandle<JobResult>) {
        let (tx, rx) = mpsc::channel(100);
        let executor = self.executor.clone();
        let workflow = workflow.clone();

        let handle =
            tokio::spawn(async move { Self::execute_inner(executor, workflow, ctx, tx).await });

        (rx, handle)
    }

    async fn execute_inner(
        executor: Arc<dyn Executor>,
        workflow: Workflow,
        mut ctx: JobContext,
        tx: mpsc::Sender<JobEvent>,
    ) -> JobResult {
        let run = ctx.run.clone();
        let _ = tx.send(JobEvent::JobStarted { run_id: run.id }).await;
        info!(run_id = %run.id, workflow = %workflow.name, "Job started");

        let trigger = match run.trigger.kind {
            TriggerKind::Push => "push",
            TriggerKind::Manual => "manual",
        };
        ctx.variables.enter_run(&workflow.name, run.id.to_string(), trigger);

        let mut steps: Vec<StepResult> = workflow
            .steps
            .iter()
            .map(|s| StepResult {
                name: s.name.clone(),
                status: StepStatus::Pending,
                started_at: None,
                finished_at: None,
            })
            .collect();

        let env = match resolve_environment(&workflow, &mut ctx.variables) {
            Ok(env) => env,
            Err(message) => {
                error!(run_id = %run.id, error = %message, "Environment could not be resolved");
                for step in &mut steps {
                    step.status = StepStatus::Skipped {
                        reason: "environment not resolved".to_string(),
                    };
                }
                let status = JobStatus::Failed {
                    step: None,
                    message,
                };
                return Self::finish(run, status, steps, &tx).await;
            }
        };

        let mut failure: Option<JobStatus> = None;

        for (index, step) in workflow.steps.iter().enumerate() {
            if let Some(JobStatus::Failed { step: failed, .. }) = &failure {
                steps[index].status = StepStatus::Skipped {
                    reason: format!(
                        "step '{}' failed",
                        failed.as_deref().unwrap_or_default()
                    ),
                };
                continue;
            }

            ctx.variables.enter_step(&step.name, index);

            let _ = tx
                .send(JobEvent::StepStarted {
                    step: step.name.clone(),
                })
                .await;
            steps[index].started_at = Some(Utc::now());

            let outcome = Self::execute_step(&executor, step, &ctx, &env, &tx).await;
            steps[index].finished_at = Some(Utc::now());

            let status = match outcome {
                Ok(()) => {
                    info!(step = %step.name, "Step completed successfully");
                    StepStatus::Succeeded
                }
                Err(message) => {
                    let message = ctx.variables.mask(&message);
                    error!(step = %step.name, error = %message, "Step failed");
                    failure = Some(JobStatus::Failed {
                        step: Some(step.name.clone()),
                        message: message.clone(),
                    });
                    StepStatus::Failed { message }
                }
            };

            steps[index].status = status.clone();
            let _ = tx
                .send(JobEvent::StepCompleted {
                    step: step.name.clone(),
                    status,
                })
                .await;
        }

        let status = failure.unwrap_or(JobStatus::Succeeded);
        Self::finish(run, status, steps, &tx).await
    }

    async fn finish(
        run: JobRun,
        status: JobStatus,
        steps: Vec<StepResult>,
        tx: &mpsc::Sender<JobEvent>,
    ) -> JobResult {
        let _ = tx
            .send(JobEvent::JobCompleted {
                status: status.clone(),
            })
            .await;
        info!(run_id = %run.id, ?status, "Job finished");
        JobResult { run, status, steps }
    }

    /// Execute a single step: every planned command must succeed.
    async fn execute_step(
        executor: &Arc<dyn Executor>,
        step: &Step,
        ctx: &JobContext,
        env: &BTreeMap<String, String>,
        tx: &mpsc::Sender<JobEvent>,
    ) -> Result<(), String> {
        let mut full_env = env.clone();
        full_env.extend(ctx.variables.interpolate_map(&step.env));

        let action = interpolate_action(&step.action, &ctx.variables);
        let has_checkout = ctx.workspace.join(".git").exists();
        let commands = plan_commands(&action, &ctx.workspace, has_checkout, &ctx.source, &full_env)?;

        for spec in commands {
            let unresolved: Vec<String> = std::iter::once(&spec.program)
                .chain(&spec.args)
                .flat_map(|a| ctx.variables.unresolved(a))
                .collect();
            if !unresolved.is_empty() {
                return Err(format!("unresolved variables: {}", unresolved.join(", ")));
            }

            info!(step = %step.name, command = %ctx.variables.mask(&spec.display()), "Running command");

            let (log_tx, mut log_rx) = mpsc::channel::<LogLine>(100);
            let step_name = step.name.clone();
            let events = tx.clone();
            let variables = ctx.variables.clone();

            let forwarder = tokio::spawn(async move {
                while let Some(mut line) = log_rx.recv().await {
                    line.content = variables.mask(&line.content);
                    let _ = events
                        .send(JobEvent::StepLog {
                            step: step_name.clone(),
                            line,
                        })
                        .await;
                }
            });

            let result = executor.run(spec.clone(), log_tx).await;
            if let Err(e) = forwarder.await {
                warn!(step = %step.name, error = %e, "Log forwarding task failed");
            }

            let result = result.map_err(|e| e.to_string())?;
            check_result(&action, &spec, &result)?;
        }

        Ok(())
    }
}

/// Resolve the workflow environment before any step runs.
///
/// Every declared secret must be loaded and every environment value must resolve
/// to a non-empty string. The resolved values become visible as `${env.*}`.
fn resolve_environment(
    workflow: &Workflow,
    variables: &mut VariableContext,
) -> Result<BTreeMap<String, String>, String> {
    let missing: Vec<&str> = workflow
        .secrets
        .iter()
        .filter(|name| variables.secrets.get(*name).is_none_or(|v| v.is_empty()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing secrets: {}", missing.join(", ")));
    }

    let mut resolved = BTreeMap::new();
    for (key, raw) in &workflow.env {
        let unresolved = variables.unresolved(raw);
        if !unresolved.is_empty() {
            return Err(format!(
                "{} references unresolved variables: {}",
                key,
                unresolved.join(", ")
            ));
        }
        let value = variables.interpolate(raw);
        if value.is_empty() {
            return Err(format!("{} resolved to an empty value", key));
        }
        resolved.insert(key.clone(), value);
    }

    variables
        .env
        .extend(resolved.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(resolved)
}

fn interpolate_action(action: &StepAction, variables: &VariableContext) -> StepAction {
    match action {
        StepAction::Checkout { depth, branch } => StepAction::Checkout {
            depth: *depth,
            branch: variables.interpolate(branch),
        },
        StepAction::Pull { remote, branch } => StepAction::Pull {
            remote: variables.interpolate(remote),
            branch: variables.interpolate(branch),
        },
        StepAction::Provision { tool, version } => StepAction::Provision {
            tool: variables.interpolate(tool),
            version: variables.interpolate(version),
        },
        StepAction::Install { command } => StepAction::Install {
            command: variables.interpolate_all(command),
        },
        StepAction::Run { command } => StepAction::Run {
            command: variables.interpolate_all(command),
        },
    }
}
