//! Workflow commands: run, validate, show.

use anyhow::{Context, Result};
use curasync_config::{VariableContext, default_workflow, load_workflow};
use curasync_core::executor::LogStream;
use curasync_core::push::PushEvent;
use curasync_core::workflow::{JobRun, StepAction, StepStatus, TriggerInfo, Workflow};
use curasync_runner::{JobContext, JobEvent, JobRunner, LocalProcessExecutor, matches_manual};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn workflow_from(config: Option<&Path>) -> Result<Workflow> {
    match config {
        Some(path) => load_workflow(path)
            .with_context(|| format!("Failed to load workflow: {}", path.display())),
        None => default_workflow().context("Built-in workflow is invalid"),
    }
}

fn read_push_event(path: &Path) -> Result<Option<PushEvent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event payload: {}", path.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Event payload is not JSON: {}", path.display()))?;
    Ok(PushEvent::from_github_payload(&payload))
}

/// Run the workflow locally for a push event (or by hand).
pub async fn run(
    config: Option<PathBuf>,
    event: Option<PathBuf>,
    workspace: PathBuf,
    force: bool,
) -> Result<()> {
    let workflow = workflow_from(config.as_deref())?;
    let push = match &event {
        Some(path) => read_push_event(path)?,
        None => None,
    };

    let run = match &push {
        Some(push) => match JobRunner::dispatch(&workflow, push) {
            Some(run) => run,
            None if force => JobRun::new(workflow.name.clone(), TriggerInfo::manual()),
            None => {
                println!(
                    "Push to {:?} does not match the triggers of '{}', nothing to do",
                    push.branch, workflow.name
                );
                return Ok(());
            }
        },
        None if force || matches_manual(&workflow) => {
            JobRun::new(workflow.name.clone(), TriggerInfo::manual())
        }
        None => anyhow::bail!(
            "No push event given and '{}' has no manual trigger (use --force)",
            workflow.name
        ),
    };

    let mut variables = VariableContext::from_process_env();
    let missing = variables.load_secrets_from_env(&workflow.secrets);
    if !missing.is_empty() {
        eprintln!("Missing secrets: {}", missing.join(", "));
    }
    match &push {
        Some(push) => variables.populate_git_from_push(push),
        None => variables.populate_git_from_ci(),
    }

    let workspace = std::path::absolute(&workspace)
        .with_context(|| format!("Failed to resolve workspace: {}", workspace.display()))?;
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create workspace: {}", workspace.display()))?;

    println!("Running workflow: {}", workflow.name);
    println!("Run: {}", run.id);
    println!("Workspace: {}", workspace.display());

    let ctx = JobContext::new(run, workspace, variables)
        .with_access_token(std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()));
    let runner = JobRunner::new(Arc::new(LocalProcessExecutor::new()));

    println!("\n--- Starting workflow execution ---\n");

    let (mut rx, result_handle) = runner.execute(&workflow, ctx);

    while let Some(event) = rx.recv().await {
        match event {
            JobEvent::JobStarted { .. } => {}
            JobEvent::StepStarted { step } => {
                println!("▶ Step '{}' started", step);
            }
            JobEvent::StepLog { step, line } => {
                let stream_marker = match line.stream {
                    LogStream::Stdout => " ",
                    LogStream::Stderr => "!",
                    LogStream::System => "*",
                };
                println!("  [{}]{} {}", step, stream_marker, line.content);
            }
            JobEvent::StepCompleted { step, status } => {
                if status.is_success() {
                    println!("✓ Step '{}' completed successfully\n", step);
                } else {
                    println!("✗ Step '{}' failed\n", step);
                }
            }
            JobEvent::JobCompleted { status } => {
                println!("--- Workflow finished: {:?} ---", status);
            }
        }
    }

    let result = result_handle
        .await
        .context("Workflow execution task failed")?;

    println!("\n--- Step Summary ---");
    for step in &result.steps {
        let status = match &step.status {
            StepStatus::Succeeded => "✓ succeeded".to_string(),
            StepStatus::Failed { message } => format!("✗ failed: {}", message),
            StepStatus::Skipped { reason } => format!("⊘ skipped: {}", reason),
            StepStatus::Pending => "○ pending".to_string(),
            StepStatus::Running => "▶ running".to_string(),
        };
        println!("  {} - {}", step.name, status);
    }

    if result.success() {
        println!("\n✓ Workflow succeeded!");
        Ok(())
    } else {
        anyhow::bail!("Workflow failed: {:?}", result.status);
    }
}

pub fn validate(path: &Path) -> Result<()> {
    match load_workflow(path) {
        Ok(workflow) => {
            println!(
                "Workflow '{}' is valid ({} steps)",
                workflow.name,
                workflow.steps.len()
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

pub fn show(config: Option<PathBuf>) -> Result<()> {
    let workflow = workflow_from(config.as_deref())?;

    println!("Workflow: {}", workflow.name);
    for trigger in &workflow.triggers {
        println!("  on: {:?}", trigger);
    }
    if !workflow.secrets.is_empty() {
        println!("  secrets: {}", workflow.secrets.join(", "));
    }
    for (key, value) in &workflow.env {
        println!("  env {}={}", key, value);
    }
    for (index, step) in workflow.steps.iter().enumerate() {
        let detail = match &step.action {
            StepAction::Checkout { depth, branch } => format!("depth={} branch={}", depth, branch),
            StepAction::Pull { remote, branch } => format!("{} {}", remote, branch),
            StepAction::Provision { tool, version } => format!("{} {}", tool, version),
            StepAction::Install { command } | StepAction::Run { command } => command.join(" "),
        };
        println!("  {}. {} [{}] {}", index + 1, step.name, step.action.kind(), detail);
    }
    Ok(())
}
