//! Workflow, step and job run definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::RunId;

/// A push-triggered workflow: triggers, declared environment and an ordered list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name (e.g., "upload-new-asset").
    pub name: String,
    /// Triggers that can start this workflow.
    pub triggers: Vec<Trigger>,
    /// Environment declared for every step. Values may reference `${env.*}` and `${secrets.*}`.
    pub env: BTreeMap<String, String>,
    /// Names of secrets that must be present in the runner environment.
    pub secrets: Vec<String>,
    /// Steps, executed strictly in declaration order.
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// What starts a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Trigger {
    /// Triggered on push to matching branches.
    Push {
        branches: Vec<String>,
        paths: Option<Vec<String>>,
    },
    /// Started by hand from the CLI.
    Manual,
}

/// A single step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub action: StepAction,
    /// Step-specific environment, layered over the workflow environment.
    pub env: BTreeMap<String, String>,
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepAction {
    /// Fetch the source at a limited history depth.
    Checkout { depth: u32, branch: String },
    /// Fast-forward the working copy to the remote branch.
    Pull { remote: String, branch: String },
    /// Require a tool at a given version to be available.
    Provision { tool: String, version: String },
    /// Install declared dependencies.
    Install { command: Vec<String> },
    /// Run a command.
    Run { command: Vec<String> },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Checkout { .. } => "checkout",
            StepAction::Pull { .. } => "pull",
            StepAction::Provision { .. } => "provision",
            StepAction::Install { .. } => "install",
            StepAction::Run { .. } => "run",
        }
    }
}

/// A job run instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: RunId,
    pub workflow: String,
    pub trigger: TriggerInfo,
    pub created_at: DateTime<Utc>,
}

impl JobRun {
    pub fn new(workflow: impl Into<String>, trigger: TriggerInfo) -> Self {
        Self {
            id: RunId::new(),
            workflow: workflow.into(),
            trigger,
            created_at: Utc::now(),
        }
    }
}

/// Information about what triggered a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub kind: TriggerKind,
    pub actor: Option<String>,
    pub branch: Option<String>,
    pub sha: Option<String>,
    pub clone_url: Option<String>,
}

impl TriggerInfo {
    pub fn manual() -> Self {
        Self {
            kind: TriggerKind::Manual,
            actor: None,
            branch: None,
            sha: None,
            clone_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    Push,
    Manual,
}

/// Overall job status. A job is either running or terminated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Succeeded,
    /// `step` is `None` when the job failed before any step started.
    Failed {
        step: Option<String>,
        message: String,
    },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Status of a step within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed { message: String },
    Skipped { reason: String },
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed { .. } | StepStatus::Skipped { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Succeeded)
    }
}

/// Result of a step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(
            JobStatus::Failed {
                step: Some("install".to_string()),
                message: "exit 1".to_string()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_step_status() {
        assert!(StepStatus::Succeeded.is_success());
        assert!(!StepStatus::Pending.is_terminal());
        assert!(
            StepStatus::Skipped {
                reason: "earlier step failed".to_string()
            }
            .is_terminal()
        );
    }
}
