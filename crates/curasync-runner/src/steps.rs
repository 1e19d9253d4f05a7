//! Translation of workflow steps into commands.

use curasync_core::executor::{CommandResult, CommandSpec};
use curasync_core::workflow::StepAction;
use std::collections::BTreeMap;
use std::path::Path;

/// Where the repository comes from when the workspace has no checkout yet.
#[derive(Debug, Clone, Default)]
pub struct CheckoutSource {
    pub clone_url: Option<String>,
    pub access_token: Option<String>,
}

impl CheckoutSource {
    /// Clone URL with the access token embedded, if one is set.
    /// https://github.com/owner/repo.git -> https://token@github.com/owner/repo.git
    fn authenticated_url(&self) -> Option<String> {
        let url = self.clone_url.as_deref()?;
        Some(match (&self.access_token, url.strip_prefix("https://")) {
            (Some(token), Some(rest)) => format!("https://{}@{}", token, rest),
            _ => url.to_string(),
        })
    }
}

/// Commands for a step, in execution order.
///
/// `has_checkout` tells whether `workspace` already holds a git repository.
pub fn plan_commands(
    action: &StepAction,
    workspace: &Path,
    has_checkout: bool,
    source: &CheckoutSource,
    env: &BTreeMap<String, String>,
) -> Result<Vec<CommandSpec>, String> {
    let git = |args: &[&str]| {
        CommandSpec::new("git")
            .args(args.iter().copied())
            .envs(env)
            .current_dir(workspace)
    };

    let commands = match action {
        StepAction::Checkout { depth, branch } => {
            let depth = depth.to_string();
            if has_checkout {
                vec![
                    git(&["fetch", "--depth", depth.as_str(), "origin", branch.as_str()]),
                    git(&["checkout", "--force", "FETCH_HEAD"]),
                ]
            } else {
                let url = source
                    .authenticated_url()
                    .ok_or_else(|| "no repository to check out: workspace is empty and no clone URL is known".to_string())?;
                vec![
                    CommandSpec::new("git")
                        .args(["clone", "--depth", depth.as_str(), "--branch", branch.as_str(), "--single-branch"])
                        .arg(url)
                        .arg(workspace.to_string_lossy())
                        .envs(env),
                ]
            }
        }
        StepAction::Pull { remote, branch } => {
            if !has_checkout {
                return Err(format!("cannot pull: {} is not a git checkout", workspace.display()));
            }
            vec![git(&["pull", "--ff-only", remote.as_str(), branch.as_str()])]
        }
        StepAction::Provision { tool, .. } => vec![
            CommandSpec::new(tool.clone())
                .arg("--version")
                .envs(env)
                .current_dir(workspace),
        ],
        StepAction::Install { command } | StepAction::Run { command } => {
            let spec = CommandSpec::from_argv(command)
                .ok_or_else(|| "empty command".to_string())?;
            vec![spec.envs(env).current_dir(workspace)]
        }
    };

    Ok(commands)
}

/// Check a finished command against what the step requires.
pub fn check_result(action: &StepAction, spec: &CommandSpec, result: &CommandResult) -> Result<(), String> {
    if !result.success() {
        return Err(match result.exit_code {
            Some(code) => format!("'{}' exited with code {}", spec.program, code),
            None => format!("'{}' was terminated by a signal", spec.program),
        });
    }

    if let StepAction::Provision { tool, version } = action {
        if !result.stdout.contains(version.as_str()) {
            return Err(format!(
                "{} {} is required, found: {}",
                tool,
                version,
                result.stdout.lines().next().unwrap_or("").trim()
            ));
        }
    }

    Ok(())
}
