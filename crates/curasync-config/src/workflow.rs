//! Workflow configuration parsing.

use crate::{ConfigError, ConfigResult};
use curasync_core::workflow::{Step, StepAction, Trigger, Workflow};
use kdl::{KdlDocument, KdlNode};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

const DEFAULT_WORKFLOW: &str = include_str!("default_workflow.kdl");

/// The built-in upload workflow: push on `main`, shallow checkout, sync, toolchain,
/// install, then the uploader with bucket, parameter-store and secrets-store flags.
pub fn default_workflow() -> ConfigResult<Workflow> {
    parse_workflow(DEFAULT_WORKFLOW)
}

/// Read and parse a workflow file.
pub fn load_workflow(path: &Path) -> ConfigResult<Workflow> {
    parse_workflow(&std::fs::read_to_string(path)?)
}

/// Parse a workflow definition from KDL text.
pub fn parse_workflow(kdl: &str) -> ConfigResult<Workflow> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = String::new();
    let mut triggers = Vec::new();
    let mut env = BTreeMap::new();
    let mut secrets = Vec::new();
    let mut steps: Vec<Step> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "workflow" => {
                name = node
                    .arg()
                    .ok_or_else(|| ConfigError::MissingField("workflow name".to_string()))?;
            }
            "on" => {
                triggers.push(parse_trigger(node)?);
            }
            "env" => {
                env.extend(parse_env_block(node));
            }
            "secrets" => {
                secrets.extend(node.args());
            }
            "step" => {
                let step = parse_step(node)?;
                if steps.iter().any(|s| s.name == step.name) {
                    return Err(ConfigError::Duplicate(format!("step '{}'", step.name)));
                }
                steps.push(step);
            }
            _ => {}
        }
    }

    if name.is_empty() {
        return Err(ConfigError::MissingField("workflow name".to_string()));
    }

    if steps.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "steps for workflow '{}'",
            name
        )));
    }

    let mut seen = HashSet::new();
    secrets.retain(|s| seen.insert(s.clone()));

    Ok(Workflow {
        name,
        triggers,
        env,
        secrets,
        steps,
    })
}

/// `on "push" branches="main"` or `on "manual"`. A push trigger without
/// branches fires on every branch.
fn parse_trigger(node: &KdlNode) -> ConfigResult<Trigger> {
    match node.arg().as_deref() {
        Some("push") => {
            let mut branches = node.list("branches");
            if branches.is_empty() {
                branches.push("*".to_string());
            }
            let paths = Some(node.list("paths")).filter(|p| !p.is_empty());
            Ok(Trigger::Push { branches, paths })
        }
        Some("manual" | "") | None => Ok(Trigger::Manual),
        Some(other) => Err(ConfigError::InvalidValue {
            field: "trigger type".to_string(),
            message: format!("unknown trigger type: {}", other),
        }),
    }
}

fn parse_step(node: &KdlNode) -> ConfigResult<Step> {
    let name = node
        .arg()
        .ok_or_else(|| ConfigError::MissingField("step name".to_string()))?;

    let mut action = None;
    let mut env = BTreeMap::new();

    for child in node.child_nodes() {
        let parsed = match child.name().value() {
            "env" => {
                env.extend(parse_env_block(child));
                continue;
            }
            "checkout" => {
                let depth = child.int_prop("depth").unwrap_or(1);
                if depth < 1 || depth > i128::from(u32::MAX) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("checkout depth of step '{}'", name),
                        message: format!("must be a positive integer, got {}", depth),
                    });
                }
                StepAction::Checkout {
                    depth: depth as u32,
                    branch: child.prop("branch").unwrap_or_else(|| "main".to_string()),
                }
            }
            "pull" => StepAction::Pull {
                remote: child.prop("remote").unwrap_or_else(|| "origin".to_string()),
                branch: child.prop("branch").unwrap_or_else(|| "main".to_string()),
            },
            "provision" => {
                let tool = child.arg().ok_or_else(|| {
                    ConfigError::MissingField(format!("tool for step '{}'", name))
                })?;
                let version = child.prop("version").ok_or_else(|| {
                    ConfigError::MissingField(format!("version for step '{}'", name))
                })?;
                StepAction::Provision { tool, version }
            }
            "install" => StepAction::Install {
                command: require_command(child, &name)?,
            },
            "run" => StepAction::Run {
                command: require_command(child, &name)?,
            },
            _ => continue,
        };

        if action.is_some() {
            return Err(ConfigError::Duplicate(format!(
                "action in step '{}' (one action per step)",
                name
            )));
        }
        action = Some(parsed);
    }

    let action =
        action.ok_or_else(|| ConfigError::MissingField(format!("action for step '{}'", name)))?;

    Ok(Step { name, action, env })
}

fn require_command(node: &KdlNode, step: &str) -> ConfigResult<Vec<String>> {
    let command = node.args();
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "command for step '{}'",
            step
        )));
    }
    Ok(command)
}

fn parse_env_block(node: &KdlNode) -> BTreeMap<String, String> {
    node.child_nodes()
        .filter_map(|var| Some((var.name().value().to_string(), var.arg()?)))
        .collect()
}

/// Typed access to KDL node entries.
trait NodeExt {
    fn arg(&self) -> Option<String>;
    fn args(&self) -> Vec<String>;
    fn prop(&self, name: &str) -> Option<String>;
    fn int_prop(&self, name: &str) -> Option<i128>;
    /// Values of a property given as `name="a" name="b"` or as a `name "a" "b"` child.
    fn list(&self, name: &str) -> Vec<String>;
    fn child_nodes(&self) -> impl Iterator<Item = &KdlNode>;
}

impl NodeExt for KdlNode {
    fn arg(&self) -> Option<String> {
        self.args().into_iter().next()
    }

    fn args(&self) -> Vec<String> {
        self.entries()
            .iter()
            .filter(|entry| entry.name().is_none())
            .filter_map(|entry| entry.value().as_string().map(str::to_string))
            .collect()
    }

    fn prop(&self, name: &str) -> Option<String> {
        self.get(name)?.as_string().map(str::to_string)
    }

    fn int_prop(&self, name: &str) -> Option<i128> {
        self.get(name)?.as_integer()
    }

    fn list(&self, name: &str) -> Vec<String> {
        let repeated: Vec<String> = self
            .entries()
            .iter()
            .filter(|entry| entry.name().is_some_and(|n| n.value() == name))
            .filter_map(|entry| entry.value().as_string().map(str::to_string))
            .collect();
        if !repeated.is_empty() {
            return repeated;
        }
        self.child_nodes()
            .find(|child| child.name().value() == name)
            .map(NodeExt::args)
            .unwrap_or_default()
    }

    fn child_nodes(&self) -> impl Iterator<Item = &KdlNode> {
        self.children().into_iter().flat_map(|doc| doc.nodes())
    }
}
