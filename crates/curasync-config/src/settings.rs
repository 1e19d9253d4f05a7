//! Settings read from the process environment.

use crate::{ConfigError, ConfigResult};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const INVESTIGATORS_ENV: &str = "INVESTIGATORS_GH_TO_NAME_MAP";

/// Mapping from GitHub handle (or commit author) to an investigator's full name.
#[derive(Debug, Clone, Default)]
pub struct InvestigatorMap {
    names: HashMap<String, String>,
}

impl InvestigatorMap {
    /// Parse a JSON object of `handle -> name` pairs.
    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        let names: HashMap<String, String> =
            serde_json::from_str(raw).map_err(|e| ConfigError::InvalidValue {
                field: INVESTIGATORS_ENV.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { names })
    }

    /// Read the map from `INVESTIGATORS_GH_TO_NAME_MAP`. An unset or blank variable yields an empty map.
    pub fn from_env() -> ConfigResult<Self> {
        match std::env::var(INVESTIGATORS_ENV) {
            Ok(raw) if !raw.trim().is_empty() => Self::from_json(&raw),
            _ => Ok(Self::default()),
        }
    }

    /// Resolve an author to a display name; unknown authors map to themselves.
    pub fn resolve(&self, author: &str) -> String {
        let author = author.replace('\n', "");
        self.names.get(&author).cloned().unwrap_or(author)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Settings for the webhook listener.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    /// Shared secret for `X-Hub-Signature-256` verification.
    pub webhook_secret: Option<String>,
    /// Workflow file; the built-in workflow is used when unset.
    pub workflow_path: Option<PathBuf>,
    /// Directory the repository is checked out into.
    pub workspace: PathBuf,
    pub queue_capacity: usize,
    /// Token used to clone the repository when the workspace is empty.
    pub github_token: Option<String>,
}

impl ServerSettings {
    pub fn from_env() -> ConfigResult<Self> {
        let bind = std::env::var("CURASYNC_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind = bind.parse().map_err(|e| ConfigError::InvalidValue {
            field: "CURASYNC_BIND".to_string(),
            message: format!("{}: {}", bind, e),
        })?;

        let queue_capacity = match std::env::var("CURASYNC_QUEUE_CAPACITY") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                field: "CURASYNC_QUEUE_CAPACITY".to_string(),
                message: format!("not a number: {}", raw),
            })?,
            Err(_) => 32,
        };

        Ok(Self {
            bind,
            webhook_secret: std::env::var("CURASYNC_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            workflow_path: std::env::var("CURASYNC_WORKFLOW").ok().map(PathBuf::from),
            workspace: std::env::var("CURASYNC_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("curasync-workspace")),
            queue_capacity,
            github_token: std::env::var("CURASYNC_GITHUB_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_handle() {
        let map = InvestigatorMap::from_json(r#"{"jdoe": "Jane Doe"}"#).unwrap();
        assert_eq!(map.resolve("jdoe"), "Jane Doe");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_unknown_handle_maps_to_itself() {
        let map = InvestigatorMap::default();
        assert_eq!(map.resolve("octocat\n"), "octocat");
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            InvestigatorMap::from_json("not json").unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }
}
