//! Push events delivered by a Git provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parsed push event data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub r#ref: String,
    pub before: String,
    pub after: String,
    pub repository_full_name: String,
    pub clone_url: Option<String>,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub commits: Vec<CommitInfo>,
    pub head_commit: Option<CommitInfo>,
    pub pusher: String,
}

/// Commit information from a push event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl PushEvent {
    /// Parse a GitHub push webhook payload.
    pub fn from_github_payload(payload: &serde_json::Value) -> Option<Self> {
        let r#ref = payload.get("ref")?.as_str()?.to_string();
        let before = payload.get("before")?.as_str()?.to_string();
        let after = payload.get("after")?.as_str()?.to_string();
        let repository = payload.get("repository")?;
        let repository_full_name = repository.get("full_name")?.as_str()?.to_string();
        let clone_url = repository
            .get("clone_url")
            .and_then(|u| u.as_str())
            .map(String::from);

        let branch = r#ref.strip_prefix("refs/heads/").map(String::from);
        let tag = r#ref.strip_prefix("refs/tags/").map(String::from);

        let commits = payload
            .get("commits")
            .and_then(|c| c.as_array())
            .map(|arr| arr.iter().filter_map(CommitInfo::from_github_commit).collect())
            .unwrap_or_default();

        let head_commit = payload
            .get("head_commit")
            .and_then(CommitInfo::from_github_commit);

        let pusher = payload
            .get("pusher")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown")
            .to_string();

        Some(PushEvent {
            r#ref,
            before,
            after,
            repository_full_name,
            clone_url,
            branch,
            tag,
            commits,
            head_commit,
            pusher,
        })
    }

    /// Every path added, modified or removed by the pushed commits.
    pub fn changed_paths(&self) -> impl Iterator<Item = &str> {
        self.commits
            .iter()
            .chain(self.head_commit.iter())
            .flat_map(|c| c.added.iter().chain(&c.modified).chain(&c.removed))
            .map(String::as_str)
    }

    /// First seven characters of the pushed head.
    pub fn short_sha(&self) -> String {
        self.after.chars().take(7).collect()
    }
}

impl CommitInfo {
    fn from_github_commit(value: &serde_json::Value) -> Option<Self> {
        let paths = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(|a| a.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default()
        };

        Some(CommitInfo {
            sha: value.get("id")?.as_str()?.to_string(),
            message: value.get("message")?.as_str()?.to_string(),
            author: value
                .get("author")
                .and_then(|a| a.get("username").or_else(|| a.get("name")))
                .and_then(|n| n.as_str())
                .unwrap_or("unknown")
                .to_string(),
            timestamp: value
                .get("timestamp")
                .and_then(|t| t.as_str())
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            added: paths("added"),
            modified: paths("modified"),
            removed: paths("removed"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> serde_json::Value {
        json!({
            "ref": "refs/heads/main",
            "before": "0000000000000000000000000000000000000000",
            "after": "3f786850e387550fdab836ed7e6dc881de23001b",
            "repository": {
                "full_name": "lab/ephys-curations",
                "clone_url": "https://github.com/lab/ephys-curations.git"
            },
            "pusher": { "name": "octocat" },
            "commits": [{
                "id": "3f786850e387550fdab836ed7e6dc881de23001b",
                "message": "add curation",
                "timestamp": "2024-03-01T10:15:00Z",
                "author": { "name": "Octo Cat", "username": "octocat" },
                "added": ["ecephys_123456_2024-01-01_10-00-00/sorting_curation.json"],
                "modified": [],
                "removed": []
            }]
        })
    }

    #[test]
    fn test_parse_push_to_branch() {
        let event = PushEvent::from_github_payload(&payload()).unwrap();
        assert_eq!(event.branch.as_deref(), Some("main"));
        assert!(event.tag.is_none());
        assert_eq!(event.pusher, "octocat");
        assert_eq!(event.short_sha(), "3f78685");
        assert_eq!(
            event.clone_url.as_deref(),
            Some("https://github.com/lab/ephys-curations.git")
        );
        assert_eq!(event.commits[0].author, "octocat");
    }

    #[test]
    fn test_short_sha_non_ascii() {
        let mut value = payload();
        value["after"] = json!("abcdefé1");
        let event = PushEvent::from_github_payload(&value).unwrap();
        assert_eq!(event.short_sha(), "abcdefé");

        value["after"] = json!("é");
        let event = PushEvent::from_github_payload(&value).unwrap();
        assert_eq!(event.short_sha(), "é");
    }

    #[test]
    fn test_parse_tag_push() {
        let mut value = payload();
        value["ref"] = json!("refs/tags/v1.0");
        let event = PushEvent::from_github_payload(&value).unwrap();
        assert!(event.branch.is_none());
        assert_eq!(event.tag.as_deref(), Some("v1.0"));
    }

    #[test]
    fn test_changed_paths() {
        let event = PushEvent::from_github_payload(&payload()).unwrap();
        let paths: Vec<&str> = event.changed_paths().collect();
        assert_eq!(
            paths,
            vec!["ecephys_123456_2024-01-01_10-00-00/sorting_curation.json"]
        );
    }

    #[test]
    fn test_missing_ref_is_rejected() {
        let mut value = payload();
        value.as_object_mut().unwrap().remove("ref");
        assert!(PushEvent::from_github_payload(&value).is_none());
    }
}
