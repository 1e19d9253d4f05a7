//! Finding curation files and asset folders in the repository.

use async_recursion::async_recursion;
use chrono::{DateTime, Utc};
use curasync_core::schema::Platform;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::debug;

use crate::error::{UploadError, UploadResult};

static NAME_STATUS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[AM]\s+([\w-]+)/").unwrap());

const CURATION_MARKER: &str = "curation";

/// Short sha, author and time of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub short_sha: String,
    pub author: String,
    pub time: DateTime<Utc>,
}

/// Read-only access to the git history of a checkout.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git(&self, args: &[&str]) -> UploadResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| UploadError::Git {
                command: args.join(" "),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(UploadError::Git {
                command: args.join(" "),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Author and time of the last commit, or of the last commit touching `path`.
    pub async fn last_commit(&self, path: Option<&Path>) -> UploadResult<CommitSummary> {
        let path = path.map(|p| p.to_string_lossy().into_owned());
        let mut args = vec!["log", "-1", "--pretty=format:%h%n%ct%n%an"];
        if let Some(path) = &path {
            args.extend(["--", path.as_str()]);
        }
        let output = self.git(&args).await?;
        parse_commit_summary(&output).ok_or_else(|| UploadError::Git {
            command: args.join(" "),
            message: format!("unexpected output: {:?}", output),
        })
    }

    /// `--name-status` listing of the last commit.
    pub async fn last_commit_name_status(&self) -> UploadResult<String> {
        self.git(&["log", "-1", "--pretty=oneline", "--name-status"])
            .await
    }
}

fn parse_commit_summary(output: &str) -> Option<CommitSummary> {
    let mut lines = output.lines();
    let short_sha = lines.next()?.trim().to_string();
    let seconds: i64 = lines.next()?.trim().parse().ok()?;
    let author = lines.next()?.trim().to_string();
    Some(CommitSummary {
        short_sha,
        author,
        time: DateTime::from_timestamp(seconds, 0)?,
    })
}

/// Curation files added or modified according to a `--name-status` listing.
///
/// A line is kept when its status is `A` or `M`, its top-level folder starts
/// with a known platform abbreviation and it mentions a curation file. Paths
/// are returned relative to the repository root.
pub fn parse_name_status(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter(|line| line.starts_with('A') || line.starts_with('M'))
        .filter_map(|line| {
            let root_folder = NAME_STATUS_REGEX.captures(line)?.get(1)?.as_str();
            let prefix = root_folder.split('_').next().unwrap_or_default();
            if Platform::from_abbreviation(prefix).is_none() || !line.contains(CURATION_MARKER) {
                return None;
            }
            let start = line.find(root_folder)?;
            Some(line[start..].trim_end().to_string())
        })
        .collect()
}

/// Top-level folders added by the last commit whose name starts with `prefix`.
pub fn parse_added_folders(output: &str, prefix: &str) -> BTreeSet<String> {
    let marker = format!("A\t{}", prefix);
    output
        .lines()
        .filter(|line| line.starts_with(&marker))
        .filter_map(|line| line.rsplit('\t').next()?.split('/').next())
        .map(str::to_string)
        .collect()
}

/// All `*.json` files under `root` whose relative path mentions a curation,
/// sorted and relative to `root`. Hidden directories and `target` are skipped.
pub async fn find_curation_files(root: &Path) -> UploadResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    walk(root, Path::new(""), &mut found, &|rel| {
        rel.extension().is_some_and(|ext| ext == "json")
            && rel.to_string_lossy().contains(CURATION_MARKER)
    })
    .await?;
    found.sort();
    Ok(found)
}

/// Every file under `dir`, relative to it.
pub async fn list_files(dir: &Path) -> UploadResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    walk(dir, Path::new(""), &mut found, &|_| true).await?;
    found.sort();
    Ok(found)
}

#[async_recursion]
async fn walk(
    root: &Path,
    rel: &Path,
    found: &mut Vec<PathBuf>,
    keep: &(dyn Fn(&Path) -> bool + Sync),
) -> UploadResult<()> {
    let mut entries = tokio::fs::read_dir(root.join(rel)).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let path = rel.join(&name);
        let file_type = entry.file_type().await?;

        if file_type.is_dir() {
            let name = name.to_string_lossy();
            if name.starts_with('.') || name == "target" {
                debug!(path = %path.display(), "Skipping directory");
                continue;
            }
            walk(root, &path, found, keep).await?;
        } else if file_type.is_file() && keep(&path) {
            found.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME_STATUS: &str = "\
4f1c2e9d0b7a Add curations for two sessions
A\tecephys_661398_2023-03-31_17-01-09/sorting_curation.json
M\tSmartSPIM_123_2024-01-02_03-04-05/qc/manual_curation.json
A\tecephys_661398_2023-03-31_17-01-09/notes.txt
A\tunknown_1_2024-01-01_00-00-00/curation.json
D\tecephys_700000_2024-01-01_00-00-00/curation.json
A\tREADME_curation.md
A\tecephys_700001_2024-02-01_10-00-00/curation.json
";

    #[test]
    fn test_parse_name_status() {
        let files = parse_name_status(NAME_STATUS);
        let expected: BTreeSet<String> = [
            "ecephys_661398_2023-03-31_17-01-09/sorting_curation.json",
            "SmartSPIM_123_2024-01-02_03-04-05/qc/manual_curation.json",
            "ecephys_700001_2024-02-01_10-00-00/curation.json",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(files, expected);
    }

    #[test]
    fn test_parse_name_status_ignores_header() {
        assert!(parse_name_status("Abc123 Merge curation branch\n").is_empty());
    }

    #[test]
    fn test_parse_added_folders() {
        let folders = parse_added_folders(NAME_STATUS, "ecephys");
        let expected: BTreeSet<String> = [
            "ecephys_661398_2023-03-31_17-01-09",
            "ecephys_700001_2024-02-01_10-00-00",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(folders, expected);
    }

    #[test]
    fn test_parse_commit_summary() {
        let summary = parse_commit_summary("4f1c2e9\n1700000000\nJane Doe\n").unwrap();
        assert_eq!(summary.short_sha, "4f1c2e9");
        assert_eq!(summary.author, "Jane Doe");
        assert_eq!(summary.time.timestamp(), 1_700_000_000);
        assert!(parse_commit_summary("").is_none());
        assert!(parse_commit_summary("4f1c2e9\nyesterday\nJane").is_none());
    }

    #[tokio::test]
    async fn test_find_curation_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for path in [
            "ecephys_1_2024-01-01_00-00-00/sorting_curation.json",
            "ecephys_1_2024-01-01_00-00-00/raw.json",
            "ecephys_2_2024-01-01_00-00-00/curation/labels.json",
            "ecephys_2_2024-01-01_00-00-00/curation.txt",
            ".git/curation.json",
            "target/debug/curation.json",
        ] {
            let full = root.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, "{}").unwrap();
        }

        let files = find_curation_files(root).await.unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("ecephys_1_2024-01-01_00-00-00/sorting_curation.json"),
                PathBuf::from("ecephys_2_2024-01-01_00-00-00/curation/labels.json"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/c.json"), "{}").unwrap();
        std::fs::write(dir.path().join("top.txt"), "x").unwrap();

        let files = list_files(dir.path()).await.unwrap();
        assert_eq!(files, vec![PathBuf::from("a/b/c.json"), PathBuf::from("top.txt")]);
    }
}
