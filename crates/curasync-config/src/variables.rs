//! `${...}` substitution in workflow values.
//!
//! Namespaces:
//! - `git.sha`, `git.short_sha`, `git.branch`, `git.author`
//! - `workflow.name`, `run.id`, `run.trigger`, `step.name`, `step.index`
//! - `env.NAME` for the process environment
//! - `secrets.NAME` for declared secrets, which [`VariableContext::mask`] hides
//!
//! Substitution is purely textual. Resolved values are never re-scanned or
//! handed to a shell.

use curasync_core::push::PushEvent;
use regex::Regex;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)?)\}").unwrap());

const MASK: &str = "***";

/// Commit being built.
#[derive(Debug, Clone, Default)]
pub struct GitContext {
    pub sha: String,
    pub short_sha: String,
    pub branch: String,
    pub author: String,
}

impl GitContext {
    fn with_sha(sha: String) -> Self {
        Self {
            short_sha: sha.chars().take(7).collect(),
            sha,
            ..Self::default()
        }
    }
}

/// Where in a job the substitution happens.
#[derive(Debug, Clone, Default)]
pub struct RunScope {
    pub workflow: String,
    pub run_id: String,
    pub trigger: String,
    pub step: String,
    pub step_index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub git: GitContext,
    pub scope: RunScope,
    pub env: HashMap<String, String>,
    pub secrets: HashMap<String, String>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded with the whole process environment under `env.*`.
    pub fn from_process_env() -> Self {
        Self {
            env: std::env::vars().collect(),
            ..Self::default()
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    pub fn with_commit(mut self, sha: impl Into<String>, branch: impl Into<String>) -> Self {
        self.git = GitContext {
            branch: branch.into(),
            ..GitContext::with_sha(sha.into())
        };
        self
    }

    /// Copy the named secrets out of the process environment.
    ///
    /// Returns the names that are unset or empty.
    pub fn load_secrets_from_env(&mut self, names: &[String]) -> Vec<String> {
        let mut missing = Vec::new();
        for name in names {
            match std::env::var(name) {
                Ok(value) if !value.is_empty() => {
                    self.secrets.insert(name.clone(), value);
                }
                _ => missing.push(name.clone()),
            }
        }
        missing
    }

    pub fn populate_git_from_push(&mut self, push: &PushEvent) {
        let author = push
            .head_commit
            .as_ref()
            .map_or(&push.pusher, |commit| &commit.author);
        self.git = GitContext {
            branch: push.branch.clone().unwrap_or_default(),
            author: author.clone(),
            ..GitContext::with_sha(push.after.clone())
        };
    }

    /// Commit details when running inside a CI job rather than from a webhook.
    pub fn populate_git_from_ci(&mut self) {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
                .unwrap_or_default()
        };
        self.git = GitContext {
            branch: first(&["CURASYNC_BRANCH", "GITHUB_REF_NAME"]),
            author: first(&["GITHUB_ACTOR"]),
            ..GitContext::with_sha(first(&["CURASYNC_COMMIT_SHA", "GITHUB_SHA"]))
        };
    }

    pub fn enter_run(&mut self, workflow: &str, run_id: String, trigger: &str) {
        self.scope = RunScope {
            workflow: workflow.to_string(),
            run_id,
            trigger: trigger.to_string(),
            ..RunScope::default()
        };
    }

    pub fn enter_step(&mut self, name: &str, index: usize) {
        self.scope.step = name.to_string();
        self.scope.step_index = index;
    }

    /// Value of a reference such as `git.branch` or `env.HOME`.
    pub fn lookup(&self, reference: &str) -> Option<Cow<'_, str>> {
        let (namespace, key) = reference.split_once('.')?;
        let value = match (namespace, key) {
            ("env", name) => self.env.get(name)?,
            ("secrets", name) => self.secrets.get(name)?,
            ("git", "sha") => &self.git.sha,
            ("git", "short_sha") => &self.git.short_sha,
            ("git", "branch") => &self.git.branch,
            ("git", "author") => &self.git.author,
            ("workflow", "name") => &self.scope.workflow,
            ("run", "id") => &self.scope.run_id,
            ("run", "trigger") => &self.scope.trigger,
            ("step", "name") => &self.scope.step,
            ("step", "index") => return Some(Cow::Owned(self.scope.step_index.to_string())),
            _ => return None,
        };
        Some(Cow::Borrowed(value))
    }

    /// Substitute every resolvable reference; the rest stay as written.
    pub fn interpolate(&self, input: &str) -> String {
        REFERENCE
            .replace_all(input, |caps: &regex::Captures<'_>| match self.lookup(&caps[1]) {
                Some(value) => value.into_owned(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    pub fn interpolate_all(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|input| self.interpolate(input)).collect()
    }

    pub fn interpolate_map(&self, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        map.iter()
            .map(|(name, value)| (name.clone(), self.interpolate(value)))
            .collect()
    }

    /// References in `input` that have no value in this context.
    pub fn unresolved(&self, input: &str) -> Vec<String> {
        REFERENCE
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .filter(|reference| self.lookup(reference).is_none())
            .collect()
    }

    /// Replace every secret value in `line` with `***`.
    ///
    /// Longer values are replaced first so a secret that contains another
    /// is never partially revealed.
    pub fn mask(&self, line: &str) -> String {
        let mut values: Vec<&String> = self
            .secrets
            .values()
            .filter(|value| !value.is_empty())
            .collect();
        values.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        values
            .into_iter()
            .fold(line.to_string(), |masked, value| masked.replace(value.as_str(), MASK))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_references() {
        let ctx = VariableContext::new().with_commit("abc1234567890", "main");
        assert_eq!(
            ctx.interpolate("Commit ${git.short_sha} on ${git.branch}"),
            "Commit abc1234 on main"
        );
    }

    #[test]
    fn test_env_and_secret_references() {
        let ctx = VariableContext::new()
            .with_env("AWS_BUCKET", "curated-bucket")
            .with_secret("AWS_SECRET_ACCESS_KEY", "s3cr3t");

        assert_eq!(ctx.interpolate("${env.AWS_BUCKET}"), "curated-bucket");
        assert_eq!(ctx.interpolate("${secrets.AWS_SECRET_ACCESS_KEY}"), "s3cr3t");
    }

    #[test]
    fn test_unresolved_reference_is_kept() {
        let ctx = VariableContext::new();
        assert_eq!(ctx.interpolate("-b ${env.NOPE}"), "-b ${env.NOPE}");
        assert_eq!(ctx.unresolved("-b ${env.NOPE} ${git.nope}"), vec!["env.NOPE", "git.nope"]);
        assert!(ctx.lookup("date").is_none());
    }

    #[test]
    fn test_values_are_verbatim() {
        let ctx = VariableContext::new()
            .with_env("AWS_PARAM_STORE", "/aind/prod/$HOME; echo ${env.AWS_BUCKET}")
            .with_env("AWS_BUCKET", "bucket");
        assert_eq!(
            ctx.interpolate("${env.AWS_PARAM_STORE}"),
            "/aind/prod/$HOME; echo ${env.AWS_BUCKET}"
        );
    }

    #[test]
    fn test_interpolate_map() {
        let ctx = VariableContext::new().with_secret("TOKEN", "t0k3n");
        let env = BTreeMap::from([
            ("API_TOKEN".to_string(), "${secrets.TOKEN}".to_string()),
            ("REGION".to_string(), "us-west-2".to_string()),
        ]);
        let resolved = ctx.interpolate_map(&env);
        assert_eq!(resolved["API_TOKEN"], "t0k3n");
        assert_eq!(resolved["REGION"], "us-west-2");
    }

    #[test]
    fn test_mask() {
        let ctx = VariableContext::new()
            .with_secret("AWS_SECRET_ACCESS_KEY", "wJalrXUtnFEMI")
            .with_secret("EMPTY", "");
        assert_eq!(
            ctx.mask("using key wJalrXUtnFEMI for upload"),
            "using key *** for upload"
        );
    }

    #[test]
    fn test_mask_secret_containing_another() {
        // Map iteration order varies between instances, so check several.
        for _ in 0..16 {
            let ctx = VariableContext::new()
                .with_secret("SHORT", "abc")
                .with_secret("LONG", "abcdef");
            assert_eq!(ctx.mask("token=abcdef"), "token=***");
            assert_eq!(ctx.mask("a=abc b=abcdef"), "a=*** b=***");
        }
    }

    #[test]
    fn test_run_scope() {
        let mut ctx = VariableContext::new();
        ctx.enter_run("upload-new-asset", "run-1".to_string(), "push");
        ctx.enter_step("upload", 4);

        assert_eq!(
            ctx.interpolate("${workflow.name}/${run.id}/${run.trigger}/${step.name}#${step.index}"),
            "upload-new-asset/run-1/push/upload#4"
        );
    }

    #[test]
    fn test_push_author_falls_back_to_pusher() {
        let payload = serde_json::json!({
            "ref": "refs/heads/main",
            "before": "0000000",
            "after": "89abcdef0123456",
            "repository": { "full_name": "lab/curations", "clone_url": "https://example.com/c.git" },
            "pusher": { "name": "octocat" }
        });
        let push = PushEvent::from_github_payload(&payload).unwrap();
        let mut ctx = VariableContext::new();
        ctx.populate_git_from_push(&push);

        assert_eq!(ctx.git.short_sha, "89abcde");
        assert_eq!(ctx.git.branch, "main");
        assert_eq!(ctx.git.author, "octocat");
    }
}
