//! Trigger matching.

use curasync_core::push::PushEvent;
use curasync_core::workflow::{Trigger, Workflow};

/// Check whether a push event satisfies any push trigger of the workflow.
///
/// Tag pushes never match. When a trigger lists `paths`, at least one path
/// touched by the pushed commits must match one of them.
pub fn matches_push(workflow: &Workflow, push: &PushEvent) -> bool {
    let Some(branch) = push.branch.as_deref() else {
        return false;
    };

    workflow.triggers.iter().any(|trigger| match trigger {
        Trigger::Push { branches, paths } => {
            let branch_ok = branches.iter().any(|p| glob_match(p, branch));
            let paths_ok = match paths {
                Some(patterns) => push
                    .changed_paths()
                    .any(|path| patterns.iter().any(|p| glob_match(p, path))),
                None => true,
            };
            branch_ok && paths_ok
        }
        Trigger::Manual => false,
    })
}

/// Check whether the workflow may be started by hand.
pub fn matches_manual(workflow: &Workflow) -> bool {
    workflow.triggers.iter().any(|t| matches!(t, Trigger::Manual))
}

/// Match `text` against a pattern where `*` matches any run of characters.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            resume = ti;
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ti = resume;
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}
