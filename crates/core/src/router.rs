//! Chooses which branch an upload is integrated into.

use crate::models::{BranchDecision, BranchReason};

const FALLBACK_DEFAULT: &str = "main";

/// Strip a remote-tracking prefix such as `<remote>/` or
/// `refs/remotes/<remote>/`.
pub fn normalize_branch<'a>(name: &'a str, remote: &str) -> &'a str {
    let name = name.strip_prefix("refs/heads/").unwrap_or(name);
    let name = name.strip_prefix("refs/remotes/").unwrap_or(name);
    name.strip_prefix(remote)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(name)
}

/// The repository's default branch: `main`, else `master`, else the first
/// listed branch, else `"main"`.
pub fn default_branch(branches: &[String], remote: &str) -> String {
    let last_segment = |b: &str| b.rsplit('/').next().unwrap_or(b).to_string();
    for wanted in ["main", "master"] {
        if let Some(found) = branches
            .iter()
            .find(|b| last_segment(b) == wanted)
        {
            return normalize_branch(found, remote).to_string();
        }
    }
    branches
        .first()
        .map(|b| normalize_branch(b, remote).to_string())
        .unwrap_or_else(|| FALLBACK_DEFAULT.to_string())
}

/// Passing uploads go to the default branch, failing ones to the branch
/// their author declared. `branches` may carry `remote`'s tracking prefix.
pub fn route(passed: bool, declared: &str, branches: &[String], remote: &str) -> BranchDecision {
    if passed {
        BranchDecision {
            branch: default_branch(branches, remote),
            reason: BranchReason::Default,
        }
    } else {
        BranchDecision {
            branch: normalize_branch(declared, remote).to_string(),
            reason: BranchReason::Declared,
        }
    }
}

/// Whether `name` appears in `branches`, ignoring remote-tracking prefixes.
pub fn branch_exists(name: &str, branches: &[String], remote: &str) -> bool {
    let wanted = normalize_branch(name, remote);
    branches
        .iter()
        .any(|b| b == wanted || b.ends_with(&format!("/{wanted}")))
}
