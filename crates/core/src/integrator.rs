//! Integrates a validated project tree into the managed repository.

use std::fs;
use std::path::Path;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::archive::WorkingTree;
use crate::config::RepositoryConfig;
use crate::errors::GitError;
use crate::git::{Credentials, GitClient, Identity, Vcs};
use crate::lock::RepoLocks;
use crate::models::IntegrationResult;

/// Copy `src` over `dest`, creating directories and overwriting files.
/// Anything under a `.git` directory is left alone on both sides.
pub fn sync_tree(src: &Path, dest: &Path) -> Result<usize, GitError> {
    let mut copied = 0;
    let walker = walkdir::WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| GitError::IoError(std::io::Error::other(e.to_string())))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| GitError::IoError(std::io::Error::other(e.to_string())))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    debug!(copied, "synchronized project tree into working copy");
    Ok(copied)
}

/// Commit message used for every integration commit.
pub fn commit_message(branch: &str) -> String {
    format!("Commit to branch {branch}")
}

/// Run synchronous git work on the blocking pool, inside the caller's span.
async fn blocking<T, F>(task: F) -> Result<T, GitError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, GitError> + Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || {
        let _enter = span.enter();
        task()
    })
    .await
    .map_err(|e| GitError::TaskFailed(e.to_string()))?
}

/// Clone, sync, commit, and push in one locked run.
pub struct RepositoryIntegrator {
    config: RepositoryConfig,
    locks: RepoLocks,
}

impl RepositoryIntegrator {
    pub fn new(config: RepositoryConfig, locks: RepoLocks) -> Self {
        Self { config, locks }
    }

    pub fn remote_name(&self) -> &str {
        &self.config.remote_name
    }

    /// Branch names of the remote, cloned fresh. Used for routing.
    pub async fn remote_branches(&self) -> Result<Vec<String>, GitError> {
        let creds = Credentials::from_config(&self.config)?;
        let config = self.config.clone();
        blocking(move || {
            let scratch = WorkingTree::create("uploadgate-clone-")?;
            let client = GitClient::clone_remote(
                &config.remote_url,
                &config.remote_name,
                scratch.path(),
                &creds,
            )?;
            let prefix = format!("{}/", config.remote_name);
            Ok(client
                .branches()?
                .into_iter()
                .filter(|b| b.starts_with(&prefix))
                .collect())
        })
        .await
    }

    /// Push the contents of `project_root` to `branch` on the remote.
    ///
    /// The integration lock is held from before the clone until the blocking
    /// task has finished pushing.
    pub async fn integrate(
        &self,
        project_root: &Path,
        branch: &str,
    ) -> Result<IntegrationResult, GitError> {
        let creds = Credentials::from_config(&self.config)?;
        let key = RepoLocks::integration_key(&self.config.remote_url, branch);
        let _guard = self.locks.acquire(&key).await;

        let span = info_span!("integrate", branch, remote = %self.config.remote_url);
        let config = self.config.clone();
        let project_root = project_root.to_path_buf();
        let target = branch.to_string();
        let commit_sha = blocking(move || {
            let scratch = WorkingTree::create("uploadgate-clone-")?;
            let client = GitClient::clone_remote(
                &config.remote_url,
                &config.remote_name,
                scratch.path(),
                &creds,
            )?;
            integrate_into(&client, &config, &project_root, &target, &creds)
        })
        .instrument(span)
        .await?;
        Ok(IntegrationResult {
            branch: branch.to_string(),
            commit_sha,
        })
    }
}

/// The integration steps after cloning, against any [`Vcs`].
pub fn integrate_into<V: Vcs>(
    vcs: &V,
    config: &RepositoryConfig,
    project_root: &Path,
    branch: &str,
    creds: &Credentials,
) -> Result<String, GitError> {
    vcs.ensure_remote(&config.remote_name, &config.remote_url)?;
    vcs.checkout(&config.remote_name, branch)?;

    if let Err(e) = vcs.pull(&config.remote_name, branch, creds) {
        warn!(branch, error = %e, "pull failed, continuing with local state");
    }

    sync_tree(project_root, vcs.workdir()?)?;

    let sha = vcs.commit_all(&commit_message(branch), &Identity::from_config(config))?;
    vcs.push(&config.remote_name, branch, creds)?;
    info!(branch, sha = %sha, "integration pushed");
    Ok(sha)
}
