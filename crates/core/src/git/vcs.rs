//! Version-control capabilities the integrator and conflict engine rely on.

use std::fmt;
use std::path::Path;

use crate::config::RepositoryConfig;
use crate::errors::GitError;

/// Username and password (or access token) for the managed remote.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Take the resolved credentials out of a repository config.
    ///
    /// Fails with [`GitError::CredentialsMissing`] unless both environment
    /// variables were resolved.
    pub fn from_config(config: &RepositoryConfig) -> Result<Self, GitError> {
        match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Ok(Self::new(user.clone(), pass.clone())),
            _ => Err(GitError::CredentialsMissing {
                username_env: config.username_env.clone(),
                password_env: config.password_env.clone(),
            }),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Author and committer identity for commits made by uploadgate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self::new(config.author_name.clone(), config.author_email.clone())
    }
}

/// Repository operations, one handle per repository.
pub trait Vcs {
    /// Open an existing working copy.
    fn open(path: &Path) -> Result<Self, GitError>
    where
        Self: Sized;

    /// Clone `url` with all branches into `dest`, naming the remote `remote`.
    fn clone_remote(
        url: &str,
        remote: &str,
        dest: &Path,
        creds: &Credentials,
    ) -> Result<Self, GitError>
    where
        Self: Sized;

    /// Root of the working copy.
    fn workdir(&self) -> Result<&Path, GitError>;

    /// The `.git` directory.
    fn git_dir(&self) -> &Path;

    /// Make sure remote `name` exists and points at `url`.
    fn ensure_remote(&self, name: &str, url: &str) -> Result<(), GitError>;

    /// Local and remote-tracking branch names (`main`, `origin/main`, ...).
    fn branches(&self) -> Result<Vec<String>, GitError>;

    /// Switch to `branch`, creating it if it does not exist yet. A new local
    /// branch starts from `remote`'s tracking branch when there is one.
    fn checkout(&self, remote: &str, branch: &str) -> Result<(), GitError>;

    /// Fetch `remote` and fast-forward `branch` to its remote-tracking ref.
    fn pull(&self, remote: &str, branch: &str, creds: &Credentials) -> Result<(), GitError>;

    /// Stage every change in the working copy and commit it on HEAD.
    fn commit_all(&self, message: &str, who: &Identity) -> Result<String, GitError>;

    /// Commit the current index. While a merge is in progress the commit gets
    /// both HEAD and MERGE_HEAD as parents and the merge state is cleared.
    fn commit_staged(&self, message: &str, who: &Identity) -> Result<String, GitError>;

    /// Push `refs/heads/<branch>` to the same name on `remote`.
    fn push(&self, remote: &str, branch: &str, creds: &Credentials) -> Result<(), GitError>;

    /// True while a MERGE_HEAD exists.
    fn is_merging(&self) -> bool;

    /// Paths with conflicting index entries, sorted.
    fn list_conflicts(&self) -> Result<Vec<String>, GitError>;

    /// Patch between the tree of `rev` and the working directory, limited
    /// to `path`.
    fn diff_tree(&self, rev: &str, path: &str) -> Result<String, GitError>;

    /// Add `path` from the working copy to the index.
    fn stage(&self, path: &str) -> Result<(), GitError>;

    /// SHA of HEAD, or `None` on an unborn branch.
    fn head_sha(&self) -> Result<Option<String>, GitError>;

    /// Message of the HEAD commit, or `None` on an unborn branch.
    fn head_message(&self) -> Result<Option<String>, GitError>;

    /// Reset HEAD, index, and working copy to `rev` and clear merge state.
    fn reset_hard(&self, rev: &str) -> Result<(), GitError>;

    /// Move HEAD to `rev`, leaving index and working copy alone.
    fn reset_soft(&self, rev: &str) -> Result<(), GitError>;
}
