//! Local Git repository operations via `git2`.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Cred, DiffFormat, DiffOptions, FetchOptions, IndexAddOption, Oid, PushOptions,
    RemoteCallbacks, Repository, ResetType, Signature,
};
use tracing::{debug, info, instrument, warn};

use super::vcs::{Credentials, Identity, Vcs};
use crate::errors::GitError;

/// High-level Git client wrapping a `git2::Repository`.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
}

/// Remote callbacks that answer one credential request with `creds`.
///
/// libgit2 re-asks on rejection, so a second request is turned into an error
/// instead of looping.
fn auth_callbacks<'a>(creds: &'a Credentials, attempts: &'a Cell<u32>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username, _allowed| {
        attempts.set(attempts.get() + 1);
        if attempts.get() > 1 {
            return Err(git2::Error::from_str("authentication rejected by remote"));
        }
        Cred::userpass_plaintext(&creds.username, &creds.password)
    });
    callbacks
}

impl GitClient {
    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn signature(who: &Identity) -> Result<Signature<'static>, GitError> {
        Ok(Signature::now(&who.name, &who.email)?)
    }

    fn head_commit(&self) -> Result<Option<git2::Commit<'_>>, GitError> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn merge_head_ids(&self) -> Result<Vec<Oid>, GitError> {
        if !self.is_merging() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(self.repo.path().join("MERGE_HEAD"))?;
        contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| Oid::from_str(l).map_err(GitError::from))
            .collect()
    }

    fn switch_to(&self, refname: &str) -> Result<(), GitError> {
        self.repo.set_head(refname)?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }
}

impl Vcs for GitClient {
    fn open(path: &Path) -> Result<Self, GitError> {
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
        })
    }

    #[instrument(skip(creds), fields(url = %url, path = %dest.display()))]
    fn clone_remote(
        url: &str,
        remote: &str,
        dest: &Path,
        creds: &Credentials,
    ) -> Result<Self, GitError> {
        info!("cloning git repository");
        let attempts = Cell::new(0);
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(auth_callbacks(creds, &attempts));
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        builder.remote_create(|repo, _default, url| repo.remote(remote, url));
        let repo = builder.clone(url, dest)?;
        info!("clone completed");
        Ok(Self {
            repo,
            repo_path: dest.to_path_buf(),
        })
    }

    fn workdir(&self) -> Result<&Path, GitError> {
        self.repo
            .workdir()
            .ok_or_else(|| GitError::RepositoryNotFound(format!("{} (bare)", self.repo_path.display())))
    }

    fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    #[instrument(skip(self))]
    fn ensure_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        match self.repo.find_remote(name) {
            Ok(remote) if remote.url() == Some(url) => {
                debug!("remote already configured");
            }
            Ok(_) => {
                info!("updating remote url");
                self.repo.remote_set_url(name, url)?;
            }
            Err(_) => {
                info!("adding remote");
                self.repo.remote(name, url)?;
            }
        }
        Ok(())
    }

    fn branches(&self) -> Result<Vec<String>, GitError> {
        let mut names = Vec::new();
        for branch_result in self.repo.branches(None)? {
            let (branch, _) = branch_result?;
            if let Some(name) = branch.name()? {
                if !name.ends_with("/HEAD") {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    #[instrument(skip(self))]
    fn checkout(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        let refname = format!("refs/heads/{branch}");

        if self.repo.find_branch(branch, BranchType::Local).is_ok() {
            debug!("checking out existing local branch");
            return self.switch_to(&refname);
        }

        let tracking = format!("{remote}/{branch}");
        if let Ok(remote_branch) = self.repo.find_branch(&tracking, BranchType::Remote) {
            info!("creating local branch from remote-tracking branch");
            let commit = remote_branch.get().peel_to_commit()?;
            let mut local = self.repo.branch(branch, &commit, false)?;
            local.set_upstream(Some(tracking.as_str()))?;
            return self.switch_to(&refname);
        }

        match self.head_commit()? {
            Some(head) => {
                info!("creating new branch from HEAD");
                self.repo.branch(branch, &head, false)?;
                self.switch_to(&refname)
            }
            None => {
                info!("repository is empty, pointing HEAD at unborn branch");
                self.repo.set_head(&refname)?;
                Ok(())
            }
        }
    }

    #[instrument(skip(self, creds))]
    fn pull(&self, remote: &str, branch: &str, creds: &Credentials) -> Result<(), GitError> {
        let attempts = Cell::new(0);
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(auth_callbacks(creds, &attempts));
        self.repo
            .find_remote(remote)?
            .fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");

        let tracking = format!("refs/remotes/{remote}/{branch}");
        let reference = self
            .repo
            .find_reference(&tracking)
            .map_err(|_| GitError::RefNotFound(tracking.clone()))?;
        let incoming = self.repo.reference_to_annotated_commit(&reference)?;
        let (analysis, _) = self.repo.merge_analysis(&[&incoming])?;

        if analysis.is_up_to_date() {
            debug!("already up to date");
            return Ok(());
        }
        if !(analysis.is_fast_forward() || analysis.is_unborn()) {
            return Err(GitError::NotFastForward(branch.to_string()));
        }

        let refname = format!("refs/heads/{branch}");
        let reflog = "uploadgate: fast-forward pull";
        match self.repo.find_reference(&refname) {
            Ok(mut local) => {
                local.set_target(incoming.id(), reflog)?;
            }
            Err(_) => {
                self.repo.reference(&refname, incoming.id(), true, reflog)?;
            }
        }
        self.switch_to(&refname)?;
        info!("pull completed");
        Ok(())
    }

    #[instrument(skip(self, message, who))]
    fn commit_all(&self, message: &str, who: &Identity) -> Result<String, GitError> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        self.commit_staged(message, who)
    }

    #[instrument(skip(self, message, who))]
    fn commit_staged(&self, message: &str, who: &Identity) -> Result<String, GitError> {
        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = Self::signature(who)?;

        let mut parents = Vec::new();
        if let Some(head) = self.head_commit()? {
            parents.push(head);
        }
        let merging = self.is_merging();
        for oid in self.merge_head_ids()? {
            parents.push(self.repo.find_commit(oid)?);
        }
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?;
        if merging {
            self.repo.cleanup_state()?;
        }
        info!(sha = %oid, parents = parent_refs.len(), "created commit");
        Ok(oid.to_string())
    }

    #[instrument(skip(self, creds))]
    fn push(&self, remote: &str, branch: &str, creds: &Credentials) -> Result<(), GitError> {
        info!("pushing");
        let mut remote_handle = self.repo.find_remote(remote)?;
        let attempts = Cell::new(0);
        let rejected: RefCell<Option<String>> = RefCell::new(None);
        let mut callbacks = auth_callbacks(creds, &attempts);
        callbacks.push_update_reference(|refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                *rejected.borrow_mut() = Some(msg.to_string());
            }
            Ok(())
        });
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        remote_handle
            .push(&[&refspec], Some(&mut push_opts))
            .map_err(|e| GitError::PushRejected {
                branch: branch.to_string(),
                detail: e.message().to_string(),
            })?;
        drop(push_opts);

        if let Some(detail) = rejected.into_inner() {
            return Err(GitError::PushRejected {
                branch: branch.to_string(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }

    fn is_merging(&self) -> bool {
        self.repo.path().join("MERGE_HEAD").is_file()
    }

    fn list_conflicts(&self) -> Result<Vec<String>, GitError> {
        let mut index = self.repo.index()?;
        index.read(false)?;
        if !index.has_conflicts() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let entry = conflict
                .our
                .as_ref()
                .or(conflict.their.as_ref())
                .or(conflict.ancestor.as_ref());
            if let Some(entry) = entry {
                paths.push(String::from_utf8_lossy(&entry.path).into_owned());
            }
        }
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    fn diff_tree(&self, rev: &str, path: &str) -> Result<String, GitError> {
        let tree = self.repo.revparse_single(rev)?.peel_to_tree()?;
        let mut opts = DiffOptions::new();
        opts.pathspec(path).disable_pathspec_match(true);
        let diff = self.repo.diff_tree_to_workdir(Some(&tree), Some(&mut opts))?;

        let mut patch = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                patch.push(line.origin());
            }
            patch.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        Ok(patch)
    }

    fn stage(&self, path: &str) -> Result<(), GitError> {
        let mut index = self.repo.index()?;
        index.read(false)?;
        index.add_path(Path::new(path))?;
        index.write()?;
        Ok(())
    }

    fn head_sha(&self) -> Result<Option<String>, GitError> {
        Ok(self.head_commit()?.map(|c| c.id().to_string()))
    }

    fn head_message(&self) -> Result<Option<String>, GitError> {
        Ok(self
            .head_commit()?
            .map(|c| c.message().unwrap_or("").to_string()))
    }

    #[instrument(skip(self))]
    fn reset_hard(&self, rev: &str) -> Result<(), GitError> {
        let target = self
            .repo
            .revparse_single(rev)
            .map_err(|_| GitError::RefNotFound(rev.to_string()))?;
        self.repo.reset(&target, ResetType::Hard, None)?;
        self.repo.cleanup_state()?;
        info!("hard reset completed");
        Ok(())
    }

    #[instrument(skip(self))]
    fn reset_soft(&self, rev: &str) -> Result<(), GitError> {
        let target = self
            .repo
            .revparse_single(rev)
            .map_err(|_| GitError::RefNotFound(rev.to_string()))?;
        self.repo.reset(&target, ResetType::Soft, None)?;
        Ok(())
    }
}
