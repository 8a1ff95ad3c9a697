//! Detection, resolution, and abort for an in-progress merge.
//!
//! The free functions work against any [`Vcs`] and do no locking.
//! [`ConflictService`] adds the per-repository lock and owns the database.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, info_span, warn, Instrument};

use super::markers::{resolve_bytes, Strategy};
use crate::config::TestGateConfig;
use crate::db::{queries, Database};
use crate::errors::ConflictError;
use crate::git::{GitClient, Identity, Vcs};
use crate::lock::RepoLocks;
use crate::models::{ConflictRecord, GateOutcome, NewConflictRecord};
use crate::scan::TestGate;

/// Prefix of every commit made by [`resolve`].
pub const AUTO_COMMIT_PREFIX: &str = "Automatic conflict resolution";

const NO_MERGE: &str =
    "No merge in progress. Please perform a merge before checking for conflicts.";
const NO_CONFLICTS: &str = "No conflicts detected.";

fn auto_commit_message(strategy: Strategy) -> String {
    format!("{AUTO_COMMIT_PREFIX} ({strategy})")
}

/// A conflicting path and its MERGE_HEAD-vs-workdir patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictedFile {
    pub path: String,
    pub diff: String,
}

fn write_file_list(f: &mut fmt::Formatter<'_>, files: &[ConflictedFile]) -> fmt::Result {
    for file in files {
        writeln!(f, "- {}", file.path)?;
        write!(f, "{}", file.diff)?;
        if !file.diff.is_empty() && !file.diff.ends_with('\n') {
            writeln!(f)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectOutcome {
    NoMergeInProgress,
    NoConflicts,
    Conflicts(Vec<ConflictedFile>),
}

impl fmt::Display for DetectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMergeInProgress => f.write_str(NO_MERGE),
            Self::NoConflicts => f.write_str(NO_CONFLICTS),
            Self::Conflicts(files) => {
                writeln!(f, "Conflicting files:")?;
                write_file_list(f, files)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    NoMergeInProgress,
    NoConflicts,
    Resolved {
        strategy: Strategy,
        commit_sha: String,
        files: Vec<ConflictedFile>,
        record_ids: Vec<i64>,
        /// Outcome of the test run on the merged tree, when one was asked for.
        tests: Option<GateOutcome>,
    },
}

impl fmt::Display for ResolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMergeInProgress => f.write_str(NO_MERGE),
            Self::NoConflicts => f.write_str(NO_CONFLICTS),
            Self::Resolved {
                strategy,
                commit_sha,
                files,
                tests,
                ..
            } => {
                let short = &commit_sha[..commit_sha.len().min(7)];
                writeln!(
                    f,
                    "Resolved {} conflicting file(s) using {strategy} (commit {short}):",
                    files.len()
                )?;
                write_file_list(f, files)?;
                match tests {
                    Some(gate) if gate.passed => writeln!(f, "Post-merge tests passed."),
                    Some(gate) => {
                        writeln!(f, "Post-merge tests failed:")?;
                        for finding in &gate.findings {
                            writeln!(f, "- {finding}")?;
                        }
                        Ok(())
                    }
                    None => Ok(()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    MergeAborted,
    AutoResolutionUndone,
    AlreadyCompleted,
}

impl fmt::Display for AbortOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MergeAborted => "Merge aborted successfully.",
            Self::AutoResolutionUndone => "Automatic merge commit undone successfully.",
            Self::AlreadyCompleted => "Merge was already completed and committed. Cannot abort.",
        })
    }
}

fn conflicted_files<V: Vcs>(vcs: &V) -> Result<Vec<ConflictedFile>, ConflictError> {
    let mut files = Vec::new();
    for path in vcs.list_conflicts()? {
        let diff = vcs.diff_tree("MERGE_HEAD", &path)?;
        files.push(ConflictedFile { path, diff });
    }
    Ok(files)
}

/// Report conflicts without changing anything.
pub fn detect<V: Vcs>(vcs: &V) -> Result<DetectOutcome, ConflictError> {
    if !vcs.is_merging() {
        return Ok(DetectOutcome::NoMergeInProgress);
    }
    let files = conflicted_files(vcs)?;
    if files.is_empty() {
        return Ok(DetectOutcome::NoConflicts);
    }
    info!(count = files.len(), "conflicts detected");
    Ok(DetectOutcome::Conflicts(files))
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ConflictError> {
    fs::read(path).map_err(|source| ConflictError::FileIo {
        action: "read",
        path: path.display().to_string(),
        source,
    })
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), ConflictError> {
    fs::write(path, bytes).map_err(|source| ConflictError::FileIo {
        action: "write",
        path: path.display().to_string(),
        source,
    })
}

/// Enough on-disk state to put a mid-merge repository back as it was.
struct Snapshot {
    head: Option<String>,
    index: Option<Vec<u8>>,
    merge_state: Vec<(PathBuf, Vec<u8>)>,
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl Snapshot {
    fn capture<V: Vcs>(vcs: &V, files: Vec<(PathBuf, Vec<u8>)>) -> Result<Self, ConflictError> {
        let git_dir = vcs.git_dir();
        let index_path = git_dir.join("index");
        let index = if index_path.is_file() {
            Some(read_bytes(&index_path)?)
        } else {
            None
        };
        let mut merge_state = Vec::new();
        for name in ["MERGE_HEAD", "MERGE_MSG", "MERGE_MODE"] {
            let path = git_dir.join(name);
            if path.is_file() {
                let bytes = read_bytes(&path)?;
                merge_state.push((path, bytes));
            }
        }
        Ok(Self {
            head: vcs.head_sha()?,
            index,
            merge_state,
            files,
        })
    }

    fn restore<V: Vcs>(&self, vcs: &V) -> Result<(), ConflictError> {
        let moved = vcs.head_sha()? != self.head;
        if let (true, Some(head)) = (moved, &self.head) {
            vcs.reset_soft(head)?;
        }
        for (path, bytes) in &self.merge_state {
            write_bytes(path, bytes)?;
        }
        if let Some(bytes) = &self.index {
            write_bytes(&vcs.git_dir().join("index"), bytes)?;
        }
        for (path, bytes) in &self.files {
            write_bytes(path, bytes)?;
        }
        Ok(())
    }
}

/// Resolve every conflicting file with `strategy` and commit the merge.
///
/// Files are resolved in memory before anything is written. The commit and
/// the history records share one database transaction; if any step fails
/// the files, index, and merge state are put back.
pub fn resolve<V: Vcs>(
    vcs: &V,
    db: &Database,
    strategy: Strategy,
    who: &Identity,
) -> Result<ResolveOutcome, ConflictError> {
    if !vcs.is_merging() {
        return Ok(ResolveOutcome::NoMergeInProgress);
    }
    let files = conflicted_files(vcs)?;
    if files.is_empty() {
        return Ok(ResolveOutcome::NoConflicts);
    }

    let workdir = vcs.workdir()?.to_path_buf();
    let mut originals = Vec::with_capacity(files.len());
    let mut resolved = Vec::with_capacity(files.len());
    for file in &files {
        let abs = workdir.join(&file.path);
        let bytes = read_bytes(&abs)?;
        let content = resolve_bytes(&bytes, strategy);
        let record = NewConflictRecord {
            file_path: file.path.clone(),
            strategy: strategy.to_string(),
            diff_before: file.diff.clone(),
            resolved_content: String::from_utf8_lossy(&content).into_owned(),
        };
        resolved.push((record, content));
        originals.push((abs, bytes));
    }

    let snapshot = Snapshot::capture(vcs, originals)?;
    let applied = apply(vcs, db, &workdir, &resolved, strategy, who);

    match applied {
        Ok((commit_sha, record_ids)) => {
            info!(sha = %commit_sha, files = files.len(), %strategy, "conflicts resolved");
            Ok(ResolveOutcome::Resolved {
                strategy,
                commit_sha,
                files,
                record_ids,
                tests: None,
            })
        }
        Err(e) => {
            warn!(error = %e, "resolution failed, restoring repository");
            if let Err(restore_err) = snapshot.restore(vcs) {
                error!(error = %restore_err, "failed to restore repository after resolution error");
            }
            Err(e)
        }
    }
}

fn apply<V: Vcs>(
    vcs: &V,
    db: &Database,
    workdir: &Path,
    resolved: &[(NewConflictRecord, Vec<u8>)],
    strategy: Strategy,
    who: &Identity,
) -> Result<(String, Vec<i64>), ConflictError> {
    for (record, content) in resolved {
        write_bytes(&workdir.join(&record.file_path), content)?;
        vcs.stage(&record.file_path)?;
    }
    db.transaction(|conn| {
        let mut ids = Vec::with_capacity(resolved.len());
        for (record, _) in resolved {
            ids.push(queries::insert_conflict_record(conn, record)?);
        }
        let sha = vcs.commit_staged(&auto_commit_message(strategy), who)?;
        Ok((sha, ids))
    })
}

/// Abort an in-progress merge, or undo the last automatic resolution.
pub fn abort<V: Vcs>(vcs: &V) -> Result<AbortOutcome, ConflictError> {
    if vcs.is_merging() {
        vcs.reset_hard("HEAD")?;
        info!("merge aborted");
        return Ok(AbortOutcome::MergeAborted);
    }
    let last = vcs.head_message()?.unwrap_or_default();
    if last.starts_with(AUTO_COMMIT_PREFIX) {
        vcs.reset_hard("HEAD~1")?;
        info!("automatic resolution commit undone");
        return Ok(AbortOutcome::AutoResolutionUndone);
    }
    Ok(AbortOutcome::AlreadyCompleted)
}

/// Run `task` against a freshly opened repository on the blocking pool.
async fn on_repo<T, F>(repo: &Path, task: F) -> Result<T, ConflictError>
where
    T: Send + 'static,
    F: FnOnce(&GitClient) -> Result<T, ConflictError> + Send + 'static,
{
    let repo = repo.to_path_buf();
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || {
        let _enter = span.enter();
        let client = GitClient::open(&repo)?;
        task(&client)
    })
    .await
    .map_err(|e| ConflictError::TaskFailed(e.to_string()))?
}

/// Conflict operations on local repositories, serialized per repository.
///
/// Every operation, detection included, holds the repository's lock so a
/// reader never sees a half-resolved tree.
pub struct ConflictService {
    db: Arc<Database>,
    locks: RepoLocks,
    identity: Identity,
}

impl ConflictService {
    pub fn new(db: Arc<Database>, locks: RepoLocks, identity: Identity) -> Self {
        Self {
            db,
            locks,
            identity,
        }
    }

    pub async fn detect(&self, repo: &Path) -> Result<DetectOutcome, ConflictError> {
        let _guard = self.locks.acquire(&RepoLocks::repository_key(repo)).await;
        on_repo(repo, detect::<GitClient>)
            .instrument(info_span!("detect", repo = %repo.display()))
            .await
    }

    pub async fn resolve(
        &self,
        repo: &Path,
        strategy: Strategy,
    ) -> Result<ResolveOutcome, ConflictError> {
        self.resolve_with_tests(repo, strategy, None).await
    }

    /// Resolve, then run the project's tests on the merged tree while the
    /// repository is still locked. With `tests` unset this is [`Self::resolve`].
    pub async fn resolve_with_tests(
        &self,
        repo: &Path,
        strategy: Strategy,
        tests: Option<&TestGateConfig>,
    ) -> Result<ResolveOutcome, ConflictError> {
        let _guard = self.locks.acquire(&RepoLocks::repository_key(repo)).await;
        let span = info_span!("resolve", repo = %repo.display(), %strategy);

        let db = Arc::clone(&self.db);
        let identity = self.identity.clone();
        let mut outcome = on_repo(repo, move |client| {
            resolve(client, &db, strategy, &identity)
        })
        .instrument(span.clone())
        .await?;

        if let (Some(config), ResolveOutcome::Resolved { tests, .. }) = (tests, &mut outcome) {
            let gate = TestGate::new(config).run(repo).instrument(span).await?;
            if !gate.passed {
                warn!(findings = gate.findings.len(), "post-merge tests failed");
            }
            *tests = Some(gate);
        }
        Ok(outcome)
    }

    pub async fn abort(&self, repo: &Path) -> Result<AbortOutcome, ConflictError> {
        let _guard = self.locks.acquire(&RepoLocks::repository_key(repo)).await;
        on_repo(repo, abort::<GitClient>)
            .instrument(info_span!("abort", repo = %repo.display()))
            .await
    }

    pub fn list_resolutions(&self, limit: u32) -> Result<Vec<ConflictRecord>, ConflictError> {
        Ok(self.db.list_resolutions(limit)?)
    }

    pub fn get_resolution(&self, id: i64) -> Result<ConflictRecord, ConflictError> {
        Ok(self.db.get_resolution(id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GitError;
    use crate::git::test_support::{init_repo, make_conflict, who};

    const LOCAL: &str = "local line\n";
    const REMOTE: &str = "remote line\n";

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn write_commit(client: &GitClient, file: &str, content: &str, message: &str) -> String {
        fs::write(client.repo_path().join(file), content).unwrap();
        client.commit_all(message, &who()).unwrap()
    }

    #[test]
    fn test_detect_without_merge() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let client = GitClient::open(dir.path()).unwrap();
        let outcome = detect(&client).unwrap();
        assert_eq!(outcome, DetectOutcome::NoMergeInProgress);
        assert!(outcome.to_string().starts_with("No merge in progress"));
    }

    #[test]
    fn test_detect_lists_conflict() {
        let dir = tempfile::tempdir().unwrap();
        make_conflict(dir.path(), "notes.txt", LOCAL, REMOTE);
        let client = GitClient::open(dir.path()).unwrap();

        let outcome = detect(&client).unwrap();
        let DetectOutcome::Conflicts(files) = &outcome else {
            panic!("expected conflicts, got {outcome:?}");
        };
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "notes.txt");
        let text = outcome.to_string();
        assert!(text.starts_with("Conflicting files:\n- notes.txt\n"));
        assert!(client.is_merging());
    }

    #[test]
    fn test_resolve_keep_theirs() {
        let dir = tempfile::tempdir().unwrap();
        let ours = make_conflict(dir.path(), "notes.txt", LOCAL, REMOTE);
        let client = GitClient::open(dir.path()).unwrap();
        let db = setup_db();

        let outcome = resolve(&client, &db, Strategy::KeepTheirs, &who()).unwrap();
        let ResolveOutcome::Resolved {
            commit_sha,
            record_ids,
            ..
        } = &outcome
        else {
            panic!("expected resolution, got {outcome:?}");
        };

        let content = fs::read_to_string(dir.path().join("notes.txt")).unwrap();
        assert_eq!(content.trim_end(), "remote line");
        assert_eq!(record_ids.len(), 1);
        assert_eq!(db.count_resolutions().unwrap(), 1);
        let record = db.get_resolution(record_ids[0]).unwrap();
        assert_eq!(record.strategy, "keep-theirs");
        assert_eq!(record.resolved_content, REMOTE);

        let message = client.head_message().unwrap().unwrap();
        assert!(message.contains("keep-theirs"));
        assert!(!client.is_merging());

        let head = client.repo().find_commit(git2::Oid::from_str(commit_sha).unwrap()).unwrap();
        assert_eq!(head.parent_count(), 2);
        assert_eq!(head.parent_id(0).unwrap().to_string(), ours);
    }

    #[test]
    fn test_resolve_keep_mine() {
        let dir = tempfile::tempdir().unwrap();
        make_conflict(dir.path(), "notes.txt", LOCAL, REMOTE);
        let client = GitClient::open(dir.path()).unwrap();
        let db = setup_db();

        resolve(&client, &db, Strategy::KeepMine, &who()).unwrap();
        let content = fs::read_to_string(dir.path().join("notes.txt")).unwrap();
        assert_eq!(content, LOCAL);
    }

    #[test]
    fn test_resolve_failure_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let ours = make_conflict(dir.path(), "notes.txt", LOCAL, REMOTE);
        let client = GitClient::open(dir.path()).unwrap();
        let before = fs::read(dir.path().join("notes.txt")).unwrap();

        // An uninitialised database makes the record insert fail.
        let db = Database::in_memory().unwrap();
        let err = resolve(&client, &db, Strategy::KeepTheirs, &who()).unwrap_err();
        assert!(matches!(err, ConflictError::DatabaseError(_)));

        assert_eq!(fs::read(dir.path().join("notes.txt")).unwrap(), before);
        assert!(client.is_merging());
        assert_eq!(client.head_sha().unwrap().as_deref(), Some(ours.as_str()));
        assert_eq!(client.list_conflicts().unwrap(), vec!["notes.txt".to_string()]);
    }

    #[test]
    fn test_abort_mid_merge() {
        let dir = tempfile::tempdir().unwrap();
        let ours = make_conflict(dir.path(), "notes.txt", LOCAL, REMOTE);
        let client = GitClient::open(dir.path()).unwrap();

        let outcome = abort(&client).unwrap();
        assert_eq!(outcome, AbortOutcome::MergeAborted);
        assert!(!client.is_merging());
        assert_eq!(client.head_sha().unwrap().as_deref(), Some(ours.as_str()));
        assert_eq!(fs::read_to_string(dir.path().join("notes.txt")).unwrap(), LOCAL);
    }

    #[test]
    fn test_abort_undoes_auto_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let ours = make_conflict(dir.path(), "notes.txt", LOCAL, REMOTE);
        let client = GitClient::open(dir.path()).unwrap();
        let db = setup_db();
        resolve(&client, &db, Strategy::Merge, &who()).unwrap();

        let outcome = abort(&client).unwrap();
        assert_eq!(outcome, AbortOutcome::AutoResolutionUndone);
        assert_eq!(client.head_sha().unwrap().as_deref(), Some(ours.as_str()));
    }

    #[test]
    fn test_abort_refuses_after_manual_commit() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let client = GitClient::open(dir.path()).unwrap();
        let head = write_commit(&client, "a.txt", "a\n", "regular work");

        let outcome = abort(&client).unwrap();
        assert_eq!(outcome, AbortOutcome::AlreadyCompleted);
        assert_eq!(outcome.to_string(), "Merge was already completed and committed. Cannot abort.");
        assert_eq!(client.head_sha().unwrap(), Some(head));
    }

    #[tokio::test]
    async fn test_service_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        make_conflict(dir.path(), "notes.txt", LOCAL, REMOTE);
        let service = ConflictService::new(Arc::new(setup_db()), RepoLocks::new(), who());

        assert!(matches!(
            service.detect(dir.path()).await.unwrap(),
            DetectOutcome::Conflicts(_)
        ));
        let outcome = service.resolve(dir.path(), Strategy::KeepTheirs).await.unwrap();
        assert!(outcome.to_string().contains("keep-theirs"));
        assert_eq!(
            service.detect(dir.path()).await.unwrap(),
            DetectOutcome::NoMergeInProgress
        );
        assert_eq!(service.list_resolutions(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_service_missing_repo() {
        let dir = tempfile::tempdir().unwrap();
        let service = ConflictService::new(Arc::new(setup_db()), RepoLocks::new(), who());
        let err = service.detect(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, ConflictError::GitError(GitError::RepositoryNotFound(_))));
    }

    #[tokio::test]
    async fn test_detect_waits_for_repository_lock() {
        let dir = tempfile::tempdir().unwrap();
        make_conflict(dir.path(), "notes.txt", LOCAL, REMOTE);
        let locks = RepoLocks::new();
        let service = ConflictService::new(Arc::new(setup_db()), locks.clone(), who());

        let guard = locks.acquire(&RepoLocks::repository_key(dir.path())).await;
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            service.detect(dir.path()),
        )
        .await;
        assert!(pending.is_err(), "detect ran while the repository was locked");

        drop(guard);
        assert!(matches!(
            service.detect(dir.path()).await.unwrap(),
            DetectOutcome::Conflicts(_)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_with_tests_reports_outcome() {
        let dir = tempfile::tempdir().unwrap();
        make_conflict(dir.path(), "notes.txt", LOCAL, REMOTE);
        let service = ConflictService::new(Arc::new(setup_db()), RepoLocks::new(), who());
        let config = TestGateConfig {
            manifest: "notes.txt".into(),
            command: vec!["sh".into(), "-c".into(), "grep -q 'remote line' notes.txt".into()],
            coverage_report: PathBuf::from("coverage.xml"),
            ..TestGateConfig::default()
        };

        let outcome = service
            .resolve_with_tests(dir.path(), Strategy::KeepMine, Some(&config))
            .await
            .unwrap();
        let ResolveOutcome::Resolved { tests: Some(gate), .. } = &outcome else {
            panic!("expected a test outcome, got {outcome:?}");
        };
        assert!(!gate.passed);
        assert_eq!(gate.findings, vec!["test command exited with status 1".to_string()]);
        assert!(outcome.to_string().contains("Post-merge tests failed:\n- test command exited"));
    }

    #[tokio::test]
    async fn test_resolve_with_tests_skipped_without_merge() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let service = ConflictService::new(Arc::new(setup_db()), RepoLocks::new(), who());
        let config = TestGateConfig::default();
        let outcome = service
            .resolve_with_tests(dir.path(), Strategy::Merge, Some(&config))
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::NoMergeInProgress);
    }
}
