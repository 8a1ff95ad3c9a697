//! Conflict detection, resolution, and abort on real mid-merge repositories,
//! with history persisted to an on-disk SQLite database.

use std::path::Path;
use std::sync::Arc;

use git2::{build::CheckoutBuilder, Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

use uploadgate_core::conflict::{AbortOutcome, DetectOutcome, ResolveOutcome};
use uploadgate_core::git::Identity;
use uploadgate_core::{ConflictService, Database, RepoLocks, Strategy};

// ===========================================================================
// Helpers
// ===========================================================================

fn commit_files(
    repo: &Repository,
    update_ref: &str,
    parents: &[Oid],
    files: &[(&str, &str)],
    message: &str,
) -> Oid {
    let mut builder = repo.treebuilder(None).unwrap();
    for (name, body) in files {
        let blob = repo.blob(body.as_bytes()).unwrap();
        builder.insert(*name, blob, 0o100644).unwrap();
    }
    let tree = repo.find_tree(builder.write().unwrap()).unwrap();
    let parents: Vec<_> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
    let parent_refs: Vec<_> = parents.iter().collect();
    let sig = Signature::now("Dev", "dev@example.com").unwrap();
    repo.commit(Some(update_ref), &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
}

/// Put `path` mid-merge with the given files conflicting. Returns HEAD.
fn mid_merge(path: &Path, files: &[(&str, &str, &str)]) -> Oid {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(path, &opts).unwrap();

    let base: Vec<_> = files.iter().map(|(n, _, _)| (*n, "shared\n")).collect();
    let base = commit_files(&repo, "HEAD", &[], &base, "base");

    let theirs: Vec<_> = files.iter().map(|(n, _, t)| (*n, *t)).collect();
    let theirs = commit_files(&repo, "refs/heads/incoming", &[base], &theirs, "incoming");

    let ours: Vec<_> = files.iter().map(|(n, o, _)| (*n, *o)).collect();
    let ours = commit_files(&repo, "HEAD", &[base], &ours, "local work");
    repo.checkout_head(Some(CheckoutBuilder::new().force())).unwrap();

    let incoming = repo.find_annotated_commit(theirs).unwrap();
    repo.merge(&[&incoming], None, None).unwrap();
    ours
}

fn head_of(path: &Path) -> git2::Oid {
    Repository::open(path).unwrap().head().unwrap().target().unwrap()
}

fn service(dir: &TempDir) -> ConflictService {
    let db = Database::open_initialized(dir.path().join("history.db")).unwrap();
    ConflictService::new(
        Arc::new(db),
        RepoLocks::new(),
        Identity::new("uploadgate", "uploadgate@localhost"),
    )
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_keep_theirs_end_to_end() {
    let dir = TempDir::new().unwrap();
    let repo_path = dir.path().join("repo");
    let ours = mid_merge(&repo_path, &[("notes.txt", "local line\n", "remote line\n")]);
    let service = service(&dir);

    let detected = service.detect(&repo_path).await.unwrap();
    let DetectOutcome::Conflicts(files) = &detected else {
        panic!("expected conflicts, got {detected:?}");
    };
    assert_eq!(files[0].path, "notes.txt");

    let resolved = service.resolve(&repo_path, Strategy::KeepTheirs).await.unwrap();
    let ResolveOutcome::Resolved { commit_sha, record_ids, .. } = &resolved else {
        panic!("expected resolution, got {resolved:?}");
    };

    assert_eq!(
        std::fs::read_to_string(repo_path.join("notes.txt")).unwrap(),
        "remote line\n"
    );
    assert_eq!(record_ids.len(), 1);

    let repo = Repository::open(&repo_path).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.id().to_string(), *commit_sha);
    assert_eq!(head.message(), Some("Automatic conflict resolution (keep-theirs)"));
    assert_eq!(head.parent_count(), 2);
    assert_eq!(head.parent_id(0).unwrap(), ours);
    assert!(!repo_path.join(".git/MERGE_HEAD").exists());

    let history = service.list_resolutions(10).unwrap();
    assert_eq!(history.len(), 1);
    let record = service.get_resolution(history[0].id).unwrap();
    assert_eq!(record.file_path, "notes.txt");
    assert_eq!(record.strategy, "keep-theirs");
    assert_eq!(record.resolved_content, "remote line\n");
}

#[tokio::test]
async fn test_non_utf8_bytes_survive_resolution() {
    let dir = TempDir::new().unwrap();
    let repo_path = dir.path().join("repo");
    mid_merge(&repo_path, &[("menu.txt", "local line\n", "remote line\n")]);
    // Latin-1 content around the conflict block.
    std::fs::write(
        repo_path.join("menu.txt"),
        b"caf\xe9\n<<<<<<< HEAD\nlocal line\n=======\nremote line\n>>>>>>> incoming\nna\xefve\n",
    )
    .unwrap();
    let service = service(&dir);

    service.resolve(&repo_path, Strategy::KeepTheirs).await.unwrap();

    let expected = b"caf\xe9\nremote line\nna\xefve\n";
    assert_eq!(std::fs::read(repo_path.join("menu.txt")).unwrap(), expected);

    let repo = Repository::open(&repo_path).unwrap();
    let tree = repo.head().unwrap().peel_to_tree().unwrap();
    let entry = tree.get_path(Path::new("menu.txt")).unwrap();
    let blob = repo.find_blob(entry.id()).unwrap();
    assert_eq!(blob.content(), expected);
}

#[tokio::test]
async fn test_one_record_per_file() {
    let dir = TempDir::new().unwrap();
    let repo_path = dir.path().join("repo");
    mid_merge(
        &repo_path,
        &[
            ("a.txt", "mine a\n", "theirs a\n"),
            ("b.txt", "mine b\n", "theirs b\n"),
        ],
    );
    let service = service(&dir);

    service.resolve(&repo_path, Strategy::Merge).await.unwrap();

    for (file, expected) in [("a.txt", "mine a\ntheirs a\n"), ("b.txt", "mine b\ntheirs b\n")] {
        assert_eq!(std::fs::read_to_string(repo_path.join(file)).unwrap(), expected);
    }
    let mut paths: Vec<_> = service
        .list_resolutions(10)
        .unwrap()
        .into_iter()
        .map(|r| r.file_path)
        .collect();
    paths.sort();
    assert_eq!(paths, ["a.txt", "b.txt"]);
}

#[tokio::test]
async fn test_unknown_strategy_merges() {
    let dir = TempDir::new().unwrap();
    let repo_path = dir.path().join("repo");
    mid_merge(&repo_path, &[("notes.txt", "local line\n", "remote line\n")]);
    let service = service(&dir);

    service
        .resolve(&repo_path, Strategy::parse("smart"))
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(repo_path.join("notes.txt")).unwrap(),
        "local line\nremote line\n"
    );
}

#[tokio::test]
async fn test_abort_sequence() {
    let dir = TempDir::new().unwrap();
    let repo_path = dir.path().join("repo");
    let ours = mid_merge(&repo_path, &[("notes.txt", "local line\n", "remote line\n")]);
    let service = service(&dir);

    service.resolve(&repo_path, Strategy::KeepMine).await.unwrap();
    assert_ne!(head_of(&repo_path), ours);

    assert_eq!(
        service.abort(&repo_path).await.unwrap(),
        AbortOutcome::AutoResolutionUndone
    );
    assert_eq!(head_of(&repo_path), ours);

    // "local work" is not an automatic commit, so a further abort refuses.
    let outcome = service.abort(&repo_path).await.unwrap();
    assert_eq!(outcome, AbortOutcome::AlreadyCompleted);
    assert_eq!(head_of(&repo_path), ours);
}

#[tokio::test]
async fn test_resolve_without_merge_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let repo_path = dir.path().join("repo");
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(&repo_path, &opts).unwrap();
    let head = commit_files(&repo, "HEAD", &[], &[("a.txt", "a\n")], "work");
    let service = service(&dir);

    let outcome = service.resolve(&repo_path, Strategy::KeepMine).await.unwrap();
    assert_eq!(outcome, ResolveOutcome::NoMergeInProgress);
    assert_eq!(head_of(&repo_path), head);
    assert!(service.list_resolutions(10).unwrap().is_empty());
}
