//! SHA-256 content hashing against known-good values.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::list_files;
use crate::archive::relative_display;
use crate::errors::IntegrityError;

/// Lowercase-hex SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compare one file against its expected hash.
pub fn check_file(path: &Path, rel: &str, expected: &str) -> Option<IntegrityError> {
    match hash_file(path) {
        Ok(actual) if actual.eq_ignore_ascii_case(expected) => {
            debug!(path = %rel, "hash matches");
            None
        }
        Ok(actual) => {
            warn!(path = %rel, expected = %expected, actual = %actual, "file hash mismatch");
            Some(IntegrityError::HashMismatch {
                path: rel.to_string(),
                expected: expected.to_string(),
                actual,
            })
        }
        Err(e) => {
            warn!(path = %rel, error = %e, "failed to hash file");
            Some(IntegrityError::Unreadable {
                path: rel.to_string(),
                detail: e.to_string(),
            })
        }
    }
}

/// Hash every regular file under `tree` and compare against `expected`.
///
/// Keys are `/`-separated paths relative to `tree`. Files without an
/// expectation are ignored. Nothing here aborts the run.
pub fn check(tree: &Path, expected: &BTreeMap<String, String>) -> Vec<IntegrityError> {
    if expected.is_empty() {
        debug!("no expected hashes configured, skipping integrity check");
        return Vec::new();
    }

    list_files(tree)
        .into_iter()
        .filter_map(|file| {
            let rel = relative_display(tree, &file);
            let want = expected.get(&rel)?;
            check_file(&file, &rel, want)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    // sha256("hello")
    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello").unwrap();
        assert_eq!(hash_file(&path).unwrap(), HELLO);
    }

    #[test]
    fn test_mismatch_reported_match_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("proj")).unwrap();
        fs::write(dir.path().join("proj/good.txt"), "hello").unwrap();
        fs::write(dir.path().join("proj/bad.txt"), "tampered").unwrap();

        let mut expected = BTreeMap::new();
        expected.insert("proj/good.txt".to_string(), HELLO.to_string());
        expected.insert("proj/bad.txt".to_string(), HELLO.to_string());
        expected.insert("proj/absent.txt".to_string(), HELLO.to_string());

        let findings = check(dir.path(), &expected);
        assert_eq!(findings.len(), 1);
        assert!(matches!(
            &findings[0],
            IntegrityError::HashMismatch { path, .. } if path == "proj/bad.txt"
        ));
    }

    #[test]
    fn test_unreadable_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("proj/gone.txt");

        let finding = check_file(&gone, "proj/gone.txt", HELLO).unwrap();
        let IntegrityError::Unreadable { path, detail } = &finding else {
            panic!("expected an unreadable finding, got {finding:?}");
        };
        assert_eq!(path, "proj/gone.txt");
        assert!(!detail.is_empty());
        assert!(finding.to_string().starts_with("failed to hash proj/gone.txt: "));
        assert_eq!(check_file(&gone, "proj/gone.txt", HELLO), Some(finding));
    }
}
