//! Safe zip extraction into a [`WorkingTree`](super::WorkingTree).

use std::fs;
use std::io::{self, Cursor};
use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::errors::StructuralError;
use crate::models::UploadedArchive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Counts gathered while unpacking an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub skipped: usize,
    /// Extracted files whose names fall outside [`has_conventional_name`].
    pub unconventional_names: Vec<String>,
}

fn file_name_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").ok()).as_ref()
}

/// True if the last component of `name` uses only ASCII letters, digits,
/// `_`, `-`, and `.`. Anything else is extracted anyway, with a warning.
pub fn has_conventional_name(name: &str) -> bool {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    file_name_pattern().map_or(true, |re| re.is_match(file_name))
}

/// Reject uploads that are empty or larger than `max_bytes`.
pub fn check_upload(upload: &UploadedArchive, max_bytes: u64) -> Result<(), StructuralError> {
    if upload.bytes.is_empty() || upload.declared_size == 0 {
        return Err(StructuralError::EmptyArchive);
    }
    let size = upload.declared_size.max(upload.bytes.len() as u64);
    if size > max_bytes {
        return Err(StructuralError::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    Ok(())
}

/// Returns true when an entry name could escape the extraction directory.
pub fn is_unsafe_entry_name(name: &str) -> bool {
    if name.starts_with('/') || name.starts_with('\\') {
        return true;
    }
    name.split(['/', '\\']).any(|part| part == "..")
}

/// Unpack `bytes` into `dest`.
///
/// Every entry name is checked before anything is written, so a rejected
/// archive leaves `dest` untouched. Symlinks and other special entries are
/// skipped.
pub fn extract(bytes: &[u8], dest: &Path) -> Result<ExtractSummary, StructuralError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    for name in archive.file_names() {
        if is_unsafe_entry_name(name) {
            return Err(StructuralError::UnsafeEntry(name.to_string()));
        }
    }

    let mut summary = ExtractSummary::default();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        debug!(entry = %name, "extracting archive entry");

        let target = dest.join(name.trim_end_matches('/'));

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            summary.directories += 1;
            continue;
        }

        let is_symlink = entry
            .unix_mode()
            .map(|mode| mode & S_IFMT == S_IFLNK)
            .unwrap_or(false);
        if is_symlink || !entry.is_file() {
            debug!(entry = %name, "skipping non-regular archive entry");
            summary.skipped += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if !has_conventional_name(&name) {
            warn!(entry = %name, "unconventional file name");
            summary.unconventional_names.push(name.clone());
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        summary.files += 1;
    }

    info!(
        files = summary.files,
        directories = summary.directories,
        skipped = summary.skipped,
        "archive extracted"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default();
        for (name, content) in entries {
            match content {
                Some(body) => {
                    writer.start_file(*name, options).unwrap();
                    writer.write_all(body.as_bytes()).unwrap();
                }
                None => writer.add_directory(*name, options).unwrap(),
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_writes_files_and_dirs() {
        let bytes = build_zip(&[
            ("proj/", None),
            ("proj/README.md", Some("# hello")),
            ("proj/src/main.py", Some("print('hi')\n")),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let summary = extract(&bytes, dir.path()).unwrap();

        assert_eq!(summary.files, 2);
        assert_eq!(summary.directories, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("proj/src/main.py")).unwrap(),
            "print('hi')\n"
        );
    }

    #[test]
    fn test_parent_traversal_rejected_before_writing() {
        let bytes = build_zip(&[
            ("proj/README.md", Some("ok")),
            ("proj/../../evil.sh", Some("rm -rf /")),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let err = extract(&bytes, dir.path()).unwrap_err();

        assert!(matches!(err, StructuralError::UnsafeEntry(ref n) if n == "proj/../../evil.sh"));
        assert!(!dir.path().join("proj").exists());
    }

    #[test]
    fn test_unsafe_entry_names() {
        assert!(is_unsafe_entry_name("/etc/passwd"));
        assert!(is_unsafe_entry_name("../up"));
        assert!(is_unsafe_entry_name("a/../../b"));
        assert!(is_unsafe_entry_name("a\\..\\b"));
        assert!(!is_unsafe_entry_name("proj/src/a..b.py"));
        assert!(!is_unsafe_entry_name("proj/README.md"));
    }

    #[test]
    fn test_symlink_entries_skipped() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("proj/README.md", FileOptions::default()).unwrap();
        writer.write_all(b"# hello").unwrap();
        writer
            .add_symlink("proj/passwd", "/etc/passwd", FileOptions::default())
            .unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let dir = tempfile::tempdir().unwrap();
        let summary = extract(&bytes, dir.path()).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.skipped, 1);
        let link = dir.path().join("proj/passwd");
        assert!(fs::symlink_metadata(&link).is_err());
    }

    #[test]
    fn test_unconventional_names_extracted_and_listed() {
        let bytes = build_zip(&[
            ("proj/README.md", Some("ok")),
            ("proj/src/my notes (1).txt", Some("x")),
            ("proj/src/ütil.py", Some("y")),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let summary = extract(&bytes, dir.path()).unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(
            summary.unconventional_names,
            vec!["proj/src/my notes (1).txt".to_string(), "proj/src/ütil.py".to_string()]
        );
        assert!(dir.path().join("proj/src/my notes (1).txt").is_file());
    }

    #[test]
    fn test_conventional_names() {
        assert!(has_conventional_name("proj/src/main_v2-final.py"));
        assert!(has_conventional_name(".env"));
        assert!(!has_conventional_name("proj/a b.txt"));
        assert!(!has_conventional_name("proj/data$.csv"));
    }

    #[test]
    fn test_garbage_is_invalid_archive() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract(b"definitely not a zip", dir.path()).unwrap_err();
        assert!(matches!(err, StructuralError::InvalidArchive(_)));
    }

    #[test]
    fn test_check_upload_limits() {
        let empty = UploadedArchive::new(Vec::new(), "main");
        assert!(matches!(
            check_upload(&empty, 10),
            Err(StructuralError::EmptyArchive)
        ));

        let big = UploadedArchive::new(vec![0u8; 11], "main");
        assert!(matches!(
            check_upload(&big, 10),
            Err(StructuralError::TooLarge { size: 11, limit: 10 })
        ));

        let ok = UploadedArchive::new(vec![0u8; 10], "main");
        assert!(check_upload(&ok, 10).is_ok());
    }
}
