//! Structural and integrity validation of an extracted upload.

pub mod integrity;
pub mod structure;

use std::path::{Path, PathBuf};

pub use structure::{StructuralValidator, StructureReport};

/// All regular files under `dir`, in sorted walk order.
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// Case-insensitive match of a file's extension against `.ext` entries.
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    let dotted = format!(".{}", ext.to_string_lossy().to_ascii_lowercase());
    extensions.iter().any(|e| e.eq_ignore_ascii_case(&dotted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_extension() {
        let exts = vec![".py".to_string(), ".JS".to_string()];
        assert!(has_extension(Path::new("src/a.py"), &exts));
        assert!(has_extension(Path::new("src/a.Js"), &exts));
        assert!(!has_extension(Path::new("src/a.txt"), &exts));
        assert!(!has_extension(Path::new(".env"), &exts));
    }
}
