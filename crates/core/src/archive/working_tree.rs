//! Ephemeral working directories owned by a single pipeline run.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

/// A uniquely named scratch directory that is removed when dropped.
#[derive(Debug)]
pub struct WorkingTree {
    dir: TempDir,
}

impl WorkingTree {
    /// Create a fresh directory under the system temp dir with the given
    /// name prefix (e.g. `uploadgate-`).
    pub fn create(prefix: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        debug!(path = %dir.path().display(), "created working tree");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Join a `/`-separated relative path onto the tree root.
    pub fn join(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }
}

/// Render `path` relative to `base` with `/` separators.
///
/// Falls back to the full path when `path` is not under `base`.
pub fn relative_display(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
