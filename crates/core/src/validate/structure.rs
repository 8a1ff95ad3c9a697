//! Project layout checks relative to a detected project root.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{has_extension, list_files};
use crate::archive::relative_display;
use crate::config::ValidationConfig;

/// Result of the structural checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureReport {
    /// Detected project root, absolute.
    pub root: Option<PathBuf>,
    /// Ordered structural errors.
    pub errors: Vec<String>,
}

/// Checks an extracted tree against the configured layout rules.
pub struct StructuralValidator<'a> {
    config: &'a ValidationConfig,
}

impl<'a> StructuralValidator<'a> {
    pub fn new(config: &'a ValidationConfig) -> Self {
        Self { config }
    }

    /// Locate the project root: the parent of the shallowest file whose name is
    /// one of the root markers. Ties at the same depth go to the first file in
    /// sorted walk order.
    pub fn detect_root(&self, tree: &Path) -> Option<PathBuf> {
        let mut best: Option<(usize, PathBuf)> = None;
        for entry in walkdir::WalkDir::new(tree)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if !self.config.root_markers.iter().any(|m| m.as_str() == name.as_ref()) {
                continue;
            }
            let depth = entry.depth();
            if best.as_ref().map_or(true, |(d, _)| depth < *d) {
                best = Some((depth, entry.path().parent().unwrap_or(tree).to_path_buf()));
            }
        }
        best.map(|(_, root)| root)
    }

    /// Run every structural check and collect the errors in check order.
    pub fn validate(&self, tree: &Path) -> StructureReport {
        let Some(root) = self.detect_root(tree) else {
            info!("no project root marker found");
            return StructureReport {
                root: None,
                errors: vec![format!(
                    "could not detect project root (expected one of: {})",
                    self.config.root_markers.join(", ")
                )],
            };
        };
        debug!(root = %relative_display(tree, &root), "detected project root");

        let mut errors = Vec::new();
        let mut reported_source_dir = false;

        for required in &self.config.required {
            let wants_dir = required.ends_with('/');
            let candidate = root.join(required.trim_end_matches('/'));
            let present = if wants_dir {
                candidate.is_dir()
            } else {
                candidate.is_file()
            };
            if !present {
                if required.trim_end_matches('/') == self.config.source_dir {
                    reported_source_dir = true;
                }
                errors.push(format!("missing required file or directory: {required}"));
            }
        }

        let source_dir = root.join(&self.config.source_dir);
        if source_dir.is_dir() {
            let has_source = list_files(&source_dir)
                .iter()
                .any(|f| has_extension(f, &self.config.source_extensions));
            if !has_source {
                errors.push(format!(
                    "no valid source files in {}/ (accepted extensions: {})",
                    self.config.source_dir,
                    self.config.source_extensions.join(", ")
                ));
            }
        } else if !reported_source_dir {
            errors.push(format!(
                "source directory {}/ is missing",
                self.config.source_dir
            ));
        }

        let has_metadata = list_files(&root)
            .iter()
            .any(|f| has_extension(f, &self.config.metadata_extensions));
        if !has_metadata {
            errors.push(format!(
                "no metadata files found under project root (accepted extensions: {})",
                self.config.metadata_extensions.join(", ")
            ));
        }

        StructureReport {
            root: Some(root),
            errors,
        }
    }
}
