//! Domain model types shared by the pipeline, the conflict engine, and the
//! database layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::IntegrityError;
use crate::scan::DependencyReport;

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

/// An uploaded project archive together with the branch its author asked for.
///
/// Held in memory for one pipeline run and never persisted.
#[derive(Debug, Clone)]
pub struct UploadedArchive {
    pub bytes: Vec<u8>,
    /// Size as declared by the uploader (usually `bytes.len()`).
    pub declared_size: u64,
    pub target_branch: String,
}

impl UploadedArchive {
    pub fn new(bytes: Vec<u8>, target_branch: impl Into<String>) -> Self {
        let declared_size = bytes.len() as u64;
        Self {
            bytes,
            declared_size,
            target_branch: target_branch.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation report
// ---------------------------------------------------------------------------

/// Ordered list of human-readable validation errors. Empty means the upload
/// passed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    errors: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn extend<I, S>(&mut self, errors: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.errors.extend(errors.into_iter().map(Into::into));
    }

    pub fn is_passed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Quality gates
// ---------------------------------------------------------------------------

/// Result of running a single security or quality gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub name: String,
    pub passed: bool,
    pub findings: Vec<String>,
}

impl GateOutcome {
    /// Build an outcome from findings; the gate passes when there are none.
    pub fn from_findings(name: impl Into<String>, findings: Vec<String>) -> Self {
        Self {
            name: name.into(),
            passed: findings.is_empty(),
            findings,
        }
    }

    /// Render the report entries produced by this gate when it failed.
    pub fn failure_messages(&self) -> Vec<String> {
        if self.passed {
            return Vec::new();
        }
        if self.findings.is_empty() {
            return vec![format!("quality gate '{}' failed", self.name)];
        }
        self.findings
            .iter()
            .map(|f| format!("quality gate '{}' failed: {}", self.name, f))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Branch routing
// ---------------------------------------------------------------------------

/// Why a target branch was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchReason {
    /// Validation passed; contents go to the repository's default branch.
    Default,
    /// Validation failed; contents go to the branch the uploader declared.
    Declared,
}

impl std::fmt::Display for BranchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Declared => write!(f, "declared"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDecision {
    pub branch: String,
    pub reason: BranchReason,
}

// ---------------------------------------------------------------------------
// Integration
// ---------------------------------------------------------------------------

/// A commit that was pushed to the managed repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub branch: String,
    pub commit_sha: String,
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub run_id: String,
    pub report: ValidationReport,
    pub integrity: Vec<IntegrityError>,
    pub gates: Vec<GateOutcome>,
    pub decision: Option<BranchDecision>,
    pub integration: Option<IntegrationResult>,
    /// Dependency findings, once the file gates have run.
    pub dependencies: Option<DependencyReport>,
}

impl PipelineOutcome {
    pub fn is_passed(&self) -> bool {
        self.report.is_passed()
    }
}

// ---------------------------------------------------------------------------
// Conflict records
// ---------------------------------------------------------------------------

/// A persisted record of one automatically resolved file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: i64,
    pub file_path: String,
    pub strategy: String,
    pub diff_before: String,
    pub resolved_content: String,
    pub resolved_at: DateTime<Utc>,
}

/// A conflict record that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflictRecord {
    pub file_path: String,
    pub strategy: String,
    pub diff_before: String,
    pub resolved_content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_preserves_order() {
        let mut report = ValidationReport::new();
        assert!(report.is_passed());
        report.push("first");
        report.extend(vec!["second", "third"]);
        assert!(!report.is_passed());
        assert_eq!(report.errors(), &["first", "second", "third"]);
    }

    #[test]
    fn test_gate_outcome_failure_messages() {
        let ok = GateOutcome::from_findings("secrets", vec![]);
        assert!(ok.passed);
        assert!(ok.failure_messages().is_empty());

        let bad = GateOutcome::from_findings("secrets", vec!["config.yml:3".into()]);
        assert!(!bad.passed);
        assert_eq!(
            bad.failure_messages(),
            vec!["quality gate 'secrets' failed: config.yml:3".to_string()]
        );
    }

    #[test]
    fn test_uploaded_archive_declared_size() {
        let upload = UploadedArchive::new(vec![1, 2, 3], "feature/x");
        assert_eq!(upload.declared_size, 3);
        assert_eq!(upload.target_branch, "feature/x");
    }
}
