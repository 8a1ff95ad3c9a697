//! One upload, end to end: extract, validate, gate, route, integrate.

use std::path::{Path, PathBuf};

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::archive::{check_upload, extract, WorkingTree};
use crate::config::AppConfig;
use crate::errors::{CoreError, IntegrityError, StructuralError};
use crate::integrator::RepositoryIntegrator;
use crate::lock::RepoLocks;
use crate::models::{PipelineOutcome, UploadedArchive};
use crate::router;
use crate::scan::{self, coverage::TestGate};
use crate::validate::{integrity, StructuralValidator};

/// Runs uploads against a fixed configuration.
pub struct Pipeline {
    config: AppConfig,
    integrator: Option<RepositoryIntegrator>,
}

/// What the synchronous stages found in one extracted tree.
struct Inspection {
    outcome: PipelineOutcome,
    root: Option<PathBuf>,
    structural_ok: bool,
}

/// Extract `bytes` into `tree`, then run the structural, integrity, and
/// file-gate checks. Everything here is file I/O.
fn inspect(
    config: &AppConfig,
    run_id: String,
    bytes: &[u8],
    tree: &Path,
) -> Result<Inspection, CoreError> {
    let summary = extract(bytes, tree)?;
    info!(files = summary.files, skipped = summary.skipped, "archive extracted");

    let mut outcome = PipelineOutcome {
        run_id,
        ..PipelineOutcome::default()
    };

    let structure = StructuralValidator::new(&config.validation).validate(tree);
    let structural_ok = structure.errors.is_empty();
    outcome.report.extend(structure.errors);
    let Some(root) = structure.root else {
        warn!("no project root, skipping remaining stages");
        return Ok(Inspection {
            outcome,
            root: None,
            structural_ok,
        });
    };

    outcome.integrity = integrity::check(tree, &config.integrity.expected_hashes);
    if config.integrity.enforce {
        outcome.report.extend(
            outcome
                .integrity
                .iter()
                .filter(|e| matches!(e, IntegrityError::HashMismatch { .. }))
                .map(ToString::to_string),
        );
    }

    if structural_ok {
        let scan = scan::scan_files(&root, &config.scanners);
        for gate in &scan.gates {
            outcome.report.extend(gate.failure_messages());
        }
        outcome.gates = scan.gates;
        outcome.dependencies = Some(scan.dependencies);
    }

    Ok(Inspection {
        outcome,
        root: Some(root),
        structural_ok,
    })
}

impl Pipeline {
    /// A pipeline that pushes routed uploads to the configured remote.
    pub fn new(config: AppConfig, locks: RepoLocks) -> Self {
        let integrator = RepositoryIntegrator::new(config.repository.clone(), locks);
        Self {
            config,
            integrator: Some(integrator),
        }
    }

    /// A pipeline that stops after routing and never touches a remote.
    pub fn validate_only(config: AppConfig) -> Self {
        Self {
            config,
            integrator: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Process `upload` and report every finding.
    ///
    /// Rule failures end up in the report; `Err` is reserved for failures
    /// that stop the run (unreadable archive, test runner launch, git).
    pub async fn run(&self, upload: UploadedArchive) -> Result<PipelineOutcome, CoreError> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline", run_id = %run_id, declared = %upload.target_branch);
        self.run_inner(run_id, upload).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: String,
        upload: UploadedArchive,
    ) -> Result<PipelineOutcome, CoreError> {
        check_upload(&upload, self.config.validation.max_archive_bytes)?;
        let UploadedArchive {
            bytes,
            target_branch,
            ..
        } = upload;
        let tree = WorkingTree::create("uploadgate-").map_err(StructuralError::from)?;

        let config = self.config.clone();
        let dest = tree.path().to_path_buf();
        let span = tracing::Span::current();
        let Inspection {
            mut outcome,
            root,
            structural_ok,
        } = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            inspect(&config, run_id, &bytes, &dest)
        })
        .await
        .map_err(|e| CoreError::TaskFailed(e.to_string()))??;

        let Some(root) = root else {
            return Ok(outcome);
        };

        let tests = &self.config.scanners.tests;
        if structural_ok && tests.enabled {
            let gate = TestGate::new(tests).run(&root).await?;
            outcome.report.extend(gate.failure_messages());
            outcome.gates.push(gate);
        }

        let passed = outcome.report.is_passed();
        let Some(integrator) = &self.integrator else {
            let decision = router::route(
                passed,
                &target_branch,
                &[],
                &self.config.repository.remote_name,
            );
            outcome.decision = Some(decision);
            info!(passed, "validation finished, integration disabled");
            return Ok(outcome);
        };

        let branches = integrator.remote_branches().await?;
        let decision = router::route(passed, &target_branch, &branches, integrator.remote_name());
        info!(passed, branch = %decision.branch, reason = %decision.reason, "routed upload");
        let integration = integrator.integrate(&root, &decision.branch).await?;
        outcome.decision = Some(decision);
        outcome.integration = Some(integration);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::FileOptions;
    use zip::ZipWriter;

    use super::*;
    use crate::models::BranchReason;

    fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.scanners.tests.enabled = false;
        config
    }

    fn clean_project() -> Vec<u8> {
        zip_of(&[
            ("proj/README.md", "# app\n"),
            ("proj/src/app.py", "print('hi')\n"),
            ("proj/package.json", "{\"dependencies\": {\"left-pad\": \"1.3.0\"}}"),
        ])
    }

    #[tokio::test]
    async fn test_clean_project_routes_to_default() {
        let pipeline = Pipeline::validate_only(offline_config());
        let outcome = pipeline
            .run(UploadedArchive::new(clean_project(), "feature/x"))
            .await
            .unwrap();
        assert!(outcome.is_passed(), "{:?}", outcome.report.errors());
        let decision = outcome.decision.unwrap();
        assert_eq!(decision.branch, "main");
        assert_eq!(decision.reason, BranchReason::Default);
        assert_eq!(outcome.gates.len(), 3);
        let deps = outcome.dependencies.unwrap();
        assert_eq!(deps.manifests, vec!["package.json"]);
        assert!(deps.vulnerable.is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_is_single_error() {
        let pipeline = Pipeline::validate_only(offline_config());
        let bytes = zip_of(&[("proj/src/app.py", "x = 1\n")]);
        let outcome = pipeline.run(UploadedArchive::new(bytes, "dev")).await.unwrap();
        assert_eq!(outcome.report.len(), 1);
        assert!(outcome.report.errors()[0].starts_with("could not detect project root"));
        assert!(outcome.decision.is_none());
        assert!(outcome.gates.is_empty());
    }

    #[tokio::test]
    async fn test_failing_gate_routes_to_declared() {
        let pipeline = Pipeline::validate_only(offline_config());
        let bytes = zip_of(&[
            ("proj/README.md", "# app\n"),
            ("proj/src/app.py", "eval(input())\n"),
            ("proj/config.json", "{}"),
        ]);
        let outcome = pipeline.run(UploadedArchive::new(bytes, "dev")).await.unwrap();
        assert!(!outcome.is_passed());
        assert!(outcome
            .report
            .errors()
            .iter()
            .any(|e| e.starts_with("quality gate 'static-analysis' failed: src/app.py:1:")));
        let decision = outcome.decision.unwrap();
        assert_eq!(decision.branch, "dev");
        assert_eq!(decision.reason, BranchReason::Declared);
    }

    #[tokio::test]
    async fn test_same_archive_same_report() {
        let pipeline = Pipeline::validate_only(offline_config());
        let bytes = zip_of(&[("proj/README.md", "# app\n"), ("proj/src/empty.txt", "")]);
        let first = pipeline
            .run(UploadedArchive::new(bytes.clone(), "dev"))
            .await
            .unwrap();
        let second = pipeline.run(UploadedArchive::new(bytes, "dev")).await.unwrap();
        assert_eq!(first.report, second.report);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_enforced_integrity_adds_report_entry() {
        let mut config = offline_config();
        config.integrity.enforce = true;
        config
            .integrity
            .expected_hashes
            .insert("proj/README.md".into(), "00".repeat(32));
        let pipeline = Pipeline::validate_only(config);
        let outcome = pipeline
            .run(UploadedArchive::new(clean_project(), "dev"))
            .await
            .unwrap();
        assert_eq!(outcome.integrity.len(), 1);
        assert!(outcome.report.errors()[0].starts_with("file hash mismatch for proj/README.md"));
        assert_eq!(outcome.decision.unwrap().branch, "dev");
    }

    #[tokio::test]
    async fn test_empty_upload_is_error() {
        let pipeline = Pipeline::validate_only(offline_config());
        let err = pipeline
            .run(UploadedArchive::new(Vec::new(), "dev"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Structural(StructuralError::EmptyArchive)));
    }
}
