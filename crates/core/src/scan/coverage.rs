//! Test execution and coverage gating.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::markup;
use crate::archive::relative_display;
use crate::config::{CoverageFormat, TestGateConfig};
use crate::errors::QualityError;
use crate::models::GateOutcome;
use crate::validate::list_files;

/// Aggregate instruction coverage from a JaCoCo `index.html`: the first
/// `ctr2` cell of the `Total` row.
pub fn parse_jacoco_total(html: &str) -> Option<f64> {
    let (_, after_total) = html.split_once("Total</td>")?;
    let (_, after_cell) = after_total.split_once("class=\"ctr2\"")?;
    let cell = after_cell.split_once("</td>")?.0;
    let text = markup::strip_tags(&format!("<td {cell}"));
    parse_percentage(&text)
}

/// Root `line-rate` of a Cobertura report, as a percentage.
pub fn parse_cobertura_line_rate(xml: &str) -> Option<f64> {
    let rate = markup::attribute(xml, "coverage", "line-rate")?;
    rate.trim().parse::<f64>().ok().map(|r| r * 100.0)
}

fn parse_percentage(text: &str) -> Option<f64> {
    text.replace('%', "")
        .replace(',', ".")
        .trim()
        .parse::<f64>()
        .ok()
}

/// Runs the project's test suite and checks the resulting coverage report.
pub struct TestGate<'a> {
    config: &'a TestGateConfig,
}

impl<'a> TestGate<'a> {
    pub const NAME: &'static str = "tests";

    pub fn new(config: &'a TestGateConfig) -> Self {
        Self { config }
    }

    /// Shallowest file under `root` named like the configured manifest.
    pub fn find_manifest(&self, root: &Path) -> Option<PathBuf> {
        list_files(root)
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy() == self.config.manifest)
            })
            .min_by_key(|p| p.components().count())
    }

    /// Run the gate. Only a failure to launch the test command is an error;
    /// everything else is a finding.
    #[instrument(skip(self, root), fields(manifest = %self.config.manifest))]
    pub async fn run(&self, root: &Path) -> Result<GateOutcome, QualityError> {
        let fail = |finding: String| -> Result<GateOutcome, QualityError> {
            Ok(GateOutcome::from_findings(Self::NAME, vec![finding]))
        };

        let Some(manifest) = self.find_manifest(root) else {
            warn!("no build manifest found, test gate fails");
            return fail(format!("no {} found under project root", self.config.manifest));
        };
        let workdir = manifest.parent().unwrap_or(root).to_path_buf();

        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or(QualityError::NoCommand)?;
        let command_line = self.config.command.join(" ");
        info!(command = %command_line, dir = %relative_display(root, &workdir), "running tests");

        let child = Command::new(program)
            .args(args)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| QualityError::Launch {
                command: command_line.clone(),
                source,
            })?;

        let limit = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return fail(format!("test command could not be awaited: {e}")),
            Err(_) => {
                warn!(timeout_secs = self.config.timeout_secs, "test run timed out, killed");
                return fail(format!(
                    "test run exceeded {}s timeout",
                    self.config.timeout_secs
                ));
            }
        };

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(target: "uploadgate::tests::stdout", "{line}");
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            debug!(target: "uploadgate::tests::stderr", "{line}");
        }

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into());
            warn!(exit = %code, "tests failed");
            return fail(format!("test command exited with status {code}"));
        }

        let report_path = workdir.join(&self.config.coverage_report);
        let report_rel = relative_display(root, &report_path);
        let Ok(report) = std::fs::read_to_string(&report_path) else {
            return fail(format!("coverage report not found at {report_rel}"));
        };
        let parsed = match self.config.coverage_format {
            CoverageFormat::Jacoco => parse_jacoco_total(&report),
            CoverageFormat::Cobertura => parse_cobertura_line_rate(&report),
        };
        let Some(coverage) = parsed else {
            return fail(format!("could not parse coverage report {report_rel}"));
        };

        if coverage < self.config.coverage_threshold {
            warn!(coverage, threshold = self.config.coverage_threshold, "coverage below threshold");
            return fail(format!(
                "coverage {:.1}% is below threshold {:.1}%",
                coverage, self.config.coverage_threshold
            ));
        }

        info!(coverage, "tests passed");
        Ok(GateOutcome::from_findings(Self::NAME, Vec::new()))
    }
}
