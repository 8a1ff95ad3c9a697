//! Security and quality gates run over a validated project root.
//!
//! The file-based gates ([`DependencyGate`], [`StaticAnalysisGate`],
//! [`SecretsGate`]) implement [`QualityGate`] and run synchronously through
//! [`scan_files`]. The test and coverage gate spawns an external process and
//! lives in [`coverage`].

pub mod coverage;
pub mod dependency;
pub mod markup;
pub mod secrets;
pub mod static_analysis;
pub mod version;

use std::path::Path;

use tracing::{info, warn};

use crate::config::ScannerConfig;
use crate::models::GateOutcome;

pub use coverage::TestGate;
pub use dependency::{DependencyGate, DependencyReport};
pub use secrets::SecretsGate;
pub use static_analysis::StaticAnalysisGate;

/// A gate that inspects files under the project root and reports findings.
pub trait QualityGate {
    /// Stable gate name used in report messages.
    fn name(&self) -> &'static str;

    /// Inspect `root` and return every finding. Never aborts on a bad file;
    /// unreadable inputs become findings.
    fn check(&self, root: &Path) -> GateOutcome;
}

/// The file gates that run after the dependency gate, in order.
pub fn file_gates(config: &ScannerConfig) -> Vec<Box<dyn QualityGate + '_>> {
    vec![Box::new(StaticAnalysisGate::new(config)), Box::new(SecretsGate)]
}

/// Results of every synchronous gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileScan {
    /// `dependencies`, `static-analysis`, `secrets`.
    pub gates: Vec<GateOutcome>,
    pub dependencies: DependencyReport,
}

fn logged(outcome: GateOutcome) -> GateOutcome {
    if outcome.passed {
        info!(gate = %outcome.name, "quality gate passed");
    } else {
        warn!(
            gate = %outcome.name,
            findings = outcome.findings.len(),
            "quality gate failed"
        );
    }
    outcome
}

/// Run every synchronous gate against `root`, keeping the dependency report.
pub fn scan_files(root: &Path, config: &ScannerConfig) -> FileScan {
    let dependencies = DependencyGate::new(config).report(root);
    let mut gates = vec![logged(dependencies.outcome())];
    gates.extend(file_gates(config).iter().map(|gate| logged(gate.check(root))));
    FileScan {
        gates,
        dependencies,
    }
}
