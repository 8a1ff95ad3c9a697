//! Per-language denylist of risky constructs, matched on trimmed lines.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::warn;

use super::QualityGate;
use crate::archive::relative_display;
use crate::config::ScannerConfig;
use crate::models::GateOutcome;
use crate::validate::list_files;

const JAVA: &[&str] = &[
    "Runtime.getRuntime().exec",
    "java.lang.reflect",
    "setAccessible(true)",
    "Thread.sleep(",
    "System.out.println",
    "eval(",
];

const JAVASCRIPT: &[&str] = &[
    "eval(",
    "document.write(",
    "innerHTML =",
    "Function(",
    "setTimeout(",
    "setInterval(",
];

const PYTHON: &[&str] = &[
    "eval(",
    "exec(",
    "os.system(",
    "pickle.loads(",
    "time.sleep(",
    "shell=True",
];

/// Built-in denylists keyed by extension.
pub fn default_anti_patterns() -> BTreeMap<String, Vec<String>> {
    let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut table = BTreeMap::new();
    table.insert(".java".to_string(), owned(JAVA));
    table.insert(".js".to_string(), owned(JAVASCRIPT));
    table.insert(".ts".to_string(), owned(JAVASCRIPT));
    table.insert(".py".to_string(), owned(PYTHON));
    table
}

pub struct StaticAnalysisGate {
    patterns: BTreeMap<String, Vec<String>>,
}

impl StaticAnalysisGate {
    /// Built-in table with any configured extensions replaced.
    pub fn new(config: &ScannerConfig) -> Self {
        let mut patterns = default_anti_patterns();
        for (ext, list) in &config.anti_patterns {
            let key = if ext.starts_with('.') {
                ext.to_ascii_lowercase()
            } else {
                format!(".{}", ext.to_ascii_lowercase())
            };
            patterns.insert(key, list.clone());
        }
        Self { patterns }
    }

    /// `line: pattern` hits for one file's text.
    pub fn scan_text(&self, ext: &str, text: &str) -> Vec<(usize, String)> {
        let Some(list) = self.patterns.get(ext) else {
            return Vec::new();
        };
        let mut hits = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            for pattern in list {
                if trimmed.contains(pattern.as_str()) {
                    hits.push((idx + 1, pattern.clone()));
                }
            }
        }
        hits
    }
}

impl QualityGate for StaticAnalysisGate {
    fn name(&self) -> &'static str {
        "static-analysis"
    }

    fn check(&self, root: &Path) -> GateOutcome {
        let mut findings = Vec::new();
        for file in list_files(root) {
            let Some(ext) = file
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
            else {
                continue;
            };
            if !self.patterns.contains_key(&ext) {
                continue;
            }
            let rel = relative_display(root, &file);
            let text = match fs::read(&file) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    findings.push(format!("{rel}: unreadable ({e})"));
                    continue;
                }
            };
            for (line, pattern) in self.scan_text(&ext, &text) {
                warn!(path = %rel, line, pattern = %pattern, "risky construct found");
                findings.push(format!("{rel}:{line}: {pattern}"));
            }
        }
        GateOutcome::from_findings(self.name(), findings)
    }
}
