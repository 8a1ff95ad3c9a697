//! Known-vulnerable dependency lookup over the project's build manifests.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{markup, version, QualityGate};
use crate::archive::relative_display;
use crate::config::ScannerConfig;
use crate::models::GateOutcome;
use crate::validate::list_files;

const MANIFESTS: &[&str] = &["pom.xml", "package.json", "requirements.txt"];

/// A dependency declared in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// `groupId:artifactId` for Maven, the package name otherwise.
    pub name: String,
    pub version: Option<String>,
}

impl Dependency {
    fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version: version.filter(|v| !v.trim().is_empty()),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One flagged dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerableDependency {
    /// Manifest path relative to the project root.
    pub manifest: String,
    pub name: String,
    pub version: String,
    /// Highest affected version, for ceiling-table hits.
    pub vulnerable_up_to: Option<String>,
    pub reason: String,
}

/// Everything the dependency gate found, in manifest walk order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    pub manifests: Vec<String>,
    pub vulnerable: Vec<VulnerableDependency>,
    /// Manifests that could not be read or parsed.
    pub errors: Vec<String>,
}

impl DependencyReport {
    pub const JSON_FILE: &'static str = "dependency-report.json";
    pub const HTML_FILE: &'static str = "dependency-report.html";

    /// Gate outcome for this report. Unreadable manifests fail the gate.
    pub fn outcome(&self) -> GateOutcome {
        let findings = self
            .vulnerable
            .iter()
            .map(|v| format!("{}: {}", v.manifest, v.reason))
            .chain(self.errors.iter().cloned())
            .collect();
        GateOutcome::from_findings(DependencyGate::NAME, findings)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_html(&self) -> String {
        let mut html = String::from(
            "<html><head><title>Dependency report</title></head><body>\n\
             <h2>Vulnerable dependencies</h2>\n\
             <table border=\"1\"><tr><th>Manifest</th><th>Dependency</th>\
             <th>Version</th><th>Vulnerable up to</th></tr>\n",
        );
        for v in &self.vulnerable {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape_html(&v.manifest),
                escape_html(&v.name),
                escape_html(&v.version),
                escape_html(v.vulnerable_up_to.as_deref().unwrap_or("-")),
            ));
        }
        html.push_str("</table></body></html>\n");
        html
    }

    /// Write the JSON and HTML renderings into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)?;
        let json = self.to_json().map_err(io::Error::other)?;
        fs::write(dir.join(Self::JSON_FILE), json)?;
        fs::write(dir.join(Self::HTML_FILE), self.to_html())?;
        info!(dir = %dir.display(), vulnerable = self.vulnerable.len(), "dependency report written");
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ---------------------------------------------------------------------------
// Manifest parsers
// ---------------------------------------------------------------------------

/// Dependencies from a Maven `pom.xml`. `${property}` versions are resolved
/// against the `<properties>` block.
pub fn parse_pom(xml: &str) -> Result<Vec<Dependency>, String> {
    if !xml.contains("<project") {
        return Err("missing <project> element".into());
    }
    let properties = markup::blocks(xml, "properties").into_iter().next();

    let mut deps = Vec::new();
    for block in markup::blocks(xml, "dependency") {
        let Some(artifact) = markup::tag_content(block, "artifactId") else {
            warn!("skipping pom dependency without artifactId");
            continue;
        };
        let name = match markup::tag_content(block, "groupId") {
            Some(group) => format!("{group}:{artifact}"),
            None => artifact,
        };
        let version = markup::tag_content(block, "version").and_then(|v| {
            match v.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
                Some(prop) => properties.and_then(|p| markup::tag_content(p, prop)),
                None => Some(v),
            }
        });
        deps.push(Dependency::new(name, version));
    }
    Ok(deps)
}

/// Dependencies from an npm `package.json` (`dependencies` and
/// `devDependencies`).
pub fn parse_package_json(text: &str) -> Result<Vec<Dependency>, String> {
    let json: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let mut deps = Vec::new();
    for section in ["dependencies", "devDependencies"] {
        let Some(table) = json.get(section).and_then(|v| v.as_object()) else {
            continue;
        };
        for (name, value) in table {
            deps.push(Dependency::new(
                name.clone(),
                value.as_str().map(|s| version::normalize(s).to_string()),
            ));
        }
    }
    Ok(deps)
}

/// Dependencies from a pip `requirements.txt` (`name==version` lines).
pub fn parse_requirements(text: &str) -> Vec<Dependency> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty() && !line.starts_with('-'))
        .map(|line| match line.split_once("==") {
            Some((name, ver)) => Dependency::new(name.trim(), Some(ver.trim().to_string())),
            None => {
                let name = line
                    .split(|c: char| "<>=!~; [".contains(c))
                    .next()
                    .unwrap_or(line);
                Dependency::new(name.trim(), None)
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Flags dependencies listed in the configured vulnerability tables.
pub struct DependencyGate<'a> {
    config: &'a ScannerConfig,
}

impl<'a> DependencyGate<'a> {
    pub const NAME: &'static str = "dependencies";

    pub fn new(config: &'a ScannerConfig) -> Self {
        Self { config }
    }

    /// Why `dep` is vulnerable, or `None` if it is not.
    pub fn assess(&self, dep: &Dependency) -> Option<String> {
        self.classify(dep).map(|(why, _)| why)
    }

    /// The reason and, for ceiling hits, the ceiling.
    fn classify(&self, dep: &Dependency) -> Option<(String, Option<String>)> {
        let Some(ver) = dep.version.as_deref() else {
            warn!(dependency = %dep.name, "dependency has no version, skipping");
            return None;
        };

        for (key, ceiling) in &self.config.vulnerable_ceilings {
            if name_matches(key, &dep.name) && version::at_or_below(ver, ceiling) {
                let why = format!(
                    "{} {} is at or below known-vulnerable version {}",
                    dep.name, ver, ceiling
                );
                return Some((why, Some(ceiling.clone())));
            }
        }
        for (key, releases) in &self.config.vulnerable_releases {
            if name_matches(key, &dep.name)
                && releases.iter().any(|r| version::normalize(r) == version::normalize(ver))
            {
                return Some((format!("{} {} is a known-vulnerable release", dep.name, ver), None));
            }
        }
        None
    }

    fn scan_manifest(&self, path: &Path, rel: &str, report: &mut DependencyReport) {
        report.manifests.push(rel.to_string());
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                report.errors.push(format!("{rel}: could not read manifest ({e})"));
                return;
            }
        };
        let parsed = match path.file_name().and_then(|n| n.to_str()) {
            Some("pom.xml") => parse_pom(&text),
            Some("package.json") => parse_package_json(&text),
            _ => Ok(parse_requirements(&text)),
        };
        let deps = match parsed {
            Ok(d) => d,
            Err(e) => {
                warn!(manifest = %rel, error = %e, "unparseable manifest");
                report.errors.push(format!("{rel}: could not parse manifest ({e})"));
                return;
            }
        };
        debug!(manifest = %rel, count = deps.len(), "parsed dependencies");
        for dep in &deps {
            if let Some((reason, ceiling)) = self.classify(dep) {
                warn!(manifest = %rel, dependency = %dep.name, "vulnerable dependency");
                report.vulnerable.push(VulnerableDependency {
                    manifest: rel.to_string(),
                    name: dep.name.clone(),
                    version: dep.version.clone().unwrap_or_default(),
                    vulnerable_up_to: ceiling,
                    reason,
                });
            }
        }
    }

    /// Scan every manifest under `root`.
    pub fn report(&self, root: &Path) -> DependencyReport {
        let mut report = DependencyReport::default();
        for file in list_files(root) {
            let rel = relative_display(root, &file);
            if rel.split('/').any(|c| c == "node_modules") {
                continue;
            }
            let is_manifest = file
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| MANIFESTS.contains(&n));
            if is_manifest {
                self.scan_manifest(&file, &rel, &mut report);
            }
        }
        report
    }
}

impl QualityGate for DependencyGate<'_> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn check(&self, root: &Path) -> GateOutcome {
        self.report(root).outcome()
    }
}

/// A table key matches either the full dependency name or, for Maven
/// coordinates, just the artifact id.
fn name_matches(key: &str, name: &str) -> bool {
    key == name || name.rsplit(':').next() == Some(key)
}
