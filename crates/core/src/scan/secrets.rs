//! Credential and token detection in text-like project files.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::{debug, warn};

use super::QualityGate;
use crate::archive::relative_display;
use crate::models::GateOutcome;
use crate::validate::{has_extension, list_files};

const SCANNED_EXTENSIONS: &[&str] = &[
    ".java", ".py", ".js", ".ts", ".env", ".yml", ".yaml", ".json", ".xml", ".properties",
    ".toml", ".ini", ".cfg",
];

const PATTERNS: &[&str] = &[
    // generic key assignments
    r#"(?i)(aws_access_key_id|aws_secret_access_key|api_key|secret_key|access_key|private_key|client_secret)[\s:=]+["']?[A-Za-z0-9+/=_-]{16,}["']?"#,
    // AWS
    r"(?i)AKIA[0-9A-Z]{16}",
    r#"(?i)aws_secret_access_key[\s:=]+["']?[A-Za-z0-9/+=]{40}["']?"#,
    // Google
    r"(?i)AIza[0-9A-Za-z_-]{35}",
    r"(?i)ya29\.[0-9A-Za-z_-]+",
    // JWT and Azure storage
    r"(?i)eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+",
    r"(?i)DefaultEndpointsProtocol=https;AccountName=[a-z0-9]+;AccountKey=[A-Za-z0-9+/=]+",
    r#"(?i)(facebook|twitter|slack|github)_token[\s:=]+["']?[A-Za-z0-9_-]{16,}["']?"#,
    r"(?i)eyJ[a-zA-Z0-9]{30,}\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+",
    // database URLs with embedded credentials
    r"(?i)mongodb(\+srv)?://[a-zA-Z0-9_-]+:[^@\s/]+@",
    r"(?i)jdbc:mysql://[a-zA-Z0-9_-]+:[^@\s/]+@",
    r"(?i)(jdbc:)?postgres(ql)?://[a-zA-Z0-9_-]+:[^@\s/]+@",
    // Stripe
    r"(?i)sk_live_[0-9a-zA-Z]{24}",
    r"(?i)pk_live_[0-9a-zA-Z]{24}",
    // GitHub / GitLab
    r"(?i)ghp_[A-Za-z0-9]{36}",
    r"(?i)glpat-[A-Za-z0-9_-]{20,}",
    // PayPal / Twilio
    r#"(?i)access_token[\s:=]+["']?A21AA[A-Za-z0-9_-]{60,}["']?"#,
    r#"(?i)twilio_account_sid[\s:=]+["']?AC[a-zA-Z0-9]{32}["']?"#,
    r#"(?i)twilio_auth_token[\s:=]+["']?[a-zA-Z0-9]{32}["']?"#,
];

fn patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect())
}

/// True if `line` matches any secret pattern.
pub fn line_has_secret(line: &str) -> bool {
    patterns().iter().any(|re| re.is_match(line))
}

fn is_scanned(path: &Path) -> bool {
    let exts: Vec<String> = SCANNED_EXTENSIONS.iter().map(|s| s.to_string()).collect();
    let is_dotenv = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n == ".env" || n.starts_with(".env."));
    is_dotenv || has_extension(path, &exts)
}

/// Fails any text-like file containing something shaped like a credential.
pub struct SecretsGate;

impl QualityGate for SecretsGate {
    fn name(&self) -> &'static str {
        "secrets"
    }

    fn check(&self, root: &Path) -> GateOutcome {
        let mut findings = Vec::new();
        for file in list_files(root).into_iter().filter(|f| is_scanned(f)) {
            let rel = relative_display(root, &file);
            debug!(path = %rel, "scanning for sensitive data");
            let text = match fs::read(&file) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!(path = %rel, error = %e, "could not read file, failing closed");
                    findings.push(format!("{rel}: unreadable ({e})"));
                    continue;
                }
            };
            if let Some((idx, _)) = text.lines().enumerate().find(|(_, l)| line_has_secret(l)) {
                let line = idx + 1;
                warn!(path = %rel, line, "potential sensitive data found");
                findings.push(format!("{rel}:{line}: potential sensitive data"));
            }
        }
        GateOutcome::from_findings(self.name(), findings)
    }
}
