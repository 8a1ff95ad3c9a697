//! TOML-based configuration system for uploadgate.
//!
//! Sensitive values (Git username and password/token) are stored as `_env`
//! fields that reference environment variable names. The actual secrets are
//! resolved at runtime via [`AppConfig::resolve_env_vars`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Managed remote repository.
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Archive and project layout rules.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Known-good content hashes.
    #[serde(default)]
    pub integrity: IntegrityConfig,

    /// Security and quality gates.
    #[serde(default)]
    pub scanners: ScannerConfig,

    /// Audit database location.
    #[serde(default)]
    pub database: DatabaseConfig,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Remote repository and commit identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Remote URL of the managed repository.
    #[serde(default)]
    pub remote_url: String,

    /// Name of the remote to push to.
    #[serde(default = "default_remote_name")]
    pub remote_name: String,

    /// Environment variable holding the Git username.
    #[serde(default = "default_username_env")]
    pub username_env: String,

    /// Environment variable holding the Git password or access token.
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Author/committer name for integration commits.
    #[serde(default = "default_author_name")]
    pub author_name: String,

    /// Author/committer email for integration commits.
    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Resolved username (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub username: Option<String>,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_remote_name() -> String {
    "origin".into()
}
fn default_username_env() -> String {
    "GIT_USERNAME".into()
}
fn default_password_env() -> String {
    "GIT_PASSWORD".into()
}
fn default_author_name() -> String {
    "uploadgate".into()
}
fn default_author_email() -> String {
    "uploadgate@localhost".into()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            remote_name: default_remote_name(),
            username_env: default_username_env(),
            password_env: default_password_env(),
            author_name: default_author_name(),
            author_email: default_author_email(),
            username: None,
            password: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Archive acceptance and project layout rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Largest accepted upload in bytes (default 10 MiB).
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,

    /// File names whose parent directory is taken as the project root.
    #[serde(default = "default_root_markers")]
    pub root_markers: Vec<String>,

    /// Entries required under the project root. A trailing `/` means directory.
    #[serde(default = "default_required")]
    pub required: Vec<String>,

    /// Directory (relative to root) that must contain source files.
    #[serde(default = "default_source_dir")]
    pub source_dir: String,

    /// Extensions accepted as source files.
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,

    /// Extensions accepted as project metadata.
    #[serde(default = "default_metadata_extensions")]
    pub metadata_extensions: Vec<String>,
}

fn default_max_archive_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_root_markers() -> Vec<String> {
    vec!["README.md".into(), "requirements.txt".into()]
}
fn default_required() -> Vec<String> {
    vec!["README.md".into(), "src/".into()]
}
fn default_source_dir() -> String {
    "src".into()
}
fn default_source_extensions() -> Vec<String> {
    [".py", ".js", ".ts", ".java", ".kt", ".html", ".css", ".rs"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_metadata_extensions() -> Vec<String> {
    [".json", ".xml", ".toml", ".yml", ".yaml"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_archive_bytes: default_max_archive_bytes(),
            root_markers: default_root_markers(),
            required: default_required(),
            source_dir: default_source_dir(),
            source_extensions: default_source_extensions(),
            metadata_extensions: default_metadata_extensions(),
        }
    }
}

// ---------------------------------------------------------------------------
// Integrity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityConfig {
    /// Expected lowercase-hex SHA-256 by archive-relative path.
    #[serde(default)]
    pub expected_hashes: BTreeMap<String, String>,

    /// When true, mismatches are reported as validation errors.
    #[serde(default)]
    pub enforce: bool,
}

// ---------------------------------------------------------------------------
// Scanners
// ---------------------------------------------------------------------------

/// Configuration injected into the security and quality gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Dependency name -> highest known-vulnerable version (inclusive).
    #[serde(default = "default_vulnerable_ceilings")]
    pub vulnerable_ceilings: BTreeMap<String, String>,

    /// Dependency name -> exact known-vulnerable releases.
    #[serde(default = "default_vulnerable_releases")]
    pub vulnerable_releases: BTreeMap<String, Vec<String>>,

    /// Extension (with dot) -> risky construct substrings. Replaces the
    /// built-in table for the listed extensions only.
    #[serde(default)]
    pub anti_patterns: BTreeMap<String, Vec<String>>,

    /// Test runner and coverage gate.
    #[serde(default)]
    pub tests: TestGateConfig,
}

fn default_vulnerable_ceilings() -> BTreeMap<String, String> {
    [
        ("org.springframework:spring-core", "5.3.10"),
        ("com.fasterxml.jackson.core:jackson-databind", "2.12.3"),
        ("org.apache.commons:commons-lang3", "3.10"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_vulnerable_releases() -> BTreeMap<String, Vec<String>> {
    let mut map = BTreeMap::new();
    map.insert(
        "org.apache.logging.log4j:log4j-core".to_string(),
        vec!["2.14.0".to_string(), "2.15.0".to_string()],
    );
    map.insert("express".to_string(), vec!["4.17.1".to_string()]);
    map
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            vulnerable_ceilings: default_vulnerable_ceilings(),
            vulnerable_releases: default_vulnerable_releases(),
            anti_patterns: BTreeMap::new(),
            tests: TestGateConfig::default(),
        }
    }
}

/// Coverage report formats the test gate understands.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoverageFormat {
    /// JaCoCo `index.html` summary table.
    #[default]
    Jacoco,
    /// Cobertura XML with a root `line-rate` attribute.
    Cobertura,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestGateConfig {
    /// Run the test gate at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Build manifest that marks the directory to run tests in.
    #[serde(default = "default_test_manifest")]
    pub manifest: String,

    /// Program and arguments.
    #[serde(default = "default_test_command")]
    pub command: Vec<String>,

    /// Coverage report path relative to the manifest directory.
    #[serde(default = "default_coverage_report")]
    pub coverage_report: PathBuf,

    #[serde(default)]
    pub coverage_format: CoverageFormat,

    /// Minimum aggregate coverage percentage.
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,

    /// Seconds before the test process is killed.
    #[serde(default = "default_test_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_test_manifest() -> String {
    "pom.xml".into()
}
fn default_test_command() -> Vec<String> {
    ["mvn", "clean", "test", "jacoco:report"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_coverage_report() -> PathBuf {
    PathBuf::from("target/site/jacoco/index.html")
}
fn default_coverage_threshold() -> f64 {
    80.0
}
fn default_test_timeout() -> u64 {
    600
}

impl Default for TestGateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            manifest: default_test_manifest(),
            command: default_test_command(),
            coverage_report: default_coverage_report(),
            coverage_format: CoverageFormat::default(),
            coverage_threshold: default_coverage_threshold(),
            timeout_secs: default_test_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding conflict resolution records.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("uploadgate.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve the credential `*_env` fields from environment variables.
    ///
    /// Missing variables only log a warning here; the first repository
    /// operation fails with `GitError::CredentialsMissing` instead.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        self.repository.username =
            resolve_optional_env(&self.repository.username_env, "repository.username_env");
        self.repository.password =
            resolve_optional_env(&self.repository.password_env, "repository.password_env");

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.remote_url.is_empty() {
            return Err(invalid("repository.remote_url", "remote URL must not be empty"));
        }
        if self.validation.root_markers.is_empty() {
            return Err(invalid(
                "validation.root_markers",
                "at least one root marker is required",
            ));
        }
        if self.validation.max_archive_bytes == 0 {
            return Err(invalid("validation.max_archive_bytes", "must be > 0"));
        }
        let tests = &self.scanners.tests;
        if !(0.0..=100.0).contains(&tests.coverage_threshold) {
            return Err(invalid(
                "scanners.tests.coverage_threshold",
                "must be between 0 and 100",
            ));
        }
        if tests.enabled && tests.command.is_empty() {
            return Err(invalid("scanners.tests.command", "test command must not be empty"));
        }
        if tests.timeout_secs == 0 {
            return Err(invalid("scanners.tests.timeout_secs", "timeout must be > 0"));
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[logging]
level = "debug"

[repository]
remote_url = "https://git.example.com/acme/app.git"
username_env = "UG_TEST_USER"
password_env = "UG_TEST_PASS"
author_name = "Gate Bot"

[validation]
max_archive_bytes = 2048
root_markers = ["README.md"]
required = ["README.md", "src/", "pom.xml"]

[integrity]
enforce = true

[integrity.expected_hashes]
"proj/README.md" = "abc123"

[scanners.vulnerable_ceilings]
"lodash" = "4.17.20"

[scanners.anti_patterns]
".go" = ["os/exec"]

[scanners.tests]
manifest = "package.json"
command = ["npm", "test"]
coverage_report = "coverage/cobertura-coverage.xml"
coverage_format = "cobertura"
coverage_threshold = 75.5
timeout_secs = 30

[database]
path = "/tmp/uploadgate-test.db"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.repository.remote_name, "origin");
        assert_eq!(config.repository.author_name, "Gate Bot");
        assert_eq!(config.validation.max_archive_bytes, 2048);
        assert_eq!(config.validation.required.len(), 3);
        assert!(config.integrity.enforce);
        assert_eq!(
            config.integrity.expected_hashes.get("proj/README.md").map(String::as_str),
            Some("abc123")
        );
        assert_eq!(config.scanners.vulnerable_ceilings.len(), 1);
        assert_eq!(config.scanners.tests.coverage_format, CoverageFormat::Cobertura);
        assert_eq!(config.scanners.tests.timeout_secs, 30);
        assert_eq!(config.database.path, PathBuf::from("/tmp/uploadgate-test.db"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploadgate.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.scanners.tests.command, vec!["npm", "test"]);
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/uploadgate.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_empty_remote() {
        let config = AppConfig::default();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "repository.remote_url"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.scanners.tests.coverage_threshold = 120.0;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. })
                if field == "scanners.tests.coverage_threshold"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("UG_TEST_USER", "deploy");
        std::env::set_var("UG_TEST_PASS", "glpat-secret");

        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.resolve_env_vars().unwrap();

        assert_eq!(config.repository.username.as_deref(), Some("deploy"));
        assert_eq!(config.repository.password.as_deref(), Some("glpat-secret"));

        std::env::remove_var("UG_TEST_USER");
        std::env::remove_var("UG_TEST_PASS");
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.repository.username_env, "GIT_USERNAME");
        assert_eq!(config.repository.password_env, "GIT_PASSWORD");
        assert_eq!(config.validation.max_archive_bytes, 10 * 1024 * 1024);
        assert_eq!(config.validation.source_dir, "src");
        assert!(!config.integrity.enforce);
        assert_eq!(config.scanners.tests.coverage_threshold, 80.0);
        assert_eq!(config.scanners.tests.timeout_secs, 600);
        assert!(config
            .scanners
            .vulnerable_ceilings
            .contains_key("org.springframework:spring-core"));
    }
}
