//! Error types for the uploadgate core library.
//!
//! Each pipeline stage has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Quality(#[from] QualityError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// A blocking stage panicked or was cancelled.
    #[error("pipeline task failed: {0}")]
    TaskFailed(String),
}

// ---------------------------------------------------------------------------
// Archive / layout errors
// ---------------------------------------------------------------------------

/// Errors raised while accepting or unpacking an uploaded archive.
#[derive(Debug, Error)]
pub enum StructuralError {
    /// The upload carried no bytes.
    #[error("uploaded archive is empty")]
    EmptyArchive,

    /// The upload exceeds the configured size ceiling.
    #[error("uploaded archive is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    /// The bytes are not a readable zip container.
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// An entry name would escape the extraction directory.
    #[error("invalid entry name: {0}")]
    UnsafeEntry(String),

    /// Generic I/O wrapper.
    #[error("archive I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for StructuralError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => Self::IoError(io),
            other => Self::InvalidArchive(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Integrity errors
// ---------------------------------------------------------------------------

/// Advisory integrity findings. These are collected, not propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    /// A file's SHA-256 does not match the expected value.
    #[error("file hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// A file could not be read for hashing.
    #[error("failed to hash {path}: {detail}")]
    Unreadable { path: String, detail: String },
}

// ---------------------------------------------------------------------------
// Quality gate errors
// ---------------------------------------------------------------------------

/// Infrastructure failures inside a quality gate. A gate that merely finds
/// problems reports them in its outcome; these errors abort the run.
#[derive(Debug, Error)]
pub enum QualityError {
    /// The external test runner could not be started.
    #[error("failed to launch test runner '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The configured test command is empty.
    #[error("test command is not configured")]
    NoCommand,
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// Username or password/token for the remote is not configured.
    #[error("git credentials are not configured (set {username_env} and {password_env})")]
    CredentialsMissing {
        username_env: String,
        password_env: String,
    },

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Push was rejected by the remote.
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// Pull could not fast-forward.
    #[error("cannot fast-forward branch '{0}'")]
    NotFastForward(String),

    /// A blocking git task panicked or was cancelled.
    #[error("git task failed: {0}")]
    TaskFailed(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from the conflict detection / resolution subsystem.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Reading or writing a conflicted file failed.
    #[error("failed to {action} '{path}': {source}")]
    FileIo {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Underlying Git error during resolution.
    #[error("conflict git error: {0}")]
    GitError(#[from] GitError),

    /// Database error when persisting resolution records.
    #[error("conflict database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    /// The post-resolution test run could not be started.
    #[error("post-merge tests could not run: {0}")]
    Tests(#[from] QualityError),

    /// A blocking conflict task panicked or was cancelled.
    #[error("conflict task failed: {0}")]
    TaskFailed(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
