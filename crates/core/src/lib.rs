//! uploadgate core library.
//!
//! Takes an uploaded project archive through extraction, structural and
//! integrity checks, and quality gates; routes it to a branch and pushes
//! it; and resolves textual merge conflicts in local repositories.

pub mod archive;
pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod git;
pub mod integrator;
pub mod lock;
pub mod models;
pub mod pipeline;
pub mod router;
pub mod scan;
pub mod validate;

pub use config::AppConfig;
pub use conflict::{ConflictService, Strategy};
pub use db::Database;
pub use errors::CoreError;
pub use lock::RepoLocks;
pub use models::{PipelineOutcome, UploadedArchive, ValidationReport};
pub use pipeline::Pipeline;
