//! Git operations for uploadgate.

pub mod client;
pub mod vcs;

pub use client::GitClient;
pub use vcs::{Credentials, Identity, Vcs};
