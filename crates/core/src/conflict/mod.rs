//! Merge-conflict handling for local repositories.
//!
//! [`markers`] collapses conflict blocks in a single file; [`engine`] drives
//! detection, resolution, and abort over a whole repository.

pub mod engine;
pub mod markers;

pub use engine::{
    abort, detect, resolve, AbortOutcome, ConflictService, ConflictedFile, DetectOutcome,
    ResolveOutcome, AUTO_COMMIT_PREFIX,
};
pub use markers::{has_markers, resolve_bytes, resolve_text, Section, Strategy};
