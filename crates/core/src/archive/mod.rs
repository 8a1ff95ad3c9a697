//! Archive intake: size checks, safe extraction, and scratch directories.

pub mod extractor;
pub mod working_tree;

pub use extractor::{check_upload, extract, ExtractSummary};
pub use working_tree::{relative_display, WorkingTree};
