//! Conflict-marker walking and line selection.

use std::fmt;

use tracing::warn;

/// How each conflict block is collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Keep the HEAD side.
    KeepMine,
    /// Keep the incoming side.
    KeepTheirs,
    /// Keep both sides, ours first.
    Merge,
}

impl Strategy {
    /// `keep-mine` and `keep-theirs` select a side; anything else merges.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "keep-mine" => Self::KeepMine,
            "keep-theirs" => Self::KeepTheirs,
            "merge" => Self::Merge,
            other => {
                warn!(strategy = other, "unrecognized strategy, keeping both sides");
                Self::Merge
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepMine => "keep-mine",
            Self::KeepTheirs => "keep-theirs",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the walker currently is relative to a conflict block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Outside,
    Ours,
    /// diff3 `|||||||` common-ancestor section.
    Base,
    Theirs,
}

impl Section {
    /// The section after `line`, or `None` if `line` is not a marker here.
    ///
    /// Separator and closing markers only count inside a block, so a
    /// Markdown `=======` underline outside any conflict is plain content.
    pub fn transition(self, line: &[u8]) -> Option<Section> {
        if line.starts_with(b"<<<<<<<") {
            return Some(Section::Ours);
        }
        match self {
            Section::Ours if line.starts_with(b"|||||||") => Some(Section::Base),
            Section::Ours | Section::Base if line.starts_with(b"=======") => Some(Section::Theirs),
            Section::Theirs if line.starts_with(b">>>>>>>") => Some(Section::Outside),
            _ => None,
        }
    }

    fn keeps(self, strategy: Strategy) -> bool {
        match self {
            Section::Outside => true,
            Section::Base => false,
            Section::Ours => matches!(strategy, Strategy::KeepMine | Strategy::Merge),
            Section::Theirs => matches!(strategy, Strategy::KeepTheirs | Strategy::Merge),
        }
    }
}

/// Collapse every conflict block in `bytes` according to `strategy`.
///
/// Lines are split on `\n` only and copied byte for byte, so content that
/// is not UTF-8 and any line terminators pass through unchanged.
pub fn resolve_bytes(bytes: &[u8], strategy: Strategy) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut section = Section::Outside;
    for line in bytes.split_inclusive(|b| *b == b'\n') {
        if let Some(next) = section.transition(line) {
            section = next;
            continue;
        }
        if section.keeps(strategy) {
            out.extend_from_slice(line);
        }
    }
    out
}

/// [`resolve_bytes`] for text. Whole lines are dropped, so the output is
/// valid UTF-8 whenever the input is.
pub fn resolve_text(text: &str, strategy: Strategy) -> String {
    String::from_utf8_lossy(&resolve_bytes(text.as_bytes(), strategy)).into_owned()
}

/// True if `bytes` still contain an opening conflict marker.
pub fn has_markers(bytes: &[u8]) -> bool {
    bytes
        .split(|b| *b == b'\n')
        .any(|l| l.starts_with(b"<<<<<<<"))
}
