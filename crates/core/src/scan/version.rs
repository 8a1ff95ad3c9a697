//! Dotted-numeric version comparison.

use std::cmp::Ordering;

use tracing::warn;

/// Strip range operators and a leading `v` from a manifest version string
/// (`^1.2.3`, `~1.2`, `>=2.0`, `v3`).
pub fn normalize(version: &str) -> &str {
    version
        .trim()
        .trim_start_matches(['^', '~', '=', '>', '<', 'v', 'V', ' '])
}

/// Compare two dotted versions segment by segment.
///
/// Missing segments count as 0. A segment that is not a plain number also
/// counts as 0 and logs a warning, so `1.2.RELEASE` equals `1.2`.
pub fn compare(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split('.').collect();
    let right: Vec<&str> = b.split('.').collect();
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).map(|s| segment(s)).unwrap_or(0);
        let r = right.get(i).map(|s| segment(s)).unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// True when `version` is at or below `ceiling`.
pub fn at_or_below(version: &str, ceiling: &str) -> bool {
    compare(normalize(version), normalize(ceiling)) != Ordering::Greater
}

fn segment(s: &str) -> u64 {
    match s.trim().parse::<u64>() {
        Ok(n) => n,
        Err(_) => {
            warn!(segment = s, "non-numeric version segment treated as 0");
            0
        }
    }
}
