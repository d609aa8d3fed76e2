//! Bracketed citation marker parsing and rewriting.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// A single `[n]` marker.
static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid regex"));

/// Grouped markers such as `[1, 3]` or `[2-4]`.
static GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+(?:\s*[-,;]\s*\d+)+)\]").expect("valid regex")
});

/// Whitespace left in front of punctuation after a marker is removed.
static DANGLING_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+([.,;:!?)])").expect("valid regex"));

/// Widest range expanded from `[a-b]`.
const MAX_RANGE: u32 = 20;

/// Rewrite grouped markers into single markers: `[1, 3]` → `[1][3]`,
/// `[2-4]` → `[2][3][4]`.
pub fn normalize_markers(text: &str) -> String {
    GROUP_RE
        .replace_all(text, |caps: &Captures| {
            let mut out = String::new();
            for part in caps[1].split([',', ';']) {
                let part = part.trim();
                let numbers: Vec<u32> = part
                    .split('-')
                    .filter_map(|n| n.trim().parse().ok())
                    .collect();
                match numbers.as_slice() {
                    [n] => out.push_str(&format!("[{n}]")),
                    [a, b] if a <= b && b - a < MAX_RANGE => {
                        for n in *a..=*b {
                            out.push_str(&format!("[{n}]"));
                        }
                    }
                    _ => out.push_str(&format!("[{part}]")),
                }
            }
            out
        })
        .to_string()
}

/// Distinct markers in order of first appearance.
pub fn parse_markers(text: &str) -> Vec<u32> {
    let mut seen = HashSet::new();
    MARKER_RE
        .captures_iter(text)
        .filter_map(|c| c[1].parse::<u32>().ok())
        .filter(|n| seen.insert(*n))
        .collect()
}

/// Remove every marker for which `remove` returns true, tidying the space it
/// leaves before punctuation. Markers too large for `u32` are passed as 0.
pub fn strip_markers(text: &str, mut remove: impl FnMut(u32) -> bool) -> String {
    let mut removed_any = false;
    let stripped = MARKER_RE.replace_all(text, |caps: &Captures| {
        let n = caps[1].parse::<u32>().unwrap_or(0);
        if remove(n) {
            removed_any = true;
            String::new()
        } else {
            caps[0].to_string()
        }
    });

    if removed_any {
        DANGLING_SPACE_RE.replace_all(&stripped, "$1").to_string()
    } else {
        stripped.to_string()
    }
}

/// Keep at most `max` distinct in-range markers (the first ones used) and
/// strip later ones. Markers outside `1..=num_documents` are left in place
/// for the caller to handle.
///
/// Returns the rewritten text and the kept markers in first-use order.
pub fn enforce_citation_limit(text: &str, max: u32, num_documents: u32) -> (String, Vec<u32>) {
    let in_range = |n: u32| n >= 1 && n <= num_documents;
    let kept: Vec<u32> = parse_markers(text)
        .into_iter()
        .filter(|n| in_range(*n))
        .take(max as usize)
        .collect();

    let keep_set: HashSet<u32> = kept.iter().copied().collect();
    let text = strip_markers(text, |n| in_range(n) && !keep_set.contains(&n));
    (text, kept)
}
