//! Post-conversion cleanup pipeline for extracted evidence text.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! The output is meant for prompts, so links, images and escapes are removed.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = strip_images(&result);
    result = unwrap_links(&result);
    result = strip_leftover_html(&result);
    result = drop_escapes(&result);
    result = normalize_headings(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Images
// ---------------------------------------------------------------------------

/// Remove `![alt](src)` images entirely.
fn strip_images(md: &str) -> String {
    static IMG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    IMG_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Links
// ---------------------------------------------------------------------------

/// Replace `[text](href)` with `text`.
fn unwrap_links(md: &str) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

    LINK_RE.replace_all(md, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Leftover HTML
// ---------------------------------------------------------------------------

/// Remove stray HTML tags that survived the conversion, keeping inner text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^<>]*)?/?>").expect("valid regex")
    });

    HTML_TAG_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Markdown escapes
// ---------------------------------------------------------------------------

/// Drop backslash escapes so `\[1\]` reads as `[1]`.
fn drop_escapes(md: &str) -> String {
    static ESCAPE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\\([\[\]()*_#.+!`>|-])").expect("valid regex"));

    ESCAPE_RE.replace_all(md, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 5: Headings
// ---------------------------------------------------------------------------

/// Keep at most one H1; demote the rest to H2. Drop empty headings.
fn normalize_headings(md: &str) -> String {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,6})\s*(.*)$").expect("valid regex"));

    let mut h1_count = 0;
    let mut lines: Vec<String> = Vec::new();

    for line in md.lines() {
        let Some(caps) = H_RE.captures(line) else {
            lines.push(line.to_string());
            continue;
        };
        let hashes = &caps[1];
        let text = caps[2].trim();

        if text.is_empty() {
            continue;
        }
        if hashes == "#" {
            h1_count += 1;
            if h1_count > 1 {
                lines.push(format!("## {text}"));
                continue;
            }
        }
        lines.push(format!("{hashes} {text}"));
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 6: Whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 7: Blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into a single blank line.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE
        .replace_all(md.trim_start_matches('\n'), "\n\n")
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 8: Trailing newline
// ---------------------------------------------------------------------------

/// Ensure the text ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
