//! HTML-to-text extraction, reference signals, and article rendering.
//!
//! Fetched evidence pages are converted to Markdown with the `htmd` crate and
//! run through a cleanup pipeline so the text handed to the generator is free
//! of page chrome. The same crate renders the finished article.

mod cleanup;
mod render;

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use tracing::{debug, instrument};

use rarecite_shared::{RareCiteError, Result};

pub use render::{REFERENCES_HEADING, article_headings, render_article};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of extracting readable text from an HTML page.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    /// Cleaned Markdown body (no links, images or leftover tags).
    pub text: String,
    /// `<title>` or first H1, if any.
    pub title: Option<String>,
    /// Word count of the body.
    pub word_count: usize,
}

/// Reference signals found in a document's text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSignals {
    /// Distinct bracketed numerals like `[12]`.
    pub bracketed: usize,
    /// Distinct DOIs.
    pub dois: usize,
    /// Distinct PubMed identifiers.
    pub pmids: usize,
    /// Numbered or bulleted items under a references heading.
    pub list_items: usize,
    /// Whether a "References" / "Bibliography" / "Sources" heading exists.
    pub has_references_heading: bool,
}

impl ReferenceSignals {
    /// Best estimate of how many references the text cites.
    pub fn count(&self) -> u32 {
        let estimate = self
            .bracketed
            .max(self.list_items)
            .max(self.dois + self.pmids);
        u32::try_from(estimate).unwrap_or(u32::MAX)
    }

    /// A scholarly identifier plus a references heading.
    pub fn is_scholarly(&self) -> bool {
        self.has_references_heading && (self.dois > 0 || self.pmids > 0)
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract clean Markdown text from an HTML page.
///
/// 1. Picks the main content container (falls back to `<body>`)
/// 2. Converts HTML → Markdown via `htmd`, skipping page chrome
/// 3. Runs the cleanup pipeline
#[instrument(skip(html), fields(url = %source_url))]
pub fn extract_text(html: &str, source_url: &str) -> Result<ExtractedText> {
    let doc = Html::parse_document(html);
    let page_title = extract_html_title(&doc);
    let content_html = extract_content_html(&doc).unwrap_or_else(|| html.to_string());

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "header", "footer", "aside", "form", "iframe", "noscript",
            "svg", "button",
        ])
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| RareCiteError::parse(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    let text = cleanup::run_pipeline(&raw_markdown);
    let title = page_title.or_else(|| extract_title_from_markdown(&text));
    let word_count = count_words(&text);

    debug!(word_count, final_len = text.len(), "extraction complete");

    Ok(ExtractedText {
        text,
        title,
        word_count,
    })
}

/// Count words, ignoring Markdown punctuation tokens (`#`, `|`, `---`).
pub fn count_words(text: &str) -> usize {
    text.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

/// Scan text for reference signals.
pub fn reference_signals(text: &str) -> ReferenceSignals {
    static BRACKET_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[(\d{1,3})\]").expect("valid regex"));
    static DOI_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(10\.\d{4,9}/[^\s\]\)>,;]+)").expect("valid regex")
    });
    static PMID_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\bPMID:?\s*(\d{5,9})\b").expect("valid regex"));

    let distinct = |re: &Regex| {
        re.captures_iter(text)
            .map(|c| c[1].trim_end_matches('.').to_lowercase())
            .collect::<HashSet<_>>()
            .len()
    };

    let (has_references_heading, list_items) = reference_list_items(text);

    ReferenceSignals {
        bracketed: distinct(&BRACKET_RE),
        dois: distinct(&DOI_RE),
        pmids: distinct(&PMID_RE),
        list_items,
        has_references_heading,
    }
}

/// Estimated number of references cited by `text`.
pub fn count_references(text: &str) -> u32 {
    reference_signals(text).count()
}

/// Find a references heading and count list items beneath it.
fn reference_list_items(text: &str) -> (bool, usize) {
    static REF_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^(?:#{1,6}\s*)?(?:\*\*)?(references|bibliography|sources|citations|literature cited)(?:\*\*)?:?\s*$")
            .expect("valid regex")
    });
    static HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^#{1,6}\s+\S").expect("valid regex"));
    static ITEM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(?:\d{1,3}[.)]|[-*+])\s+\S").expect("valid regex"));

    let mut found = false;
    let mut in_refs = false;
    let mut items = 0;

    for line in text.lines() {
        let line = line.trim();
        if REF_HEADING_RE.is_match(line) {
            found = true;
            in_refs = true;
            continue;
        }
        if in_refs && HEADING_RE.is_match(line) {
            in_refs = false;
        }
        if in_refs && ITEM_RE.is_match(line) {
            items += 1;
        }
    }

    (found, items)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the main content HTML, preferring semantic article containers.
fn extract_content_html(doc: &Html) -> Option<String> {
    let selectors = [
        "article",
        "main",
        "[role=\"main\"]",
        "#main-content",
        ".article-body",
        ".content",
        "body",
    ];

    for sel_str in &selectors {
        if let Ok(selector) = scraper::Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return Some(el.inner_html());
            }
        }
    }

    None
}

/// Text of the `<title>` element, if present and non-empty.
fn extract_html_title(doc: &Html) -> Option<String> {
    let selector = scraper::Selector::parse("title").ok()?;
    let title = doc
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    (!title.is_empty()).then_some(title)
}

/// Extract title from the first H1 in the Markdown text.
fn extract_title_from_markdown(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
