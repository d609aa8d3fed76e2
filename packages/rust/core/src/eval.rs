//! Offline scoring of a rendered article against a reference article.
//!
//! Lexical metrics only: ROUGE-1/2/L over lowercase word tokens, heading
//! overlap, and citation-marker bookkeeping for the generated article.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use rarecite_generation::{parse_markers, strip_markers};
use rarecite_markdown::{REFERENCES_HEADING, article_headings};

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("valid regex"));

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid regex"));

static REFERENCE_ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+)\.\s+\S").expect("valid regex"));

static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?](?:\s*\[\d+\])*(?:\s+|$)").expect("valid regex"));

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Precision, recall and F1 of one ROUGE variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RougeScore {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl RougeScore {
    fn from_overlap(overlap: usize, generated: usize, reference: usize) -> Self {
        if overlap == 0 || generated == 0 || reference == 0 {
            return Self::default();
        }
        let precision = overlap as f64 / generated as f64;
        let recall = overlap as f64 / reference as f64;
        Self {
            precision,
            recall,
            f1: 2.0 * precision * recall / (precision + recall),
        }
    }
}

/// How well the generated headings cover the reference headings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadingOverlap {
    pub reference: usize,
    pub generated: usize,
    /// Reference headings with a case-insensitive exact match.
    pub exact_matches: usize,
    /// Mean over reference headings of the best token Jaccard against any
    /// generated heading.
    pub soft_recall: f64,
}

/// Citation-marker statistics for the generated article.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitationStats {
    /// Every `[n]` occurrence in the body.
    pub markers: usize,
    /// Distinct marker numbers.
    pub unique_markers: usize,
    /// Numbered entries under the references heading.
    pub references: usize,
    /// Body sentences.
    pub sentences: usize,
    /// Body sentences carrying at least one marker.
    pub cited_sentences: usize,
    /// Marker numbers with no matching reference entry.
    pub unresolved: Vec<u32>,
    /// Reference entries no marker points at.
    pub uncited: Vec<u32>,
}

impl CitationStats {
    /// Share of distinct markers that resolve to a reference entry.
    pub fn precision(&self) -> f64 {
        if self.unique_markers == 0 {
            return 0.0;
        }
        (self.unique_markers - self.unresolved.len()) as f64 / self.unique_markers as f64
    }

    /// Share of body sentences that carry a marker.
    pub fn sentence_coverage(&self) -> f64 {
        if self.sentences == 0 {
            return 0.0;
        }
        self.cited_sentences as f64 / self.sentences as f64
    }
}

/// Full evaluation of one article.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleEvaluation {
    pub rouge_1: RougeScore,
    pub rouge_2: RougeScore,
    pub rouge_l: RougeScore,
    pub headings: HeadingOverlap,
    pub citations: CitationStats,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Score `generated` against `reference`. Both are Markdown; the reference
/// list and citation markers are excluded from the ROUGE text.
pub fn evaluate_article(generated: &str, reference: &str) -> ArticleEvaluation {
    let generated_tokens = tokenize(&strip_markers(body(generated), |_| true));
    let reference_tokens = tokenize(&strip_markers(body(reference), |_| true));

    ArticleEvaluation {
        rouge_1: rouge_n(&generated_tokens, &reference_tokens, 1),
        rouge_2: rouge_n(&generated_tokens, &reference_tokens, 2),
        rouge_l: rouge_l(&generated_tokens, &reference_tokens),
        headings: heading_overlap(&article_headings(generated), &article_headings(reference)),
        citations: citation_stats(generated),
    }
}

// ---------------------------------------------------------------------------
// ROUGE
// ---------------------------------------------------------------------------

/// Lowercase alphanumeric word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// ROUGE-N with clipped n-gram counts.
pub fn rouge_n(generated: &[String], reference: &[String], n: usize) -> RougeScore {
    if n == 0 {
        return RougeScore::default();
    }
    let generated_grams = ngram_counts(generated, n);
    let reference_grams = ngram_counts(reference, n);

    let overlap: usize = generated_grams
        .iter()
        .map(|(gram, count)| reference_grams.get(gram).map_or(0, |r| (*count).min(*r)))
        .sum();

    RougeScore::from_overlap(
        overlap,
        generated.len().saturating_sub(n - 1),
        reference.len().saturating_sub(n - 1),
    )
}

/// ROUGE-L from the longest common subsequence of the token streams.
pub fn rouge_l(generated: &[String], reference: &[String]) -> RougeScore {
    let lcs = lcs_len(generated, reference);
    RougeScore::from_overlap(lcs, generated.len(), reference.len())
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

// ---------------------------------------------------------------------------
// Headings
// ---------------------------------------------------------------------------

/// Compare heading lists; `References` is ignored on both sides.
pub fn heading_overlap(generated: &[String], reference: &[String]) -> HeadingOverlap {
    let keep = |h: &&String| !h.trim().eq_ignore_ascii_case(REFERENCES_HEADING);
    let generated: Vec<&String> = generated.iter().filter(keep).collect();
    let reference: Vec<&String> = reference.iter().filter(keep).collect();

    let generated_lower: HashSet<String> =
        generated.iter().map(|h| h.trim().to_lowercase()).collect();
    let exact_matches = reference
        .iter()
        .filter(|h| generated_lower.contains(&h.trim().to_lowercase()))
        .count();

    let generated_sets: Vec<HashSet<String>> = generated
        .iter()
        .map(|h| tokenize(h).into_iter().collect())
        .collect();
    let soft_recall = if reference.is_empty() {
        0.0
    } else {
        let total: f64 = reference
            .iter()
            .map(|h| {
                let tokens: HashSet<String> = tokenize(h).into_iter().collect();
                generated_sets
                    .iter()
                    .map(|g| jaccard(&tokens, g))
                    .fold(0.0, f64::max)
            })
            .sum();
        total / reference.len() as f64
    };

    HeadingOverlap {
        reference: reference.len(),
        generated: generated.len(),
        exact_matches,
        soft_recall,
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

// ---------------------------------------------------------------------------
// Citations
// ---------------------------------------------------------------------------

/// Marker and reference-list statistics for a rendered article.
pub fn citation_stats(md: &str) -> CitationStats {
    let body_text = body(md);
    let references_text = &md[body_text.len()..];

    let markers = MARKER_RE.find_iter(body_text).count();
    let unique = parse_markers(body_text);

    let entries: HashSet<u32> = REFERENCE_ENTRY_RE
        .captures_iter(references_text)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    let cited: HashSet<u32> = unique.iter().copied().collect();

    let unresolved = unique.iter().copied().filter(|n| !entries.contains(n)).collect();
    let mut uncited: Vec<u32> = entries.iter().copied().filter(|n| !cited.contains(n)).collect();
    uncited.sort_unstable();

    let sentences: Vec<&str> = prose_lines(body_text)
        .flat_map(split_sentences)
        .collect();
    let cited_sentences = sentences.iter().filter(|s| MARKER_RE.is_match(s)).count();

    CitationStats {
        markers,
        unique_markers: unique.len(),
        references: entries.len(),
        sentences: sentences.len(),
        cited_sentences,
        unresolved,
        uncited,
    }
}

/// Text before the `## References` heading, or the whole text.
fn body(md: &str) -> &str {
    let mut offset = 0;
    for line in md.split_inclusive('\n') {
        let is_references = line
            .trim()
            .strip_prefix("## ")
            .is_some_and(|title| title.trim().eq_ignore_ascii_case(REFERENCES_HEADING));
        if is_references {
            return &md[..offset];
        }
        offset += line.len();
    }
    md
}

/// Non-empty lines that are not headings or blockquotes.
fn prose_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('>'))
}

/// Sentences end at `.`, `!` or `?`; markers after the stop stay with it.
fn split_sentences(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END_RE.find_iter(line) {
        let sentence = line[start..m.end()].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        start = m.end();
    }
    let rest = line[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(text: &str) -> Vec<String> {
        tokenize(text)
    }

    #[test]
    fn tokenize_lowercases_and_drops_punctuation() {
        assert_eq!(toks("Fabry's GLA-gene, 2x!"), vec!["fabry", "s", "gla", "gene", "2x"]);
    }

    #[test]
    fn rouge_scores_partial_overlap() {
        let reference = toks("the cat sat on the mat");
        let generated = toks("the cat lay on the mat");

        let r1 = rouge_n(&generated, &reference, 1);
        assert!((r1.precision - 5.0 / 6.0).abs() < 1e-9);
        assert!((r1.recall - 5.0 / 6.0).abs() < 1e-9);
        assert!((r1.f1 - 5.0 / 6.0).abs() < 1e-9);

        // Shared bigrams: "the cat", "on the", "the mat".
        let r2 = rouge_n(&generated, &reference, 2);
        assert!((r2.f1 - 3.0 / 5.0).abs() < 1e-9);

        let rl = rouge_l(&generated, &reference);
        assert!((rl.f1 - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn rouge_clips_repeated_tokens() {
        let reference = toks("pain pain fatigue");
        let generated = toks("pain pain pain pain");
        let r1 = rouge_n(&generated, &reference, 1);
        assert!((r1.precision - 0.5).abs() < 1e-9);
        assert!((r1.recall - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn rouge_of_empty_text_is_zero() {
        let reference = toks("some words here");
        assert_eq!(rouge_n(&[], &reference, 1), RougeScore::default());
        assert_eq!(rouge_l(&reference, &[]), RougeScore::default());
        assert_eq!(rouge_n(&toks("one"), &toks("one"), 2), RougeScore::default());
    }

    #[test]
    fn heading_overlap_counts_exact_and_soft_matches() {
        let reference = vec![
            "Signs and Symptoms".to_string(),
            "Treatment".to_string(),
            "Living with the condition".to_string(),
            "References".to_string(),
        ];
        let generated = vec![
            "signs and symptoms".to_string(),
            "Treatment options".to_string(),
            "References".to_string(),
        ];

        let overlap = heading_overlap(&generated, &reference);
        assert_eq!(overlap.reference, 3);
        assert_eq!(overlap.generated, 2);
        assert_eq!(overlap.exact_matches, 1);
        // 1.0 for the exact heading, 0.5 for "treatment", 0.0 for the last.
        assert!((overlap.soft_recall - 0.5).abs() < 1e-9);
    }

    #[test]
    fn citation_stats_find_unresolved_and_uncited() {
        let md = "# Fabry disease\n\n> Not medical advice.\n\n\
                  ## Overview\n\nFabry is rare [1]. It is inherited [1][4]. Pain is common.\n\n\
                  ## References\n\n1. NORD. <https://rarediseases.org/fabry>\n\
                  2. Orphanet. <https://www.orpha.net/fabry>\n";

        let stats = citation_stats(md);
        assert_eq!(stats.markers, 3);
        assert_eq!(stats.unique_markers, 2);
        assert_eq!(stats.references, 2);
        assert_eq!(stats.unresolved, vec![4]);
        assert_eq!(stats.uncited, vec![2]);
        assert_eq!(stats.sentences, 3);
        assert_eq!(stats.cited_sentences, 2);
        assert!((stats.precision() - 0.5).abs() < 1e-9);
        assert!((stats.sentence_coverage() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn evaluate_ignores_markers_and_reference_list() {
        let generated = "# X\n\n## Overview\n\nFabry disease is rare [1].\n\n\
                         ## References\n\n1. Source one. <https://a.org>\n";
        let reference = "# X\n\n## Overview\n\nFabry disease is rare.\n";

        let eval = evaluate_article(generated, reference);
        assert!((eval.rouge_1.f1 - 1.0).abs() < 1e-9);
        assert!((eval.rouge_l.f1 - 1.0).abs() < 1e-9);
        assert_eq!(eval.headings.exact_matches, 1);
        assert!((eval.headings.soft_recall - 1.0).abs() < 1e-9);
        assert_eq!(eval.citations.references, 1);
        assert!(eval.citations.unresolved.is_empty());
    }
}
