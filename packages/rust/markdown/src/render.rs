//! Article rendering and heading extraction.

use std::sync::LazyLock;

use regex::Regex;

use rarecite_shared::{Article, Bibliography};

/// Heading of the trailing reference list.
pub const REFERENCES_HEADING: &str = "References";

/// Render a finished article as Markdown.
///
/// Layout: `# {disease}`, the disclaimer as a blockquote, one `##` block per
/// section in article order, then `## References` ordered by global number.
pub fn render_article(article: &Article, bibliography: &Bibliography) -> String {
    let mut md = String::new();

    md.push_str(&format!("# {}\n\n", article.disease.trim()));
    for line in article.disclaimer.trim().lines() {
        md.push_str(&format!("> {}\n", line.trim()));
    }
    md.push('\n');

    for section in &article.sections {
        md.push_str(&format!("## {}\n\n", section.title));
        let content = section.content.trim();
        if !content.is_empty() {
            md.push_str(content);
            md.push_str("\n\n");
        }
    }

    md.push_str(&format!("## {REFERENCES_HEADING}\n\n"));
    if bibliography.is_empty() {
        md.push_str("No sources were cited.\n");
    }
    for entry in &bibliography.entries {
        let title = entry.title.trim();
        let url = entry.url.trim();
        let label = [title, url, entry.document_key.as_str()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or_default();

        md.push_str(&format!("{}. {}", entry.number, label.trim_end_matches('.')));
        if !url.is_empty() && label != url {
            md.push_str(&format!(". <{url}>"));
        }
        md.push('\n');
    }

    md
}

/// Headings of level 2 and deeper, in document order.
pub fn article_headings(md: &str) -> Vec<String> {
    static HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^#{2,}\s+(.+?)\s*$").expect("valid regex"));

    HEADING_RE
        .captures_iter(md)
        .map(|c| c[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rarecite_shared::{ArticleSection, BibliographyEntry, QualityTier, SectionId};

    fn sample_article() -> Article {
        Article {
            disease: "Fabry disease".into(),
            disclaimer: "Not medical advice.".into(),
            sections: SectionId::ALL
                .iter()
                .map(|id| ArticleSection {
                    section: *id,
                    title: id.title().to_string(),
                    content: format!("Text for {} [1].", id.as_str()),
                    citations: vec![],
                    is_placeholder: false,
                    stripped_markers: vec![],
                })
                .collect(),
            unknown_sections: vec![],
        }
    }

    #[test]
    fn renders_sections_in_order_with_references() {
        let bib = Bibliography {
            entries: vec![
                BibliographyEntry {
                    number: 1,
                    document_key: "orpha.net/fabry".into(),
                    url: "https://www.orpha.net/fabry".into(),
                    title: "Fabry disease".into(),
                    tier: QualityTier::AgencyOrDatabase,
                },
                BibliographyEntry {
                    number: 2,
                    document_key: "sha256:abc".into(),
                    url: "".into(),
                    title: "".into(),
                    tier: QualityTier::TextbookOrSociety,
                },
            ],
        };
        let md = render_article(&sample_article(), &bib);

        assert!(md.starts_with("# Fabry disease\n\n> Not medical advice.\n"));
        assert!(md.contains("1. Fabry disease. <https://www.orpha.net/fabry>\n"));
        assert!(md.contains("2. sha256:abc\n"));

        let headings = article_headings(&md);
        assert_eq!(headings.len(), 14);
        assert_eq!(headings[0], "Quick Facts");
        assert_eq!(headings[12], "Support and Resources");
        assert_eq!(headings[13], REFERENCES_HEADING);
    }

    #[test]
    fn empty_bibliography_is_stated() {
        let md = render_article(&sample_article(), &Bibliography::default());
        assert!(md.contains("## References\n\nNo sources were cited.\n"));
    }

    #[test]
    fn headings_skip_h1() {
        let md = "# Title\n\n## One\n\n### Two  \ntext ## not a heading\n";
        assert_eq!(article_headings(md), vec!["One", "Two"]);
    }
}
