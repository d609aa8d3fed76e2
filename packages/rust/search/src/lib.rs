//! Search collaborator for evidence retrieval.
//!
//! The retrieval coordinator only sees the [`SearchBackend`] trait. The
//! shipped implementation, [`WebSearchBackend`], queries a Brave-style web
//! search API and optionally fetches each result page for its full text.

mod web;

use async_trait::async_trait;

use rarecite_shared::{RawDocument, Result, host_matches_domain};

pub use web::WebSearchBackend;

/// A source of raw documents for a query.
///
/// An empty result is a valid answer. Errors are absorbed by the caller and
/// recorded as failed queries.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run one query, excluding the given domains (and their subdomains).
    async fn search(&self, query: &str, excluded_domains: &[String]) -> Result<Vec<RawDocument>>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "search"
    }
}

/// Append `-site:` operators for every excluded domain.
pub fn query_with_exclusions(query: &str, excluded_domains: &[String]) -> String {
    let mut q = query.trim().to_string();
    for domain in excluded_domains {
        let domain = domain.trim();
        if !domain.is_empty() {
            q.push_str(" -site:");
            q.push_str(domain);
        }
    }
    q
}

/// Whether a URL's host falls under any excluded domain.
pub fn is_excluded(url: &str, excluded_domains: &[String]) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    excluded_domains
        .iter()
        .any(|domain| host_matches_domain(host, domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exclusions_appended_in_order() {
        let q = query_with_exclusions(
            " Fabry disease prevalence ",
            &domains(&["wikipedia.org", "", "britannica.com"]),
        );
        assert_eq!(
            q,
            "Fabry disease prevalence -site:wikipedia.org -site:britannica.com"
        );
    }

    #[test]
    fn no_exclusions_leaves_query() {
        assert_eq!(query_with_exclusions("dmd", &[]), "dmd");
    }

    #[test]
    fn excluded_hosts_detected() {
        let excluded = domains(&["wikipedia.org"]);
        assert!(is_excluded("https://en.wikipedia.org/wiki/Fabry_disease", &excluded));
        assert!(!is_excluded("https://www.orpha.net/fabry", &excluded));
        assert!(!is_excluded("not a url", &excluded));
    }
}
