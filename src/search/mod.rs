//! Web search client used when the course index has nothing to offer.

mod tavily;

pub use tavily::TavilySearch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSnippet {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
}

impl SearchSnippet {
    pub fn new(title: &str, url: &str, content: &str) -> Self {
        Self {
            title: title.to_string(),
            url: url.to_string(),
            content: content.to_string(),
            score: None,
        }
    }

    /// Host part of the URL, without a leading `www.`.
    pub fn domain(&self) -> Option<String> {
        let rest = self
            .url
            .trim()
            .strip_prefix("https://")
            .or_else(|| self.url.trim().strip_prefix("http://"))?;
        let host = rest.split(['/', '?', '#']).next()?.split(':').next()?;
        let host = host.trim_start_matches("www.").to_lowercase();
        if host.is_empty() { None } else { Some(host) }
    }
}

/// A free-text web search API.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Ranked snippets for `query`, best first.
    async fn search(&self, query: &str) -> Result<Vec<SearchSnippet>, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_strips_scheme_path_and_www() {
        let s = SearchSnippet::new("t", "https://www.Coursera.org/learn/python?x=1", "c");
        assert_eq!(s.domain().as_deref(), Some("coursera.org"));
        let s = SearchSnippet::new("t", "http://localhost:8080/a", "c");
        assert_eq!(s.domain().as_deref(), Some("localhost"));
        let s = SearchSnippet::new("t", "not a url", "c");
        assert!(s.domain().is_none());
    }
}
