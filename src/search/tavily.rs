//! Tavily search API client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{SearchSnippet, WebSearch};
use crate::error::SearchError;
use crate::ratelimit::RateLimiter;

const TAVILY_URL: &str = "https://api.tavily.com/search";

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    score: Option<f64>,
}

/// Searches the web through Tavily's `/search` endpoint.
pub struct TavilySearch {
    client: Client,
    api_key: SecretString,
    endpoint: String,
    max_results: usize,
    search_depth: String,
    limiter: Option<Arc<RateLimiter>>,
}

impl TavilySearch {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            client: Client::new(),
            api_key,
            endpoint: TAVILY_URL.to_string(),
            max_results: 5,
            search_depth: "advanced".to_string(),
            limiter: None,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Point at a different endpoint (self-hosted proxy or test server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchSnippet>, SearchError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let body = TavilyRequest {
            api_key: self.api_key.expose_secret(),
            query,
            max_results: self.max_results,
            search_depth: &self.search_depth,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::RequestFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SearchError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TavilyResponse = resp
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;

        let snippets: Vec<SearchSnippet> = parsed
            .results
            .into_iter()
            .filter(|r| !r.content.trim().is_empty() || !r.title.trim().is_empty())
            .map(|r| SearchSnippet {
                title: r.title,
                url: r.url,
                content: r.content,
                score: r.score,
            })
            .collect();

        tracing::debug!(query, results = snippets.len(), "Web search complete");
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_api_shape() {
        let body = TavilyRequest {
            api_key: "tvly-test",
            query: "python courses",
            max_results: 5,
            search_depth: "advanced",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["query"], "python courses");
        assert_eq!(json["max_results"], 5);
        assert_eq!(json["search_depth"], "advanced");
    }

    #[test]
    fn response_tolerates_missing_fields() {
        let parsed: TavilyResponse = serde_json::from_str(
            r#"{"query":"q","results":[{"title":"Intro to CS","url":"https://cs50.harvard.edu","content":"Free course"},{"url":"https://x"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].title, "Intro to CS");
        assert!(parsed.results[1].score.is_none());

        let empty: TavilyResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.results.is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_request_failure() {
        let search = TavilySearch::new(SecretString::from("tvly-test"))
            .with_endpoint("http://127.0.0.1:9/search");
        let err = search.search("anything").await.unwrap_err();
        assert!(matches!(err, SearchError::RequestFailed(_)));
    }
}
