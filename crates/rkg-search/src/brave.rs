use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use rkg_core::config::ResearchConfig;
use rkg_core::error::{Result, RkgError};
use rkg_core::search::{SearchProvider, SearchResult};

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

/// Brave caps `count` at 20 per request.
const MAX_COUNT: usize = 20;

const REQUEST_TIMEOUT_SECS: u64 = 10;

pub struct BraveSearchProvider {
    client: reqwest::Client,
    api_key: String,
}

// ── Brave Web Search response types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveWebResult>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

impl BraveSearchProvider {
    pub fn new(config: &ResearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("rkg-search/0.1")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RkgError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.brave_api_key.clone(),
        })
    }

    fn classify_status(status: StatusCode, body: &str) -> RkgError {
        let message = format!("Brave Search returned {status}: {}", truncate(body, 300));
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            RkgError::SearchTransient(message)
        } else {
            // 401/403 (bad key), 422 (bad params) and other client errors are not retryable.
            RkgError::SearchFatal(message)
        }
    }

    fn parse_response(body: &str) -> Result<Vec<SearchResult>> {
        let response: BraveResponse = serde_json::from_str(body)
            .map_err(|e| RkgError::SearchTransient(format!("unparseable Brave response: {e}")))?;

        Ok(response
            .web
            .map(|web| web.results)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| !r.url.trim().is_empty())
            .map(|r| SearchResult {
                title: strip_tags(&r.title),
                url: r.url.trim().to_string(),
                snippet: strip_tags(&r.description),
            })
            .collect())
    }
}

#[async_trait]
impl SearchProvider for BraveSearchProvider {
    fn name(&self) -> &str {
        "brave"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let count = max_results.clamp(1, MAX_COUNT).to_string();
        debug!(query = %query, count = %count, "Sending Brave search request");

        let response = self
            .client
            .get(BRAVE_SEARCH_URL)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await
            .map_err(|e| RkgError::SearchTransient(format!("Brave request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RkgError::SearchTransient(format!("failed to read Brave body: {e}")))?;

        if !status.is_success() {
            return Err(Self::classify_status(status, &body));
        }

        let results = Self::parse_response(&body)?;
        info!(query = %query, results = results.len(), "Brave search complete");
        Ok(results)
    }
}

/// Brave wraps matched terms in `<strong>` tags; drop any markup.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "query": {"original": "gnn"},
            "web": {
                "results": [
                    {"title": "What is a <strong>GNN</strong>?", "url": "https://a.example/x", "description": "A <strong>GNN</strong> uses message passing."},
                    {"title": "No url", "url": "", "description": "skipped"},
                    {"title": "Second", "url": " https://b.example/y ", "description": ""}
                ]
            }
        }"#;
        let results = BraveSearchProvider::parse_response(body).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "What is a GNN?");
        assert_eq!(results[0].snippet, "A GNN uses message passing.");
        assert_eq!(results[1].url, "https://b.example/y");
    }

    #[test]
    fn test_parse_response_without_web_section() {
        let results = BraveSearchProvider::parse_response(r#"{"type": "search"}"#).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_parse_response_garbage_is_transient() {
        let err = BraveSearchProvider::parse_response("<html>").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            BraveSearchProvider::classify_status(StatusCode::UNAUTHORIZED, ""),
            RkgError::SearchFatal(_)
        ));
        assert!(BraveSearchProvider::classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(BraveSearchProvider::classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!BraveSearchProvider::classify_status(StatusCode::BAD_REQUEST, "").is_transient());
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("a <b>bold</b>  move"), "a bold move");
    }

    #[test]
    fn test_new_uses_config_key() {
        let config = ResearchConfig {
            brave_api_key: "key".into(),
            ..ResearchConfig::default()
        };
        let provider = BraveSearchProvider::new(&config).unwrap();
        assert_eq!(provider.name(), "brave");
        assert_eq!(provider.api_key, "key");
    }
}
