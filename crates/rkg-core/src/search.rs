use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One hit returned by a search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl SearchResult {
    pub fn new(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

/// The ordered results of one planned query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchBatch {
    pub query_index: usize,
    pub query: String,
    pub results: Vec<SearchResult>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Run one web search. Transient failures surface as `RkgError::SearchTransient`,
    /// unusable configuration (e.g. rejected credentials) as `RkgError::SearchFatal`.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}
