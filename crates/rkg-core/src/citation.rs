use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Result, RkgError};

/// Stable identifier of a citation, derived from its normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CitationId(String);

impl CitationId {
    /// Derive the id for an already-normalized URL.
    pub fn for_normalized_url(normalized: &str) -> Self {
        let digest = Sha256::digest(normalized.as_bytes());
        Self(format!("cite-{}", &hex::encode(digest)[..16]))
    }

    /// Normalize `url` and derive its id.
    pub fn for_url(url: &str) -> Result<Self> {
        Ok(Self::for_normalized_url(&normalize_url(url)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CitationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A source document that facts and concepts point back to. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: CitationId,
    pub url: String,
    pub title: String,
    pub snippet: Option<String>,
    pub accessed_at: DateTime<Utc>,
}

impl Citation {
    pub fn new(url: &str, title: &str, snippet: Option<String>) -> Result<Self> {
        let normalized = normalize_url(url)?;
        let title = title.trim();
        Ok(Self {
            id: CitationId::for_normalized_url(&normalized),
            title: if title.is_empty() {
                normalized.clone()
            } else {
                title.to_string()
            },
            url: normalized,
            snippet: snippet.filter(|s| !s.trim().is_empty()),
            accessed_at: Utc::now(),
        })
    }

    /// Markdown link form, `[title](url)`.
    pub fn to_markdown(&self) -> String {
        format!("[{}]({})", self.title.replace(['[', ']'], ""), self.url)
    }
}

/// Normalize a URL so that trivially different spellings of the same page share one
/// citation: scheme/host lowercased, default port and fragment dropped, trailing slash
/// removed from non-root paths.
pub fn normalize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed).map_err(|e| RkgError::InvalidUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    if url.host_str().map_or(true, str::is_empty) {
        return Err(RkgError::InvalidUrl {
            url: trimmed.to_string(),
            reason: "missing host".into(),
        });
    }

    url.set_fragment(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut normalized = url.to_string();
    // Url always renders a root path as "/"; drop it when there is no query.
    if url.path() == "/" && url.query().is_none() && normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_variants_collide() {
        let a = normalize_url("https://A.Example/x/").unwrap();
        let b = normalize_url("https://a.example:443/x#section").unwrap();
        let c = normalize_url("  https://a.example/x ").unwrap();
        assert_eq!(a, "https://a.example/x");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_normalize_url_keeps_query() {
        let n = normalize_url("https://a.example/search?q=gnn#top").unwrap();
        assert_eq!(n, "https://a.example/search?q=gnn");
    }

    #[test]
    fn test_normalize_url_root() {
        assert_eq!(normalize_url("https://a.example/").unwrap(), "https://a.example");
        assert_eq!(normalize_url("https://a.example").unwrap(), "https://a.example");
    }

    #[test]
    fn test_normalize_url_rejects_garbage() {
        assert!(matches!(
            normalize_url("not a url"),
            Err(RkgError::InvalidUrl { .. })
        ));
        assert!(normalize_url("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_citation_id_is_stable() {
        let a = CitationId::for_url("https://a.example/x/").unwrap();
        let b = CitationId::for_url("https://a.example/x").unwrap();
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("cite-"));
        assert_eq!(a.as_str().len(), "cite-".len() + 16);
        assert_ne!(a, CitationId::for_url("https://a.example/y").unwrap());
    }

    #[test]
    fn test_citation_falls_back_to_url_title() {
        let c = Citation::new("https://a.example/x", "  ", Some(" ".into())).unwrap();
        assert_eq!(c.title, "https://a.example/x");
        assert!(c.snippet.is_none());
        assert_eq!(c.to_markdown(), "[https://a.example/x](https://a.example/x)");
    }
}
