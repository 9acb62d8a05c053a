use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RkgError};
use crate::retry::RetryPolicy;

const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const PLACEHOLDER_PATTERNS: &[&str] = &["your_key", "replace_me", "api_key_here", "xxx"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub brave_api_key: String,
    pub max_queries: usize,
    pub max_results_per_query: usize,
    pub search_retries: u32,
    pub llm_retries: u32,
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub output_dir: String,
    /// Use the topic itself as the only query when query generation fails.
    pub query_fallback_to_topic: bool,
    /// Turn the topic concept's key components into concepts of their own.
    pub expand_components: bool,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: String::new(),
            anthropic_model: DEFAULT_MODEL.to_string(),
            brave_api_key: String::new(),
            max_queries: 5,
            max_results_per_query: 10,
            search_retries: 2,
            llm_retries: 2,
            retry_backoff_ms: 1000,
            retry_backoff_max_ms: 10_000,
            output_dir: "output/logseq".to_string(),
            query_fallback_to_topic: false,
            expand_components: true,
        }
    }
}

impl ResearchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            anthropic_model: std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| defaults.anthropic_model.clone()),
            brave_api_key: std::env::var("BRAVE_SEARCH_API_KEY").unwrap_or_default(),
            max_queries: env_parse("RKG_MAX_QUERIES").unwrap_or(defaults.max_queries),
            max_results_per_query: env_parse("RKG_MAX_RESULTS_PER_QUERY")
                .unwrap_or(defaults.max_results_per_query),
            search_retries: env_parse("RKG_SEARCH_RETRIES").unwrap_or(defaults.search_retries),
            llm_retries: env_parse("RKG_LLM_RETRIES").unwrap_or(defaults.llm_retries),
            retry_backoff_ms: env_parse("RKG_RETRY_BACKOFF_MS")
                .unwrap_or(defaults.retry_backoff_ms),
            retry_backoff_max_ms: env_parse("RKG_RETRY_BACKOFF_MAX_MS")
                .unwrap_or(defaults.retry_backoff_max_ms),
            output_dir: std::env::var("RKG_OUTPUT_DIR").unwrap_or(defaults.output_dir),
            query_fallback_to_topic: env_parse("RKG_QUERY_FALLBACK")
                .unwrap_or(defaults.query_fallback_to_topic),
            expand_components: env_parse("RKG_EXPAND_COMPONENTS")
                .unwrap_or(defaults.expand_components),
        }
    }

    /// Check the values before any network call is made.
    pub fn validate(&self) -> Result<()> {
        validate_api_key("ANTHROPIC_API_KEY", &self.anthropic_api_key)?;
        validate_api_key("BRAVE_SEARCH_API_KEY", &self.brave_api_key)?;
        if self.max_queries == 0 {
            return Err(RkgError::Config("RKG_MAX_QUERIES must be at least 1".into()));
        }
        if self.max_results_per_query == 0 {
            return Err(RkgError::Config(
                "RKG_MAX_RESULTS_PER_QUERY must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn search_retry_policy(&self) -> RetryPolicy {
        self.retry_policy(self.search_retries)
    }

    pub fn llm_retry_policy(&self) -> RetryPolicy {
        self.retry_policy(self.llm_retries)
    }

    fn retry_policy(&self, max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            Duration::from_millis(self.retry_backoff_ms),
            Duration::from_millis(self.retry_backoff_max_ms.max(self.retry_backoff_ms)),
        )
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn validate_api_key(name: &str, value: &str) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RkgError::Config(format!("{name} is not set")));
    }
    if value.len() < 20 {
        return Err(RkgError::Config(format!(
            "{name} appears invalid (expected at least 20 characters, got {})",
            value.len()
        )));
    }
    let lowered = value.to_lowercase();
    if PLACEHOLDER_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return Err(RkgError::Config(format!(
            "{name} looks like a placeholder; set a real key in .env"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ResearchConfig {
        ResearchConfig {
            anthropic_api_key: "sk-ant-REDACTED".into(),
            brave_api_key: "BSA0123456789abcdefghij".into(),
            ..ResearchConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ResearchConfig::default();
        assert_eq!(config.max_queries, 5);
        assert_eq!(config.search_retries, 2);
        assert!(config.expand_components);
        assert_eq!(config.search_retry_policy().max_retries, 2);
        assert_eq!(
            config.search_retry_policy().initial_backoff,
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn test_validate_accepts_real_looking_keys() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_and_placeholder_keys() {
        let mut config = valid();
        config.brave_api_key = String::new();
        assert!(matches!(config.validate(), Err(RkgError::Config(_))));

        let mut config = valid();
        config.anthropic_api_key = "your_key_goes_here_please_123".into();
        assert!(matches!(config.validate(), Err(RkgError::Config(_))));

        let mut config = valid();
        config.anthropic_api_key = "short".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = valid();
        config.max_queries = 0;
        assert!(config.validate().is_err());
    }
}
