use thiserror::Error;

#[derive(Error, Debug)]
pub enum RkgError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Query generation error: {0}")]
    QueryGeneration(String),

    #[error("Dangling reference: edge {from} -> {to} names unknown concept '{missing}'")]
    DanglingReference {
        from: String,
        to: String,
        missing: String,
    },

    #[error("Citation integrity error: extraction cited '{url}', which is not in its input batch")]
    CitationIntegrity { url: String },

    #[error("Invalid relationship: {0}")]
    InvalidRelationship(String),

    #[error("Invalid concept: {0}")]
    InvalidConcept(String),

    #[error("Unknown concept: {0}")]
    UnknownConcept(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Search error (transient): {0}")]
    SearchTransient(String),

    #[error("Search error (fatal): {0}")]
    SearchFatal(String),

    #[error("Language model error: {0}")]
    LanguageModel(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RkgError {
    /// Whether a retry of the failed call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RkgError::SearchTransient(_) | RkgError::LanguageModel(_) => true,
            RkgError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RkgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RkgError::SearchTransient("timeout".into()).is_transient());
        assert!(RkgError::LanguageModel("overloaded".into()).is_transient());
        assert!(!RkgError::SearchFatal("bad key".into()).is_transient());
        assert!(!RkgError::MalformedOutput("not json".into()).is_transient());
        assert!(!RkgError::Cancelled.is_transient());
    }

    #[test]
    fn test_dangling_reference_message() {
        let err = RkgError::DanglingReference {
            from: "GNN".into(),
            to: "Ghost".into(),
            missing: "Ghost".into(),
        };
        assert_eq!(
            err.to_string(),
            "Dangling reference: edge GNN -> Ghost names unknown concept 'Ghost'"
        );
    }
}
