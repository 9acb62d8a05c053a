pub mod canonical;
pub mod citation;
pub mod concept;
pub mod config;
pub mod error;
pub mod llm;
pub mod relationship;
pub mod retry;
pub mod search;
pub mod stage;

pub use canonical::{canonical_name, concept_key, split_parenthetical};
pub use citation::{normalize_url, Citation, CitationId};
pub use concept::{Concept, ConceptType};
pub use config::ResearchConfig;
pub use error::{Result, RkgError};
pub use llm::{LanguageModel, PromptKind};
pub use relationship::{RelationKind, RelationType, Relationship, RelationshipKey};
pub use retry::RetryPolicy;
pub use search::{SearchBatch, SearchProvider, SearchResult};
pub use stage::{ExtractionOutcome, ExtractionStage, InferenceOutcome, InferenceStage, QueryPlanner};
