use async_trait::async_trait;

use crate::citation::Citation;
use crate::concept::Concept;
use crate::error::Result;
use crate::relationship::Relationship;
use crate::search::SearchBatch;

/// Everything one extraction call yields for one search batch.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    /// Citation records for every batch URL referenced by `concepts` or `facts`.
    pub citations: Vec<Citation>,
    pub concepts: Vec<Concept>,
    pub facts: Vec<Relationship>,
    /// Per-item problems that were skipped rather than failing the batch.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InferenceOutcome {
    pub inferences: Vec<Relationship>,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait QueryPlanner: Send + Sync {
    /// Produce 1..=`max_queries` distinct, non-empty queries for `topic`, or fail with
    /// `RkgError::QueryGeneration`.
    async fn plan(&self, topic: &str, max_queries: usize) -> Result<Vec<String>>;
}

#[async_trait]
pub trait ExtractionStage: Send + Sync {
    /// Extract concepts and cited facts from one batch. `known_concepts` are the canonical
    /// names already in the registry.
    async fn extract(
        &self,
        topic: &str,
        batch: &SearchBatch,
        known_concepts: &[String],
    ) -> Result<ExtractionOutcome>;
}

#[async_trait]
pub trait InferenceStage: Send + Sync {
    /// Propose uncited relationships over the accumulated concepts and facts.
    async fn infer(
        &self,
        topic: &str,
        concepts: &[Concept],
        facts: &[Relationship],
    ) -> Result<InferenceOutcome>;
}
