use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use rkg_core::canonical::concept_key;
use rkg_core::concept::Concept;
use rkg_core::error::Result;
use rkg_core::llm::{parse_json_object, take_array, LanguageModel, PromptKind};
use rkg_core::relationship::{RelationType, Relationship};
use rkg_core::retry::RetryPolicy;
use rkg_core::stage::{InferenceOutcome, InferenceStage};

// ---------------------------------------------------------------------------
// Model output schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LlmInference {
    source: String,
    target: String,
    relation_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// (source, target, relation type) of an edge, regardless of kind.
type Triple = (String, String, RelationType);

// ---------------------------------------------------------------------------
// Inference stage
// ---------------------------------------------------------------------------

/// Proposes uncited relationships between already-extracted concepts.
pub struct LlmInferenceStage {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

/// Case-insensitive name and alias lookup over the concepts handed to one inference call.
struct ConceptIndex {
    /// concept key -> display name
    names: HashMap<String, String>,
}

impl ConceptIndex {
    fn new(concepts: &[Concept]) -> Self {
        let mut names = HashMap::new();
        for concept in concepts {
            names.insert(concept_key(&concept.name), concept.name.clone());
        }
        // Aliases never shadow a canonical name.
        for concept in concepts {
            for alias in &concept.aliases {
                names
                    .entry(concept_key(alias))
                    .or_insert_with(|| concept.name.clone());
            }
        }
        Self { names }
    }

    fn resolve(&self, raw: &str) -> Option<&str> {
        self.names.get(&concept_key(raw)).map(String::as_str)
    }
}

impl LlmInferenceStage {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    fn build_input(topic: &str, concepts: &[Concept], facts: &[Relationship]) -> Value {
        let concepts: Vec<Value> = concepts
            .iter()
            .map(|c| {
                json!({
                    "name": c.name,
                    "type": c.concept_type.as_str(),
                    "description": c.description,
                })
            })
            .collect();
        let facts: Vec<Value> = facts
            .iter()
            .map(|f| {
                json!({
                    "source": f.source,
                    "relation_type": f.relation_type.as_str(),
                    "target": f.target,
                })
            })
            .collect();

        json!({ "topic": topic, "concepts": concepts, "facts": facts })
    }

    /// Validate the model's proposals against the known concepts and facts.
    fn parse_inferences(
        raw: &str,
        concepts: &[Concept],
        facts: &[Relationship],
    ) -> Result<InferenceOutcome> {
        let mut map = parse_json_object(raw)?;
        let items = take_array(&mut map, "relationships")?;

        let index = ConceptIndex::new(concepts);
        let mut seen: HashSet<Triple> = facts
            .iter()
            .map(|f| {
                let source = index.resolve(&f.source).unwrap_or(&f.source).to_string();
                let target = index.resolve(&f.target).unwrap_or(&f.target).to_string();
                (source, target, f.relation_type)
            })
            .collect();

        let mut outcome = InferenceOutcome::default();

        for item in items {
            let proposal: LlmInference = match serde_json::from_value(item) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed inference");
                    outcome
                        .warnings
                        .push(format!("malformed inference skipped: {e}"));
                    continue;
                }
            };

            let (source, target) = match (index.resolve(&proposal.source), index.resolve(&proposal.target)) {
                (Some(s), Some(t)) => (s.to_string(), t.to_string()),
                (s, t) => {
                    warn!(
                        source_name = %proposal.source,
                        target_name = %proposal.target,
                        source_found = s.is_some(),
                        target_found = t.is_some(),
                        "Dropping inference: referenced concept not found"
                    );
                    outcome.warnings.push(format!(
                        "inference '{}' -> '{}' names an unknown concept; dropped",
                        proposal.source, proposal.target
                    ));
                    continue;
                }
            };

            if source == target {
                warn!(concept = %source, "Dropping self-loop inference");
                outcome
                    .warnings
                    .push(format!("self-loop inference on '{source}' dropped"));
                continue;
            }

            let relation_type = RelationType::parse_lenient(&proposal.relation_type);
            if !seen.insert((source.clone(), target.clone(), relation_type)) {
                // Already a fact, or proposed twice.
                continue;
            }

            let mut inference = Relationship::inference(&source, &target, relation_type);
            if let Some(confidence) = proposal.confidence {
                inference = inference.with_confidence(confidence);
            }
            if let Some(description) = proposal.description.filter(|d| !d.trim().is_empty()) {
                inference = inference.with_description(description.trim());
            }
            outcome.inferences.push(inference);
        }

        Ok(outcome)
    }
}

#[async_trait]
impl InferenceStage for LlmInferenceStage {
    #[instrument(skip_all, fields(concepts = concepts.len(), facts = facts.len()))]
    async fn infer(
        &self,
        topic: &str,
        concepts: &[Concept],
        facts: &[Relationship],
    ) -> Result<InferenceOutcome> {
        if concepts.len() < 2 {
            info!("Fewer than two concepts, nothing to infer");
            return Ok(InferenceOutcome::default());
        }

        let input = Self::build_input(topic, concepts, facts);
        let raw = self
            .retry
            .run("relationship_inference", || {
                self.llm.complete(PromptKind::RelationshipInference, &input)
            })
            .await?;

        let outcome = Self::parse_inferences(&raw, concepts, facts)?;
        info!(
            inferred = outcome.inferences.len(),
            dropped = outcome.warnings.len(),
            "Relationship inference complete"
        );
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rkg_core::citation::CitationId;
    use rkg_core::concept::ConceptType;
    use rkg_core::error::RkgError;
    use rkg_core::relationship::RelationKind;

    use super::*;

    fn concepts() -> Vec<Concept> {
        vec![
            Concept::new("Graph Neural Network", ConceptType::Method, "Networks over graphs.")
                .with_alias("GNN"),
            Concept::new("Message Passing", ConceptType::Algorithm, "Neighbour exchange."),
            Concept::new("Graph Convolutional Network", ConceptType::Method, "Convolution on graphs.")
                .with_alias("GCN"),
        ]
    }

    fn facts() -> Vec<Relationship> {
        vec![Relationship::fact(
            "GCN",
            "Graph Neural Network",
            RelationType::IsA,
            [CitationId::for_normalized_url("https://a.example/gcn")],
        )]
    }

    #[test]
    fn test_parse_inferences_resolves_aliases() {
        let raw = r#"{"relationships": [
            {"source": "GCN", "relation_type": "uses", "target": "message passing",
             "description": "GCNs are GNNs, and GNNs use message passing.", "confidence": 0.7}
        ]}"#;

        let outcome = LlmInferenceStage::parse_inferences(raw, &concepts(), &facts()).unwrap();

        assert_eq!(outcome.inferences.len(), 1);
        let inference = &outcome.inferences[0];
        assert_eq!(inference.source, "Graph Convolutional Network");
        assert_eq!(inference.target, "Message Passing");
        assert_eq!(inference.kind, RelationKind::Inference);
        assert!(inference.citations.is_empty());
        assert_eq!(inference.confidence, 0.7);
    }

    #[test]
    fn test_parse_inferences_ignores_endpoint_case() {
        let raw = r#"{"relationships": [
            {"source": "gnn", "relation_type": "uses", "target": "MESSAGE PASSING"},
            {"source": "gcn", "relation_type": "is_a", "target": "graph neural network"}
        ]}"#;
        let outcome = LlmInferenceStage::parse_inferences(raw, &concepts(), &facts()).unwrap();

        assert_eq!(outcome.inferences.len(), 1);
        assert_eq!(outcome.inferences[0].source, "Graph Neural Network");
        assert_eq!(outcome.inferences[0].target, "Message Passing");
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_parse_inferences_drops_existing_facts() {
        let raw = r#"{"relationships": [
            {"source": "Graph Convolutional Network", "relation_type": "is_a", "target": "GNN"}
        ]}"#;
        let outcome = LlmInferenceStage::parse_inferences(raw, &concepts(), &facts()).unwrap();
        assert!(outcome.inferences.is_empty());
    }

    #[test]
    fn test_parse_inferences_drops_unknown_and_self_loops() {
        let raw = r#"{"relationships": [
            {"source": "GNN", "relation_type": "related_to", "target": "Transformer"},
            {"source": "GNN", "relation_type": "related_to", "target": "Graph Neural Network"},
            {"source": "GNN"}
        ]}"#;
        let outcome = LlmInferenceStage::parse_inferences(raw, &concepts(), &facts()).unwrap();
        assert!(outcome.inferences.is_empty());
        assert_eq!(outcome.warnings.len(), 3);
    }

    #[test]
    fn test_parse_inferences_dedupes_proposals() {
        let raw = r#"{"relationships": [
            {"source": "GNN", "relation_type": "uses", "target": "Message Passing"},
            {"source": "graph neural network", "relation_type": "uses", "target": "message passing"}
        ]}"#;
        let outcome = LlmInferenceStage::parse_inferences(raw, &concepts(), &facts()).unwrap();
        assert_eq!(outcome.inferences.len(), 1);
    }

    #[test]
    fn test_parse_inferences_invalid_json() {
        let result = LlmInferenceStage::parse_inferences("no json", &concepts(), &facts());
        assert!(matches!(result, Err(RkgError::MalformedOutput(_))));
    }

    struct UnreachableModel;

    #[async_trait]
    impl LanguageModel for UnreachableModel {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn complete(&self, _kind: PromptKind, _input: &Value) -> Result<String> {
            Err(RkgError::Internal("model should not be called".into()))
        }
    }

    #[tokio::test]
    async fn test_infer_skips_small_graphs() {
        let stage = LlmInferenceStage::new(Arc::new(UnreachableModel), RetryPolicy::immediate(0));
        let outcome = stage.infer("GNN", &concepts()[..1], &[]).await.unwrap();
        assert!(outcome.inferences.is_empty());
    }

    #[tokio::test]
    async fn test_infer_propagates_model_errors() {
        let stage = LlmInferenceStage::new(Arc::new(UnreachableModel), RetryPolicy::immediate(0));
        assert!(stage.infer("GNN", &concepts(), &facts()).await.is_err());
    }

    #[test]
    fn test_build_input_shape() {
        let input = LlmInferenceStage::build_input("GNN", &concepts(), &facts());
        assert_eq!(input["concepts"].as_array().unwrap().len(), 3);
        assert_eq!(input["facts"][0]["relation_type"], "is_a");
        assert_eq!(input["facts"][0]["source"], "GCN");
    }
}
