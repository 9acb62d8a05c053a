//! Component expansion.
//!
//! The concept that names the research topic usually lists its building blocks in
//! `key_components`, one `"Name: explanation"` entry each. Expansion turns every entry
//! into a concept of its own so it gets a page and can take part in inference.

use std::collections::HashSet;

use tracing::debug;

use rkg_core::canonical::{concept_key, split_parenthetical};
use rkg_core::concept::{Concept, ConceptType};
use rkg_core::search::SearchBatch;
use rkg_core::stage::ExtractionOutcome;
use rkg_graph::KnowledgeGraph;

/// Relevance given to every expanded component.
pub const COMPONENT_RELEVANCE: f64 = 0.85;

/// Upper bound on search results handed to one enrichment call.
pub const MAX_ENRICHMENT_RESULTS: usize = 50;

/// Parse a `"Name (Alias): explanation"` entry. Entries without a colon or with a blank
/// name are not components.
pub fn parse_component(entry: &str) -> Option<(String, Option<String>, String)> {
    let (name, explanation) = entry.split_once(':')?;
    let (name, alias) = split_parenthetical(name);
    if name.is_empty() {
        return None;
    }
    Some((name, alias, explanation.trim().to_string()))
}

/// Build one concept per parseable key component of the concept that resolves to
/// `topic`. Components inherit the parent's citations. Empty when the topic is not a
/// concept of the graph.
pub fn component_concepts(graph: &KnowledgeGraph, topic: &str) -> Vec<Concept> {
    let Some(parent) = graph.concepts().get(topic) else {
        debug!(%topic, "Topic is not a concept; nothing to expand");
        return Vec::new();
    };

    let parent_key = concept_key(&parent.name);
    let mut seen = HashSet::new();
    let mut components = Vec::new();

    for entry in &parent.key_components {
        let Some((name, alias, explanation)) = parse_component(entry) else {
            debug!(entry = %entry, "Key component is not in 'Name: explanation' form");
            continue;
        };
        let key = concept_key(&name);
        if key == parent_key || !seen.insert(key) {
            continue;
        }

        let mut component = Concept::new(&name, ConceptType::Technology, explanation);
        if let Some(alias) = alias {
            component.add_alias(&alias);
        }
        component.relevance_score = COMPONENT_RELEVANCE;
        component.citations = parent.citations.clone();
        components.push(component);
    }

    components
}

/// All results of the run in query order, deduplicated by URL and capped, as one batch
/// queried by `name`.
pub fn pooled_batch(batches: &[SearchBatch], name: &str) -> SearchBatch {
    let mut urls = HashSet::new();
    let results = batches
        .iter()
        .flat_map(|b| b.results.iter())
        .filter(|r| urls.insert(r.url.as_str()))
        .take(MAX_ENRICHMENT_RESULTS)
        .cloned()
        .collect();

    SearchBatch {
        query_index: 0,
        query: name.to_string(),
        results,
    }
}

/// Copy the detail of the extracted concept that matches `component` (or the first one
/// extracted) onto it. Citations and relevance stay the component's own.
pub fn enrich_component(component: &mut Concept, outcome: ExtractionOutcome) {
    let key = concept_key(&component.name);
    let mut concepts = outcome.concepts;
    let position = concepts
        .iter()
        .position(|c| concept_key(&c.name) == key || c.aliases.iter().any(|a| concept_key(a) == key))
        .unwrap_or(0);
    if position >= concepts.len() {
        return;
    }
    let detail = concepts.swap_remove(position);

    if !detail.description.is_empty() {
        component.description = detail.description;
    }
    if detail.technical_details.is_some() {
        component.technical_details = detail.technical_details;
    }
    if detail.implementation_notes.is_some() {
        component.implementation_notes = detail.implementation_notes;
    }
    if !detail.key_components.is_empty() {
        component.key_components = detail.key_components;
    }
    if !detail.use_cases.is_empty() {
        component.use_cases = detail.use_cases;
    }
    if concept_key(&detail.name) != key {
        component.add_alias(&detail.name);
    }
    for alias in &detail.aliases {
        component.add_alias(alias);
    }
}

#[cfg(test)]
mod tests {
    use rkg_core::citation::Citation;
    use rkg_core::search::SearchResult;

    use super::*;

    fn graph_with_topic(components: &[&str]) -> (KnowledgeGraph, Citation) {
        let mut graph = KnowledgeGraph::new();
        let citation = Citation::new("https://a.example/vit", "ViT", None).unwrap();
        graph.add_citation(citation.clone());

        let mut topic = Concept::new("Vision Transformer", ConceptType::Method, "Transformers on images.")
            .with_citation(citation.id.clone());
        topic.key_components = components.iter().map(|c| c.to_string()).collect();
        graph.upsert_concept(topic).unwrap();
        (graph, citation)
    }

    #[test]
    fn test_parse_component() {
        assert_eq!(
            parse_component("Patch Embedding (PE): splits the image into patches"),
            Some((
                "Patch Embedding".to_string(),
                Some("PE".to_string()),
                "splits the image into patches".to_string()
            ))
        );
        assert_eq!(
            parse_component("self attention: mixes tokens: globally"),
            Some(("Self Attention".to_string(), None, "mixes tokens: globally".to_string()))
        );
        assert_eq!(parse_component("no colon here"), None);
        assert_eq!(parse_component("  : orphan explanation"), None);
    }

    #[test]
    fn test_component_concepts_inherit_parent_citations() {
        let (graph, citation) = graph_with_topic(&[
            "Patch Embedding (PE): splits the image into patches",
            "free text without a name",
            "patch embedding: duplicate entry",
            "Vision Transformer: the parent itself",
        ]);

        let components = component_concepts(&graph, "vision transformer");
        assert_eq!(components.len(), 1);

        let component = &components[0];
        assert_eq!(component.name, "Patch Embedding");
        assert_eq!(component.concept_type, ConceptType::Technology);
        assert_eq!(component.description, "splits the image into patches");
        assert!(component.aliases.contains("PE"));
        assert_eq!(component.relevance_score, COMPONENT_RELEVANCE);
        assert!(component.citations.contains(&citation.id));
    }

    #[test]
    fn test_component_concepts_need_topic_concept() {
        let (graph, _) = graph_with_topic(&["Patch Embedding: patches"]);
        assert!(component_concepts(&graph, "Diffusion Models").is_empty());
    }

    #[test]
    fn test_pooled_batch_dedupes_and_caps() {
        let batch = |index: usize, urls: &[&str]| SearchBatch {
            query_index: index,
            query: format!("q{index}"),
            results: urls
                .iter()
                .map(|u| SearchResult::new("t", *u, "s"))
                .collect(),
        };
        let many: Vec<String> = (0..60).map(|i| format!("https://c.example/{i}")).collect();
        let many: Vec<&str> = many.iter().map(String::as_str).collect();

        let pooled = pooled_batch(
            &[batch(0, &["https://a.example", "https://b.example"]), batch(1, &["https://a.example"])],
            "Patch Embedding",
        );
        assert_eq!(pooled.query, "Patch Embedding");
        assert_eq!(pooled.results.len(), 2);

        let pooled = pooled_batch(&[batch(0, &many)], "x");
        assert_eq!(pooled.results.len(), MAX_ENRICHMENT_RESULTS);
    }

    #[test]
    fn test_enrich_component_prefers_matching_concept() {
        let mut component = Concept::new("Patch Embedding", ConceptType::Technology, "short");
        let mut detail = Concept::new("patch embedding", ConceptType::Method, "A linear projection of patches.")
            .with_alias("Patch Projection");
        detail.technical_details = Some("16x16 patches, flattened.".into());
        detail.implementation_notes = Some("Use a strided convolution.".into());

        enrich_component(
            &mut component,
            ExtractionOutcome {
                concepts: vec![Concept::new("Unrelated", ConceptType::Other, "noise"), detail],
                ..ExtractionOutcome::default()
            },
        );

        assert_eq!(component.name, "Patch Embedding");
        assert_eq!(component.concept_type, ConceptType::Technology);
        assert_eq!(component.description, "A linear projection of patches.");
        assert_eq!(component.implementation_notes.as_deref(), Some("Use a strided convolution."));
        assert!(component.aliases.contains("Patch Projection"));
        assert!(component.citations.is_empty());
    }

    #[test]
    fn test_enrich_component_with_nothing_extracted() {
        let mut component = Concept::new("Patch Embedding", ConceptType::Technology, "short");
        enrich_component(&mut component, ExtractionOutcome::default());
        assert_eq!(component.description, "short");
    }
}
