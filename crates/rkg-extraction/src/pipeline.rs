use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use rkg_core::canonical::split_parenthetical;
use rkg_core::citation::{normalize_url, Citation, CitationId};
use rkg_core::concept::{Concept, ConceptType};
use rkg_core::error::{Result, RkgError};
use rkg_core::llm::{parse_json_object, take_array, LanguageModel, PromptKind};
use rkg_core::relationship::{RelationType, Relationship};
use rkg_core::retry::RetryPolicy;
use rkg_core::search::SearchBatch;
use rkg_core::stage::{ExtractionOutcome, ExtractionStage};

/// Extracts concepts and sourced facts from one search batch with a language model.
pub struct LlmExtractionStage {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

// ── Intermediate JSON schema for model output parsing ──────────────────────

#[derive(Debug, Deserialize)]
struct LlmConcept {
    name: String,
    #[serde(rename = "type")]
    concept_type: String,
    description: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    source_urls: Vec<String>,
    #[serde(default)]
    relevance_score: Option<f64>,
    #[serde(default)]
    technical_details: Option<String>,
    #[serde(default)]
    implementation_notes: Option<String>,
    #[serde(default)]
    key_components: Vec<String>,
    #[serde(default)]
    use_cases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LlmFact {
    source: String,
    target: String,
    relation_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    source_urls: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

// ── Batch citation lookup ──────────────────────────────────────────────────

/// The citations a batch can justify, keyed by normalized URL.
struct BatchSources {
    by_url: HashMap<String, Citation>,
    order: Vec<String>,
    /// Lowercased title and snippet per result, for mention matching.
    haystacks: Vec<(String, String)>,
}

impl BatchSources {
    fn new(batch: &SearchBatch, warnings: &mut Vec<String>) -> Self {
        let mut by_url = HashMap::new();
        let mut order = Vec::new();
        let mut haystacks = Vec::new();

        for result in &batch.results {
            let snippet = Some(result.snippet.clone());
            match Citation::new(&result.url, &result.title, snippet) {
                Ok(citation) => {
                    let key = citation.url.clone();
                    haystacks.push((
                        key.clone(),
                        format!("{} {}", result.title, result.snippet).to_lowercase(),
                    ));
                    if !by_url.contains_key(&key) {
                        order.push(key.clone());
                        by_url.insert(key, citation);
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %result.url, error = %e, "Skipping search result with unusable URL");
                    warnings.push(e.to_string());
                }
            }
        }

        Self {
            by_url,
            order,
            haystacks,
        }
    }

    fn lookup(&self, url: &str) -> Option<CitationId> {
        let normalized = normalize_url(url).ok()?;
        self.by_url.get(&normalized).map(|c| c.id.clone())
    }

    /// Citations for the results whose title or snippet mentions any of `names`.
    fn mentioning<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Vec<CitationId> {
        let needles: Vec<String> = names
            .into_iter()
            .map(|n| n.to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();

        let mut ids = Vec::new();
        for (url, haystack) in &self.haystacks {
            if needles.iter().any(|n| haystack.contains(n.as_str())) {
                if let Some(citation) = self.by_url.get(url) {
                    if !ids.contains(&citation.id) {
                        ids.push(citation.id.clone());
                    }
                }
            }
        }
        ids
    }

    /// The citations referenced by `used`, in batch order.
    fn take_used(mut self, used: &BTreeSet<CitationId>) -> Vec<Citation> {
        self.order
            .iter()
            .filter_map(|url| self.by_url.remove(url))
            .filter(|c| used.contains(&c.id))
            .collect()
    }
}

// ── Implementation ─────────────────────────────────────────────────────────

impl LlmExtractionStage {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    fn build_input(topic: &str, batch: &SearchBatch, known_concepts: &[String]) -> Value {
        let results: Vec<Value> = batch
            .results
            .iter()
            .map(|r| json!({ "title": r.title, "url": r.url, "snippet": r.snippet }))
            .collect();

        json!({
            "topic": topic,
            "query": batch.query,
            "known_concepts": known_concepts,
            "results": results,
        })
    }

    fn parse_concept(
        item: Value,
        sources: &BatchSources,
        warnings: &mut Vec<String>,
    ) -> Option<Concept> {
        let llm_concept: LlmConcept = match serde_json::from_value(item) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed concept");
                warnings.push(format!("malformed concept skipped: {e}"));
                return None;
            }
        };

        let (name, paren_alias) = split_parenthetical(&llm_concept.name);
        if name.is_empty() {
            warnings.push("concept with blank name skipped".to_string());
            return None;
        }

        let mut concept = Concept::new(
            &name,
            ConceptType::parse(&llm_concept.concept_type),
            llm_concept.description,
        );
        if let Some(alias) = paren_alias {
            concept.add_alias(&alias);
        }
        for alias in &llm_concept.aliases {
            concept.add_alias(alias);
        }

        if llm_concept.source_urls.is_empty() {
            let names = std::iter::once(&concept.name).chain(concept.aliases.iter());
            concept.citations.extend(sources.mentioning(names));
        } else {
            for url in &llm_concept.source_urls {
                match sources.lookup(url) {
                    Some(id) => {
                        concept.citations.insert(id);
                    }
                    None => {
                        tracing::warn!(concept = %concept.name, %url, "Dropping concept citation outside the batch");
                        warnings.push(format!(
                            "concept '{}' cited '{url}', which is not in the batch; citation dropped",
                            concept.name
                        ));
                    }
                }
            }
        }

        if let Some(score) = llm_concept.relevance_score {
            concept.relevance_score = score.clamp(0.0, 1.0);
        }
        concept.technical_details = non_blank(llm_concept.technical_details);
        concept.implementation_notes = non_blank(llm_concept.implementation_notes);
        concept.key_components = llm_concept.key_components;
        concept.use_cases = llm_concept.use_cases;

        Some(concept)
    }

    /// Parse one fact. `Err` means the fact cited a URL outside the batch.
    fn parse_fact(
        item: Value,
        sources: &BatchSources,
        warnings: &mut Vec<String>,
    ) -> Result<Option<Relationship>> {
        let llm_fact: LlmFact = match serde_json::from_value(item) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed fact");
                warnings.push(format!("malformed fact skipped: {e}"));
                return Ok(None);
            }
        };

        let (source, _) = split_parenthetical(&llm_fact.source);
        let (target, _) = split_parenthetical(&llm_fact.target);
        if source.is_empty() || target.is_empty() {
            warnings.push("fact with blank endpoint skipped".to_string());
            return Ok(None);
        }
        if llm_fact.source_urls.is_empty() {
            tracing::warn!(%source, %target, "Skipping fact without citations");
            warnings.push(format!("fact '{source}' -> '{target}' has no citations; skipped"));
            return Ok(None);
        }

        let mut citations = Vec::with_capacity(llm_fact.source_urls.len());
        for url in &llm_fact.source_urls {
            match sources.lookup(url) {
                Some(id) => citations.push(id),
                None => return Err(RkgError::CitationIntegrity { url: url.clone() }),
            }
        }

        let relation_type = RelationType::parse_lenient(&llm_fact.relation_type);
        let mut fact = Relationship::fact(&source, &target, relation_type, citations)
            .with_confidence(llm_fact.confidence);
        if let Some(description) = llm_fact.description.filter(|d| !d.trim().is_empty()) {
            fact = fact.with_description(description.trim());
        }
        Ok(Some(fact))
    }

    fn parse_extraction(raw: &str, batch: &SearchBatch) -> Result<ExtractionOutcome> {
        let mut warnings = Vec::new();
        let sources = BatchSources::new(batch, &mut warnings);

        let mut map = parse_json_object(raw)?;
        let concept_items = take_array(&mut map, "concepts")?;
        let fact_items = take_array(&mut map, "facts")?;

        let concepts: Vec<Concept> = concept_items
            .into_iter()
            .filter_map(|item| Self::parse_concept(item, &sources, &mut warnings))
            .collect();

        let mut facts = Vec::with_capacity(fact_items.len());
        let mut violation = None;
        for item in fact_items {
            match Self::parse_fact(item, &sources, &mut warnings) {
                Ok(Some(fact)) => facts.push(fact),
                Ok(None) => {}
                Err(e) => {
                    violation = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = violation {
            tracing::warn!(
                query_index = batch.query_index,
                error = %e,
                discarded = facts.len(),
                "Discarding all facts from batch"
            );
            warnings.push(format!("{e}; facts from query '{}' discarded", batch.query));
            facts.clear();
        }

        let used: BTreeSet<CitationId> = concepts
            .iter()
            .flat_map(|c| c.citations.iter())
            .chain(facts.iter().flat_map(|f| f.citations.iter()))
            .cloned()
            .collect();
        let citations = sources.take_used(&used);

        tracing::info!(
            query_index = batch.query_index,
            concepts = concepts.len(),
            facts = facts.len(),
            citations = citations.len(),
            "Parsed extraction results"
        );

        Ok(ExtractionOutcome {
            citations,
            concepts,
            facts,
            warnings,
        })
    }
}

#[async_trait]
impl ExtractionStage for LlmExtractionStage {
    async fn extract(
        &self,
        topic: &str,
        batch: &SearchBatch,
        known_concepts: &[String],
    ) -> Result<ExtractionOutcome> {
        if batch.results.is_empty() {
            return Ok(ExtractionOutcome::default());
        }

        tracing::info!(
            query_index = batch.query_index,
            results = batch.results.len(),
            "Extracting from search batch"
        );

        let input = Self::build_input(topic, batch, known_concepts);
        let raw = self
            .retry
            .run("entity_extraction", || {
                self.llm.complete(PromptKind::EntityExtraction, &input)
            })
            .await?;

        Self::parse_extraction(&raw, batch)
    }
}
