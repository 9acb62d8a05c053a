use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use rkg_core::citation::{Citation, CitationId};
use rkg_core::concept::Concept;
use rkg_core::error::Result;
use rkg_core::relationship::{RelationKind, Relationship};

use crate::citations::CitationStore;
use crate::registry::{ConceptRegistry, UpsertOutcome};
use crate::relationships::{AddOutcome, RelationshipSet};

/// The mutable graph under construction during a run. Only the workflow controller
/// holds one, so all mutation goes through a single owner.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    citations: CitationStore,
    concepts: ConceptRegistry,
    relationships: RelationshipSet,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_citation(&mut self, citation: Citation) -> CitationId {
        self.citations.insert(citation)
    }

    /// Upsert a concept. Citation ids not present in the citation store are dropped.
    pub fn upsert_concept(&mut self, mut concept: Concept) -> Result<UpsertOutcome> {
        self.retain_known_citations(&concept.name, &mut concept.citations);
        self.concepts.upsert(concept)
    }

    /// Add a relationship. Citation ids not present in the citation store are dropped
    /// first, so a fact whose citations are all unknown is rejected as uncited.
    pub fn add_relationship(&mut self, mut relationship: Relationship) -> Result<AddOutcome> {
        let label = format!("{} -> {}", relationship.source, relationship.target);
        self.retain_known_citations(&label, &mut relationship.citations);
        self.relationships.add(relationship, &self.concepts)
    }

    /// Operator-asserted merge of two concepts that turned out to be the same thing.
    /// Every relationship naming the absorbed concept is re-pointed to the survivor.
    pub fn merge_alias(&mut self, survivor: &str, absorbed: &str) -> Result<Option<String>> {
        let Some(removed) = self.concepts.merge_alias(survivor, absorbed)? else {
            return Ok(None);
        };
        let target = self
            .concepts
            .resolve(&removed)
            .map(str::to_string)
            .unwrap_or_else(|| survivor.to_string());
        let repointed = self.relationships.repoint(&removed, &target);
        info!(
            survivor = %target,
            absorbed = %removed,
            repointed,
            "Merged concept alias"
        );
        Ok(Some(removed))
    }

    pub fn citations(&self) -> &CitationStore {
        &self.citations
    }

    pub fn concepts(&self) -> &ConceptRegistry {
        &self.concepts
    }

    pub fn relationships(&self) -> &RelationshipSet {
        &self.relationships
    }

    pub fn finish(self, metadata: RunMetadata) -> ResearchGraph {
        ResearchGraph {
            run_id: metadata.run_id,
            topic: metadata.topic,
            created_at: Utc::now(),
            queries: metadata.queries,
            warnings: metadata.warnings,
            citations: self.citations,
            concepts: self.concepts,
            relationships: self.relationships,
        }
    }

    fn retain_known_citations(
        &self,
        owner: &str,
        ids: &mut std::collections::BTreeSet<CitationId>,
    ) {
        let before = ids.len();
        ids.retain(|id| self.citations.contains(id));
        if ids.len() != before {
            warn!(
                owner = %owner,
                dropped = before - ids.len(),
                "Dropped citation ids that are not in the citation store"
            );
        }
    }
}

/// Run facts recorded alongside the terminal graph.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub topic: String,
    pub queries: Vec<String>,
    pub warnings: Vec<String>,
}

/// Terminal, read-only snapshot of one research run.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchGraph {
    run_id: Uuid,
    topic: String,
    created_at: DateTime<Utc>,
    queries: Vec<String>,
    warnings: Vec<String>,
    citations: CitationStore,
    concepts: ConceptRegistry,
    relationships: RelationshipSet,
}

impl ResearchGraph {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn citations(&self) -> &CitationStore {
        &self.citations
    }

    pub fn concepts(&self) -> &ConceptRegistry {
        &self.concepts
    }

    pub fn relationships(&self) -> &RelationshipSet {
        &self.relationships
    }

    pub fn facts(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.of_kind(RelationKind::Fact)
    }

    pub fn inferences(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.of_kind(RelationKind::Inference)
    }

    /// Citation records behind a relationship, in id order.
    pub fn sources_of<'a>(&'a self, relationship: &'a Relationship) -> Vec<&'a Citation> {
        self.citations.resolve(&relationship.citations)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Invariant violations, if any. An empty list means the graph is consistent.
    pub fn integrity_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for concept in self.concepts.iter() {
            for id in &concept.citations {
                if !self.citations.contains(id) {
                    issues.push(format!("Concept '{}' cites unknown {id}", concept.name));
                }
            }
        }

        for rel in self.relationships.iter() {
            for endpoint in [&rel.source, &rel.target] {
                if self.concepts.resolve(endpoint) != Some(endpoint.as_str()) {
                    issues.push(format!(
                        "Relationship {} -> {} references unknown concept '{endpoint}'",
                        rel.source, rel.target
                    ));
                }
            }
            if !rel.citations_consistent() {
                issues.push(format!(
                    "Relationship {} -{}-> {} has citations inconsistent with its kind",
                    rel.source, rel.relation_type, rel.target
                ));
            }
            for id in &rel.citations {
                if !self.citations.contains(id) {
                    issues.push(format!(
                        "Relationship {} -> {} cites unknown {id}",
                        rel.source, rel.target
                    ));
                }
            }
        }

        issues
    }
}
