use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use rkg_core::canonical::{canonical_name, concept_key};
use rkg_core::concept::Concept;
use rkg_core::error::{Result, RkgError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(String),
    /// Merged into the existing concept with this canonical name.
    Merged(String),
}

impl UpsertOutcome {
    pub fn name(&self) -> &str {
        match self {
            UpsertOutcome::Inserted(name) | UpsertOutcome::Merged(name) => name,
        }
    }
}

/// Owns every concept of a run, keyed by case-folded canonical name, plus an alias index
/// so that a lookup by any known alias lands on the same record. Each record keeps the
/// display form of its name as first seen.
#[derive(Debug, Clone, Default)]
pub struct ConceptRegistry {
    concepts: IndexMap<String, Concept>,
    /// alias key -> owning concept key
    aliases: HashMap<String, String>,
}

impl ConceptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new concept or merge it into the concept its name (or alias) resolves to.
    pub fn upsert(&mut self, mut concept: Concept) -> Result<UpsertOutcome> {
        concept.name = canonical_name(&concept.name);
        if concept.name.is_empty() {
            return Err(RkgError::InvalidConcept("concept name is empty".into()));
        }

        if let Some(owner) = self.resolve_key(&concept.name) {
            let Some(existing) = self.concepts.get_mut(&owner) else {
                return Err(RkgError::Internal(format!("alias index points at missing '{owner}'")));
            };
            existing.absorb(concept);
            let name = existing.name.clone();
            self.index_aliases(&owner);
            debug!(concept = %name, "Merged concept mention");
            return Ok(UpsertOutcome::Merged(name));
        }

        let key = concept_key(&concept.name);
        let name = concept.name.clone();
        // The new name may shadow a dangling alias entry; canonical names always win.
        self.aliases.remove(&key);
        self.concepts.insert(key.clone(), concept);
        self.index_aliases(&key);
        Ok(UpsertOutcome::Inserted(name))
    }

    /// Fold the concept `absorbed` into `survivor`. The absorbed name becomes an alias of
    /// the survivor and its record is removed. Returns the removed concept's name, or
    /// `None` when both names already resolve to the same concept.
    ///
    /// Relationships are not touched here; see `KnowledgeGraph::merge_alias`.
    pub fn merge_alias(&mut self, survivor: &str, absorbed: &str) -> Result<Option<String>> {
        let survivor = self
            .resolve_key(survivor)
            .ok_or_else(|| RkgError::UnknownConcept(survivor.to_string()))?;
        let absorbed = self
            .resolve_key(absorbed)
            .ok_or_else(|| RkgError::UnknownConcept(absorbed.to_string()))?;

        if survivor == absorbed {
            return Ok(None);
        }

        let record = self
            .concepts
            .shift_remove(&absorbed)
            .ok_or_else(|| RkgError::Internal(format!("alias index points at missing '{absorbed}'")))?;
        let removed = record.name.clone();

        for owner in self.aliases.values_mut() {
            if *owner == absorbed {
                *owner = survivor.clone();
            }
        }
        self.aliases.insert(absorbed, survivor.clone());

        if let Some(target) = self.concepts.get_mut(&survivor) {
            target.absorb(record);
        }
        self.index_aliases(&survivor);

        Ok(Some(removed))
    }

    /// Resolve a name or alias, in any casing, to the display name of its concept.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.resolve_key(name)
            .and_then(|key| self.concepts.get(&key))
            .map(|concept| concept.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Concept> {
        self.resolve_key(name).and_then(|key| self.concepts.get(&key))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve_key(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Display names in first-insertion order.
    pub fn names(&self) -> Vec<String> {
        self.concepts.values().map(|c| c.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.values()
    }

    fn resolve_key(&self, name: &str) -> Option<String> {
        let key = concept_key(name);
        if self.concepts.contains_key(&key) {
            return Some(key);
        }
        self.aliases.get(&key).cloned()
    }

    fn index_aliases(&mut self, owner: &str) {
        let Some(concept) = self.concepts.get(owner) else {
            return;
        };
        for alias in &concept.aliases {
            let key = concept_key(alias);
            if key != owner && self.concepts.contains_key(&key) {
                warn!(
                    alias = %alias,
                    owner = %concept.name,
                    "Alias names another concept; not merging implicitly"
                );
                continue;
            }
            match self.aliases.get(&key) {
                Some(existing) if existing != owner => {
                    warn!(
                        alias = %alias,
                        owner = %concept.name,
                        existing_owner = %existing,
                        "Alias already claimed by another concept"
                    );
                }
                Some(_) => {}
                None => {
                    self.aliases.insert(key, owner.to_string());
                }
            }
        }
    }
}

impl Serialize for ConceptRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.concepts.values())
    }
}

#[cfg(test)]
mod tests {
    use rkg_core::citation::CitationId;
    use rkg_core::concept::ConceptType;

    use super::*;

    fn cite(path: &str) -> CitationId {
        CitationId::for_url(&format!("https://a.example/{path}")).unwrap()
    }

    #[test]
    fn test_upsert_inserts_then_merges() {
        let mut registry = ConceptRegistry::new();
        let first = registry
            .upsert(Concept::new("message passing", ConceptType::Method, "short").with_citation(cite("1")))
            .unwrap();
        let second = registry
            .upsert(
                Concept::new("Message  Passing", ConceptType::Other, "a longer description")
                    .with_citation(cite("2"))
                    .with_alias("MP"),
            )
            .unwrap();

        assert_eq!(first, UpsertOutcome::Inserted("Message Passing".into()));
        assert_eq!(second, UpsertOutcome::Merged("Message Passing".into()));
        assert_eq!(registry.len(), 1);

        let concept = registry.get("message passing").unwrap();
        assert_eq!(concept.concept_type, ConceptType::Method);
        assert_eq!(concept.description, "a longer description");
        assert_eq!(concept.citations.len(), 2);
        assert_eq!(registry.resolve("mp"), Some("Message Passing"));
        assert_eq!(registry.resolve("MP"), Some("Message Passing"));
    }

    #[test]
    fn test_case_variants_share_one_record() {
        let mut registry = ConceptRegistry::new();
        registry
            .upsert(Concept::new("MESSAGE PASSING", ConceptType::Method, "").with_citation(cite("1")))
            .unwrap();
        let outcome = registry
            .upsert(Concept::new("message passing", ConceptType::Method, "").with_citation(cite("2")))
            .unwrap();
        registry.upsert(Concept::new("GNN", ConceptType::Method, "")).unwrap();

        assert_eq!(outcome, UpsertOutcome::Merged("MESSAGE PASSING".into()));
        assert_eq!(registry.names(), vec!["MESSAGE PASSING", "GNN"]);
        assert_eq!(registry.resolve("gnn"), Some("GNN"));
        assert_eq!(registry.resolve("Message Passing"), Some("MESSAGE PASSING"));

        let concept = registry.get("message passing").unwrap();
        assert_eq!(concept.citations.len(), 2);
        assert!(concept.aliases.is_empty());
    }

    #[test]
    fn test_reupserting_identical_concept_is_idempotent() {
        let mut registry = ConceptRegistry::new();
        let concept = Concept::new("GNN", ConceptType::Method, "Graph neural network")
            .with_alias("Graph Neural Network")
            .with_citation(cite("x"));
        registry.upsert(concept.clone()).unwrap();
        registry.upsert(concept.clone()).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("GNN").unwrap(), &concept);
    }

    #[test]
    fn test_upsert_by_alias_merges_into_owner() {
        let mut registry = ConceptRegistry::new();
        registry
            .upsert(Concept::new("Graph Neural Network", ConceptType::Method, "").with_alias("GNN"))
            .unwrap();
        let outcome = registry
            .upsert(Concept::new("GNN", ConceptType::Other, "Learns on graphs").with_citation(cite("g")))
            .unwrap();

        assert_eq!(outcome, UpsertOutcome::Merged("Graph Neural Network".into()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("GNN").unwrap().description, "Learns on graphs");
    }

    #[test]
    fn test_alias_colliding_with_canonical_name_is_not_merged() {
        let mut registry = ConceptRegistry::new();
        registry.upsert(Concept::new("GNN", ConceptType::Method, "")).unwrap();
        registry
            .upsert(Concept::new("Graph Neural Network", ConceptType::Method, "").with_alias("GNN"))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("GNN"), Some("GNN"));
    }

    #[test]
    fn test_upsert_rejects_blank_name() {
        let mut registry = ConceptRegistry::new();
        let result = registry.upsert(Concept::new("   ", ConceptType::Other, ""));
        assert!(matches!(result, Err(RkgError::InvalidConcept(_))));
    }

    #[test]
    fn test_merge_alias_removes_absorbed_record() {
        let mut registry = ConceptRegistry::new();
        registry
            .upsert(Concept::new("Graph Convolutional Network", ConceptType::Method, "GCN").with_citation(cite("a")))
            .unwrap();
        registry
            .upsert(
                Concept::new("GCN-ish", ConceptType::Other, "")
                    .with_citation(cite("b"))
                    .with_alias("Graph Conv"),
            )
            .unwrap();

        let removed = registry
            .merge_alias("Graph Convolutional Network", "gCN-ish")
            .unwrap();
        assert_eq!(removed.as_deref(), Some("GCN-ish"));
        assert_eq!(registry.len(), 1);

        let survivor = registry.get("GCN-ish").unwrap();
        assert_eq!(survivor.name, "Graph Convolutional Network");
        assert_eq!(survivor.citations.len(), 2);
        assert!(survivor.aliases.contains("GCN-ish"));
        assert_eq!(registry.resolve("Graph Conv"), Some("Graph Convolutional Network"));
    }

    #[test]
    fn test_merge_alias_unknown_and_noop() {
        let mut registry = ConceptRegistry::new();
        registry
            .upsert(Concept::new("Transformer", ConceptType::Method, "").with_alias("TF"))
            .unwrap();
        assert!(matches!(
            registry.merge_alias("Transformer", "Ghost"),
            Err(RkgError::UnknownConcept(_))
        ));
        assert_eq!(registry.merge_alias("Transformer", "TF").unwrap(), None);
    }

    #[test]
    fn test_names_keep_insertion_order() {
        let mut registry = ConceptRegistry::new();
        for name in ["Zeta", "Alpha", "Mu"] {
            registry.upsert(Concept::new(name, ConceptType::Other, "")).unwrap();
        }
        assert_eq!(registry.names(), vec!["Zeta", "Alpha", "Mu"]);
    }
}
