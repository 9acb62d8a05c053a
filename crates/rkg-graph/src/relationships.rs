use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use tracing::warn;

use rkg_core::canonical::concept_key;
use rkg_core::error::{Result, RkgError};
use rkg_core::relationship::{RelationKind, RelationType, Relationship, RelationshipKey};

use crate::registry::ConceptRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    /// Same (source, target, label, kind) already stored; citations were unioned.
    Merged,
    /// A fact replaced an inference over the same (source, target, label).
    SupersededInference,
    /// An inference was dropped because the same edge is already a fact.
    ShadowedByFact,
}

/// Directed, typed edges between concepts. An edge is never both a fact and an inference.
#[derive(Debug, Clone, Default)]
pub struct RelationshipSet {
    edges: IndexMap<RelationshipKey, Relationship>,
}

impl RelationshipSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge. Endpoints are resolved through `concepts` (so aliases work) and must
    /// exist; citations must match the kind.
    pub fn add(&mut self, mut relationship: Relationship, concepts: &ConceptRegistry) -> Result<AddOutcome> {
        let source = concepts.resolve(&relationship.source).map(str::to_string);
        let target = concepts.resolve(&relationship.target).map(str::to_string);
        let (source, target) = match (source, target) {
            (Some(s), Some(t)) => (s, t),
            (None, _) => {
                return Err(RkgError::DanglingReference {
                    missing: relationship.source.clone(),
                    from: relationship.source,
                    to: relationship.target,
                })
            }
            (_, None) => {
                return Err(RkgError::DanglingReference {
                    missing: relationship.target.clone(),
                    from: relationship.source,
                    to: relationship.target,
                })
            }
        };
        relationship.source = source;
        relationship.target = target;

        if !relationship.citations_consistent() {
            return Err(RkgError::InvalidRelationship(match relationship.kind {
                RelationKind::Fact => format!(
                    "fact {} -{}-> {} has no citations",
                    relationship.source, relationship.relation_type, relationship.target
                ),
                RelationKind::Inference => format!(
                    "inference {} -{}-> {} carries citations",
                    relationship.source, relationship.relation_type, relationship.target
                ),
            }));
        }

        if relationship.is_self_loop() {
            warn!(
                concept = %relationship.source,
                relation_type = %relationship.relation_type,
                "Self-loop relationship asserted; keeping it but flagging as anomaly"
            );
        }

        Ok(self.insert_resolved(relationship))
    }

    fn insert_resolved(&mut self, relationship: Relationship) -> AddOutcome {
        let mut outcome = AddOutcome::Inserted;
        match relationship.kind {
            RelationKind::Inference => {
                if self
                    .fact(&relationship.source, &relationship.target, relationship.relation_type)
                    .is_some()
                {
                    return AddOutcome::ShadowedByFact;
                }
            }
            RelationKind::Fact => {
                let shadow = RelationshipKey {
                    kind: RelationKind::Inference,
                    ..relationship.key()
                };
                if self.edges.shift_remove(&shadow).is_some() {
                    outcome = AddOutcome::SupersededInference;
                }
            }
        }

        match self.edges.get_mut(&relationship.key()) {
            Some(existing) => {
                existing.citations.extend(relationship.citations);
                if existing.description.is_none() {
                    existing.description = relationship.description;
                }
                existing.confidence = existing.confidence.max(relationship.confidence);
                AddOutcome::Merged
            }
            None => {
                self.edges.insert(relationship.key(), relationship);
                outcome
            }
        }
    }

    /// Re-key every edge that names `from` so it names `to` instead. Edges that become
    /// duplicates are merged; edges that collapse into self-loops are dropped. Returns the
    /// number of edges that were re-pointed (including merged and dropped ones).
    pub fn repoint(&mut self, from: &str, to: &str) -> usize {
        let edges = std::mem::take(&mut self.edges);
        let from_key = concept_key(from);
        let mut repointed = 0;

        for (_, mut edge) in edges {
            if edge.touches(from) {
                repointed += 1;
                if concept_key(&edge.source) == from_key {
                    edge.source = to.to_string();
                }
                if concept_key(&edge.target) == from_key {
                    edge.target = to.to_string();
                }
                if edge.is_self_loop() {
                    warn!(
                        concept = %to,
                        relation_type = %edge.relation_type,
                        "Dropping edge that collapsed into a self-loop after alias merge"
                    );
                    continue;
                }
            }
            self.insert_resolved(edge);
        }

        repointed
    }

    pub fn fact(&self, source: &str, target: &str, relation_type: RelationType) -> Option<&Relationship> {
        self.edges
            .get(&RelationshipKey::new(source, target, relation_type, RelationKind::Fact))
    }

    pub fn get(&self, key: &RelationshipKey) -> Option<&Relationship> {
        self.edges.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.edges.values()
    }

    pub fn facts(&self) -> impl Iterator<Item = &Relationship> {
        self.of_kind(RelationKind::Fact)
    }

    pub fn inferences(&self) -> impl Iterator<Item = &Relationship> {
        self.of_kind(RelationKind::Inference)
    }

    pub fn of_kind(&self, kind: RelationKind) -> impl Iterator<Item = &Relationship> {
        self.edges.values().filter(move |r| r.kind == kind)
    }

    /// Edges with `name` at either end.
    pub fn touching<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Relationship> + 'a {
        self.edges.values().filter(move |r| r.touches(name))
    }

    /// Concepts connected to `name` by any edge, in first-seen order.
    pub fn neighbors<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        let key = concept_key(name);
        let mut out: Vec<&'a str> = Vec::new();
        for r in self.touching(name) {
            let other = if concept_key(&r.source) == key { &r.target } else { &r.source };
            if concept_key(other) != key && !out.contains(&other.as_str()) {
                out.push(other);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl Serialize for RelationshipSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.edges.values())
    }
}

#[cfg(test)]
mod tests {
    use rkg_core::citation::CitationId;
    use rkg_core::concept::{Concept, ConceptType};

    use super::*;

    fn cite(path: &str) -> CitationId {
        CitationId::for_url(&format!("https://a.example/{path}")).unwrap()
    }

    fn registry(names: &[&str]) -> ConceptRegistry {
        let mut registry = ConceptRegistry::new();
        for name in names {
            registry.upsert(Concept::new(name, ConceptType::Other, "")).unwrap();
        }
        registry
    }

    #[test]
    fn test_adding_same_fact_twice_stores_one_edge() {
        let concepts = registry(&["GNN", "Message Passing"]);
        let mut set = RelationshipSet::new();
        let fact = Relationship::fact("GNN", "Message Passing", RelationType::Uses, [cite("x")]);

        assert_eq!(set.add(fact.clone(), &concepts).unwrap(), AddOutcome::Inserted);
        assert_eq!(set.add(fact, &concepts).unwrap(), AddOutcome::Merged);
        assert_eq!(set.len(), 1);
        assert_eq!(set.facts().next().unwrap().citations.len(), 1);
    }

    #[test]
    fn test_duplicate_fact_unions_citations() {
        let concepts = registry(&["GNN", "Message Passing"]);
        let mut set = RelationshipSet::new();
        set.add(Relationship::fact("GNN", "Message Passing", RelationType::Uses, [cite("x")]), &concepts)
            .unwrap();
        set.add(Relationship::fact("GNN", "Message Passing", RelationType::Uses, [cite("y")]), &concepts)
            .unwrap();
        let fact = set.fact("GNN", "Message Passing", RelationType::Uses).unwrap();
        assert_eq!(fact.citations.len(), 2);
    }

    #[test]
    fn test_rejects_dangling_endpoints() {
        let concepts = registry(&["GNN"]);
        let mut set = RelationshipSet::new();
        let err = set
            .add(Relationship::inference("GNN", "Ghost", RelationType::Uses), &concepts)
            .unwrap_err();
        match err {
            RkgError::DanglingReference { missing, .. } => assert_eq!(missing, "Ghost"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(set.is_empty());
    }

    #[test]
    fn test_rejects_inconsistent_citations() {
        let concepts = registry(&["A", "B"]);
        let mut set = RelationshipSet::new();
        assert!(matches!(
            set.add(Relationship::fact("A", "B", RelationType::Uses, []), &concepts),
            Err(RkgError::InvalidRelationship(_))
        ));

        let mut inference = Relationship::inference("A", "B", RelationType::Uses);
        inference.citations.insert(cite("x"));
        assert!(set.add(inference, &concepts).is_err());
    }

    #[test]
    fn test_inference_shadowed_by_fact() {
        let concepts = registry(&["A", "B"]);
        let mut set = RelationshipSet::new();
        set.add(Relationship::fact("A", "B", RelationType::Uses, [cite("x")]), &concepts)
            .unwrap();
        let outcome = set
            .add(Relationship::inference("A", "B", RelationType::Uses), &concepts)
            .unwrap();
        assert_eq!(outcome, AddOutcome::ShadowedByFact);
        assert_eq!(set.len(), 1);
        assert_eq!(set.inferences().count(), 0);
    }

    #[test]
    fn test_fact_supersedes_inference() {
        let concepts = registry(&["A", "B"]);
        let mut set = RelationshipSet::new();
        set.add(Relationship::inference("A", "B", RelationType::IsA), &concepts)
            .unwrap();
        let outcome = set
            .add(Relationship::fact("A", "B", RelationType::IsA, [cite("x")]), &concepts)
            .unwrap();
        assert_eq!(outcome, AddOutcome::SupersededInference);
        assert_eq!(set.len(), 1);
        assert!(set.iter().all(Relationship::is_fact));
    }

    #[test]
    fn test_endpoints_resolve_through_aliases() {
        let mut concepts = ConceptRegistry::new();
        concepts
            .upsert(Concept::new("Graph Neural Network", ConceptType::Method, "").with_alias("GNN"))
            .unwrap();
        concepts.upsert(Concept::new("Message Passing", ConceptType::Method, "")).unwrap();

        let mut set = RelationshipSet::new();
        set.add(Relationship::fact("gnn", "message passing", RelationType::Uses, [cite("x")]), &concepts)
            .unwrap();
        let outcome = set
            .add(Relationship::fact("GNN", "MESSAGE PASSING", RelationType::Uses, [cite("y")]), &concepts)
            .unwrap();

        assert_eq!(outcome, AddOutcome::Merged);
        assert_eq!(set.len(), 1);
        let fact = set
            .fact("Graph Neural Network", "Message Passing", RelationType::Uses)
            .unwrap();
        assert_eq!(fact.source, "Graph Neural Network");
        assert_eq!(fact.citations.len(), 2);
        assert!(set.fact("graph neural network", "message passing", RelationType::Uses).is_some());
    }

    #[test]
    fn test_case_variant_endpoints_are_not_dangling() {
        let concepts = registry(&["MESSAGE PASSING", "message passing", "GNN"]);
        assert_eq!(concepts.len(), 2);

        let mut set = RelationshipSet::new();
        set.add(Relationship::fact("gnn", "message passing", RelationType::Uses, [cite("x")]), &concepts)
            .unwrap();
        let fact = set.iter().next().unwrap();
        assert_eq!(fact.source, "GNN");
        assert_eq!(fact.target, "MESSAGE PASSING");
    }

    #[test]
    fn test_repoint_merges_and_drops_self_loops() {
        let concepts = registry(&["Graph Convolutional Network", "GCN-ish", "Spectral Filter", "Paper"]);
        let mut set = RelationshipSet::new();
        set.add(Relationship::fact("GCN-ish", "Spectral Filter", RelationType::Uses, [cite("a")]), &concepts)
            .unwrap();
        set.add(
            Relationship::fact("Graph Convolutional Network", "Spectral Filter", RelationType::Uses, [cite("b")]),
            &concepts,
        )
        .unwrap();
        set.add(Relationship::inference("Paper", "GCN-ish", RelationType::RelatedTo), &concepts)
            .unwrap();
        set.add(
            Relationship::inference("GCN-ish", "Graph Convolutional Network", RelationType::IsA),
            &concepts,
        )
        .unwrap();

        let repointed = set.repoint("GCN-ish", "Graph Convolutional Network");
        assert_eq!(repointed, 3);
        assert_eq!(set.len(), 2);

        let fact = set
            .fact("Graph Convolutional Network", "Spectral Filter", RelationType::Uses)
            .unwrap();
        assert_eq!(fact.citations.len(), 2);
        assert!(set
            .inferences()
            .any(|r| r.source == "Paper" && r.target == "Graph Convolutional Network"));
        assert!(set.iter().all(|r| r.source != "GCN-ish" && r.target != "GCN-ish"));
    }

    #[test]
    fn test_neighbors_lists_each_concept_once() {
        let concepts = registry(&["GNN", "Message Passing", "GCN"]);
        let mut set = RelationshipSet::new();
        set.add(Relationship::fact("GNN", "Message Passing", RelationType::Uses, [cite("a")]), &concepts)
            .unwrap();
        set.add(Relationship::inference("GNN", "Message Passing", RelationType::RelatedTo), &concepts)
            .unwrap();
        set.add(Relationship::fact("GCN", "GNN", RelationType::IsA, [cite("b")]), &concepts)
            .unwrap();

        assert_eq!(set.neighbors("GNN"), vec!["Message Passing", "GCN"]);
        assert_eq!(set.neighbors("GCN"), vec!["GNN"]);
        assert!(set.neighbors("Unknown").is_empty());
    }
}
