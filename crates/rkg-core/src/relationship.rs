use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_name, concept_key};
use crate::citation::CitationId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    IsA,
    Uses,
    PartOf,
    DevelopedBy,
    AppliedTo,
    Improves,
    RelatedTo,
}

impl RelationType {
    /// Lenient parse of a model-supplied relation label. `None` for labels with no mapping.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        let relation = match normalized.as_str() {
            "is_a" | "isa" | "type_of" | "kind_of" | "subclass_of" => RelationType::IsA,
            "uses" | "use" | "utilizes" | "relies_on" | "depends_on" => RelationType::Uses,
            "part_of" | "component_of" | "member_of" => RelationType::PartOf,
            "developed_by" | "created_by" | "invented_by" | "proposed_by" => {
                RelationType::DevelopedBy
            }
            "applied_to" | "used_in" | "applies_to" => RelationType::AppliedTo,
            "improves" | "extends" | "improves_on" | "enhances" => RelationType::Improves,
            "related_to" | "associated_with" => RelationType::RelatedTo,
            _ => return None,
        };
        Some(relation)
    }

    /// Like [`RelationType::parse`], falling back to `RelatedTo` with a warning.
    pub fn parse_lenient(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            tracing::warn!(relation_type = %s, "Unknown relation type, defaulting to related_to");
            RelationType::RelatedTo
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::IsA => "is_a",
            RelationType::Uses => "uses",
            RelationType::PartOf => "part_of",
            RelationType::DevelopedBy => "developed_by",
            RelationType::AppliedTo => "applied_to",
            RelationType::Improves => "improves",
            RelationType::RelatedTo => "related_to",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Derived from and citing at least one search result.
    Fact,
    /// Derived by reasoning over accumulated facts; never cited.
    Inference,
}

/// Dedup key of an edge. Endpoints are stored as [`concept_key`]s so case variants of
/// the same concept collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipKey {
    pub source: String,
    pub target: String,
    pub relation_type: RelationType,
    pub kind: RelationKind,
}

impl RelationshipKey {
    pub fn new(source: &str, target: &str, relation_type: RelationType, kind: RelationKind) -> Self {
        Self {
            source: concept_key(source),
            target: concept_key(target),
            relation_type,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub relation_type: RelationType,
    pub kind: RelationKind,
    pub citations: BTreeSet<CitationId>,
    pub description: Option<String>,
    pub confidence: f64,
}

impl Relationship {
    pub fn fact(
        source: &str,
        target: &str,
        relation_type: RelationType,
        citations: impl IntoIterator<Item = CitationId>,
    ) -> Self {
        Self {
            source: canonical_name(source),
            target: canonical_name(target),
            relation_type,
            kind: RelationKind::Fact,
            citations: citations.into_iter().collect(),
            description: None,
            confidence: 1.0,
        }
    }

    pub fn inference(source: &str, target: &str, relation_type: RelationType) -> Self {
        Self {
            source: canonical_name(source),
            target: canonical_name(target),
            relation_type,
            kind: RelationKind::Inference,
            citations: BTreeSet::new(),
            description: None,
            confidence: 0.8,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = if description.trim().is_empty() {
            None
        } else {
            Some(description.trim().to_string())
        };
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn key(&self) -> RelationshipKey {
        RelationshipKey::new(&self.source, &self.target, self.relation_type, self.kind)
    }

    pub fn is_fact(&self) -> bool {
        self.kind == RelationKind::Fact
    }

    pub fn is_self_loop(&self) -> bool {
        concept_key(&self.source) == concept_key(&self.target)
    }

    /// Whether `name` is either endpoint, compared by concept key.
    pub fn touches(&self, name: &str) -> bool {
        let key = concept_key(name);
        concept_key(&self.source) == key || concept_key(&self.target) == key
    }

    /// Whether the citation set matches the kind: facts cite, inferences do not.
    pub fn citations_consistent(&self) -> bool {
        match self.kind {
            RelationKind::Fact => !self.citations.is_empty(),
            RelationKind::Inference => self.citations.is_empty(),
        }
    }
}
