use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_name, concept_key};
use crate::citation::CitationId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConceptType {
    Technology,
    Method,
    Person,
    Organization,
    Field,
    Application,
    Metric,
    Library,
    Framework,
    Project,
    Concept,
    Tool,
    Language,
    Algorithm,
    Pattern,
    Other,
}

impl ConceptType {
    /// Lenient parse of a model-supplied type label. Unknown labels map to `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "technology" | "api" | "platform" | "system" => ConceptType::Technology,
            "method" | "technique" | "approach" | "process" | "model" => ConceptType::Method,
            "person" | "researcher" | "author" => ConceptType::Person,
            "organization" | "org" | "company" | "institute" | "university" => {
                ConceptType::Organization
            }
            "field" | "domain" | "discipline" => ConceptType::Field,
            "application" | "service" | "use_case" => ConceptType::Application,
            "metric" | "measure" | "benchmark" => ConceptType::Metric,
            "library" | "lib" | "package" | "module" | "sdk" => ConceptType::Library,
            "framework" => ConceptType::Framework,
            "project" => ConceptType::Project,
            "concept" | "standard" | "principle" | "theory" => ConceptType::Concept,
            "tool" => ConceptType::Tool,
            "language" | "programming_language" => ConceptType::Language,
            "algorithm" => ConceptType::Algorithm,
            "pattern" | "architecture" | "design" => ConceptType::Pattern,
            _ => ConceptType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConceptType::Technology => "technology",
            ConceptType::Method => "method",
            ConceptType::Person => "person",
            ConceptType::Organization => "organization",
            ConceptType::Field => "field",
            ConceptType::Application => "application",
            ConceptType::Metric => "metric",
            ConceptType::Library => "library",
            ConceptType::Framework => "framework",
            ConceptType::Project => "project",
            ConceptType::Concept => "concept",
            ConceptType::Tool => "tool",
            ConceptType::Language => "language",
            ConceptType::Algorithm => "algorithm",
            ConceptType::Pattern => "pattern",
            ConceptType::Other => "other",
        }
    }
}

impl fmt::Display for ConceptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    /// Canonical display name. Its [`concept_key`] is the registry key.
    pub name: String,
    pub concept_type: ConceptType,
    pub description: String,
    pub aliases: BTreeSet<String>,
    pub citations: BTreeSet<CitationId>,
    pub relevance_score: f64,
    pub technical_details: Option<String>,
    pub implementation_notes: Option<String>,
    pub key_components: Vec<String>,
    pub use_cases: Vec<String>,
}

impl Concept {
    pub fn new(name: &str, concept_type: ConceptType, description: impl Into<String>) -> Self {
        Self {
            name: canonical_name(name),
            concept_type,
            description: description.into().trim().to_string(),
            aliases: BTreeSet::new(),
            citations: BTreeSet::new(),
            relevance_score: 0.5,
            technical_details: None,
            implementation_notes: None,
            key_components: Vec::new(),
            use_cases: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.add_alias(alias);
        self
    }

    pub fn with_citation(mut self, id: CitationId) -> Self {
        self.citations.insert(id);
        self
    }

    /// Record an alias in canonical form. Blank aliases, the concept's own name and
    /// case variants of an alias already recorded are ignored.
    pub fn add_alias(&mut self, alias: &str) {
        let alias = canonical_name(alias);
        let key = alias.to_lowercase();
        if alias.is_empty() || key == concept_key(&self.name) {
            return;
        }
        if !self.aliases.iter().any(|existing| existing.to_lowercase() == key) {
            self.aliases.insert(alias);
        }
    }

    /// Fold a later mention of the same concept into this record.
    ///
    /// Aliases and citations are unioned. The description is replaced when the incoming
    /// one is non-empty and at least as long. The type is kept unless it is still `Other`.
    pub fn absorb(&mut self, other: Concept) {
        self.add_alias(&other.name);
        for alias in &other.aliases {
            self.add_alias(alias);
        }
        self.citations.extend(other.citations);

        if !other.description.is_empty() && other.description.len() >= self.description.len() {
            self.description = other.description;
        }
        if self.concept_type == ConceptType::Other {
            self.concept_type = other.concept_type;
        }
        if other.relevance_score > self.relevance_score {
            self.relevance_score = other.relevance_score;
        }

        keep_longer(&mut self.technical_details, other.technical_details);
        keep_longer(&mut self.implementation_notes, other.implementation_notes);
        merge_unique(&mut self.key_components, other.key_components);
        merge_unique(&mut self.use_cases, other.use_cases);
    }

    /// Logseq wikilink, `[[Name]]`.
    pub fn to_wikilink(&self) -> String {
        format!("[[{}]]", self.name)
    }
}

fn keep_longer(current: &mut Option<String>, incoming: Option<String>) {
    match (current.as_ref(), incoming) {
        (None, Some(incoming)) => *current = Some(incoming),
        (Some(existing), Some(incoming)) if incoming.len() > existing.len() => {
            *current = Some(incoming)
        }
        _ => {}
    }
}

fn merge_unique(into: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !into.iter().any(|existing| existing.eq_ignore_ascii_case(&item)) {
            into.push(item);
        }
    }
}
