mod citations;
mod graph;
mod registry;
mod relationships;

pub use citations::CitationStore;
pub use graph::{KnowledgeGraph, ResearchGraph, RunMetadata};
pub use registry::{ConceptRegistry, UpsertOutcome};
pub use relationships::{AddOutcome, RelationshipSet};
