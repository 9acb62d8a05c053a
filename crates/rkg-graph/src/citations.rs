use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use rkg_core::citation::{Citation, CitationId};
use rkg_core::error::Result;

/// Append-only registry of cited sources, keyed by normalized-URL id.
#[derive(Debug, Clone, Default)]
pub struct CitationStore {
    citations: IndexMap<CitationId, Citation>,
}

impl CitationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a citation. A URL that is already known keeps its original record and
    /// the existing id is returned.
    pub fn insert(&mut self, citation: Citation) -> CitationId {
        let id = citation.id.clone();
        self.citations.entry(id.clone()).or_insert(citation);
        id
    }

    pub fn record(&mut self, url: &str, title: &str, snippet: Option<String>) -> Result<CitationId> {
        Ok(self.insert(Citation::new(url, title, snippet)?))
    }

    pub fn get(&self, id: &CitationId) -> Option<&Citation> {
        self.citations.get(id)
    }

    pub fn contains(&self, id: &CitationId) -> bool {
        self.citations.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.citations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    /// Citations in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &Citation> {
        self.citations.values()
    }

    /// Look up a set of ids, skipping any that are unknown.
    pub fn resolve<'a>(
        &'a self,
        ids: impl IntoIterator<Item = &'a CitationId>,
    ) -> Vec<&'a Citation> {
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }
}

impl Serialize for CitationStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.citations.values())
    }
}
