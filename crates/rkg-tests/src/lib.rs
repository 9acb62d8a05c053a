//! Scripted collaborators for driving the research workflow without network access.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use rkg_core::error::{Result, RkgError};
use rkg_core::llm::{LanguageModel, PromptKind};
use rkg_core::search::{SearchProvider, SearchResult};

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Search provider that answers each query from a per-query script. A query with no
/// remaining replies fails transiently.
#[derive(Default)]
pub struct ScriptedSearch {
    replies: Mutex<HashMap<String, VecDeque<Result<Vec<SearchResult>>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, query: &str, reply: Result<Vec<SearchResult>>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(query.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn results(self, query: &str, results: Vec<SearchResult>) -> Self {
        self.reply(query, Ok(results))
    }

    pub fn calls_for(&self, query: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|q| *q == query).count()
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<SearchResult>> {
        self.calls.lock().unwrap().push(query.to_string());
        self.replies
            .lock()
            .unwrap()
            .get_mut(query)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(RkgError::SearchTransient(format!(
                    "no scripted reply for '{query}'"
                )))
            })
    }
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

/// Language model that replays scripted text. Extraction replies are keyed by the batch
/// query so concurrent extraction calls get deterministic answers. Every input is kept
/// for later inspection.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<HashMap<(PromptKind, String), VecDeque<Result<String>>>>,
    calls: Mutex<Vec<(PromptKind, Value)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queries(self, reply: &str) -> Self {
        self.push(PromptKind::QueryGeneration, "", Ok(reply.to_string()))
    }

    pub fn extraction(self, query: &str, reply: &str) -> Self {
        self.push(PromptKind::EntityExtraction, query, Ok(reply.to_string()))
    }

    pub fn inference(self, reply: &str) -> Self {
        self.push(PromptKind::RelationshipInference, "", Ok(reply.to_string()))
    }

    pub fn failure(self, kind: PromptKind, key: &str, error: RkgError) -> Self {
        self.push(kind, key, Err(error))
    }

    pub fn calls(&self, kind: PromptKind) -> usize {
        self.inputs(kind).len()
    }

    /// Inputs of every call of `kind`, in call order.
    pub fn inputs(&self, kind: PromptKind) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, input)| input.clone())
            .collect()
    }

    /// Inputs of the extraction calls made for `query`.
    pub fn extraction_inputs(&self, query: &str) -> Vec<Value> {
        self.inputs(PromptKind::EntityExtraction)
            .into_iter()
            .filter(|input| input["query"] == query)
            .collect()
    }

    fn push(self, kind: PromptKind, key: &str, reply: Result<String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry((kind, key.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    fn key_for(kind: PromptKind, input: &Value) -> String {
        match kind {
            PromptKind::EntityExtraction => input["query"].as_str().unwrap_or_default().to_string(),
            _ => String::new(),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, kind: PromptKind, input: &Value) -> Result<String> {
        self.calls.lock().unwrap().push((kind, input.clone()));
        let key = Self::key_for(kind, input);
        self.replies
            .lock()
            .unwrap()
            .get_mut(&(kind, key.clone()))
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(RkgError::MalformedOutput(format!(
                    "no scripted {kind} reply for '{key}'"
                )))
            })
    }
}
