use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, RkgError};

/// Which pipeline step a completion request serves. Providers pick their instructions by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    QueryGeneration,
    EntityExtraction,
    RelationshipInference,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::QueryGeneration => "query_generation",
            PromptKind::EntityExtraction => "entity_extraction",
            PromptKind::RelationshipInference => "relationship_inference",
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Complete a structured request and return the raw model text, which is expected
    /// to contain a single JSON object. Retryable failures surface as
    /// `RkgError::LanguageModel`.
    async fn complete(&self, kind: PromptKind, input: &Value) -> Result<String>;
}

/// Parse model output into a JSON object, tolerating markdown code fences and leading
/// or trailing chatter around the object.
pub fn parse_json_object(raw: &str) -> Result<Map<String, Value>> {
    let cleaned = raw.trim();
    let cleaned = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => {
            return Err(RkgError::MalformedOutput(format!(
                "no JSON object in model output ({} chars)",
                raw.len()
            )))
        }
    };

    match serde_json::from_str::<Value>(cleaned) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RkgError::MalformedOutput(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
        Err(e) => {
            tracing::debug!(raw = %cleaned, error = %e, "Failed to parse model JSON");
            Err(RkgError::MalformedOutput(format!("invalid JSON: {e}")))
        }
    }
}

/// Take the array stored under `key`. A missing key is an empty list; any other
/// non-array value is malformed.
pub fn take_array(map: &mut Map<String, Value>, key: &str) -> Result<Vec<Value>> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(RkgError::MalformedOutput(format!(
            "field '{key}' should be an array, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
