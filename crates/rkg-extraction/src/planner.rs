use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use rkg_core::error::{Result, RkgError};
use rkg_core::llm::{parse_json_object, take_array, LanguageModel, PromptKind};
use rkg_core::retry::RetryPolicy;
use rkg_core::stage::QueryPlanner;

/// Aspects every query set should try to cover.
const FACETS: [&str; 4] = [
    "definitions and overviews",
    "comparisons with related approaches",
    "technical details",
    "recent developments",
];

/// Turns a research topic into search queries with a language model.
pub struct LlmQueryPlanner {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    fallback_to_topic: bool,
}

impl LlmQueryPlanner {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self {
            llm,
            retry,
            fallback_to_topic: false,
        }
    }

    /// When enabled, a failed or empty generation yields the topic itself as the only query.
    pub fn with_fallback_to_topic(mut self, enabled: bool) -> Self {
        self.fallback_to_topic = enabled;
        self
    }

    fn parse_queries(raw: &str, max_queries: usize) -> Result<Vec<String>> {
        let mut map = parse_json_object(raw)?;
        let items = take_array(&mut map, "queries")?;

        let candidates = items.into_iter().filter_map(|item| match item {
            serde_json::Value::String(s) => Some(s),
            other => {
                tracing::warn!(item = %other, "Skipping non-string query");
                None
            }
        });

        Ok(sanitize_queries(candidates, max_queries))
    }

    fn give_up(&self, topic: &str, reason: String) -> Result<Vec<String>> {
        if self.fallback_to_topic {
            tracing::warn!(%reason, "Query generation failed, falling back to the topic");
            return Ok(vec![topic.to_string()]);
        }
        Err(RkgError::QueryGeneration(reason))
    }
}

/// Collapse whitespace, drop blanks and case-insensitive duplicates, keep at most `max`.
pub(crate) fn sanitize_queries(
    candidates: impl IntoIterator<Item = String>,
    max: usize,
) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|q| q.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(max)
        .collect()
}

#[async_trait]
impl QueryPlanner for LlmQueryPlanner {
    #[tracing::instrument(skip(self), fields(model = %self.llm.name()))]
    async fn plan(&self, topic: &str, max_queries: usize) -> Result<Vec<String>> {
        let topic = topic.split_whitespace().collect::<Vec<_>>().join(" ");
        if topic.is_empty() {
            return Err(RkgError::QueryGeneration("topic is empty".to_string()));
        }
        if max_queries == 0 {
            return Err(RkgError::QueryGeneration(
                "max_queries must be at least 1".to_string(),
            ));
        }

        let input = json!({
            "topic": topic,
            "max_queries": max_queries,
            "facets": FACETS,
        });

        let generated = self
            .retry
            .run("query_generation", || {
                self.llm.complete(PromptKind::QueryGeneration, &input)
            })
            .await
            .and_then(|raw| Self::parse_queries(&raw, max_queries));

        match generated {
            Ok(queries) if !queries.is_empty() => {
                tracing::info!(count = queries.len(), "Generated search queries");
                Ok(queries)
            }
            Ok(_) => self.give_up(&topic, "model returned no usable queries".to_string()),
            Err(e) => self.give_up(&topic, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;

    struct ScriptedModel {
        replies: Mutex<Vec<Result<String>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _kind: PromptKind, _input: &Value) -> Result<String> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(RkgError::Internal("script exhausted".into())))
        }
    }

    #[test]
    fn test_sanitize_queries() {
        let queries = sanitize_queries(
            vec![
                "  graph   neural networks ".to_string(),
                "".to_string(),
                "Graph Neural Networks".to_string(),
                "GNN applications".to_string(),
                "GNN vs CNN".to_string(),
            ],
            2,
        );
        assert_eq!(queries, vec!["graph neural networks", "GNN applications"]);
    }

    #[tokio::test]
    async fn test_plan_parses_queries() {
        let model = ScriptedModel::new(vec![Ok(
            r#"```json
{"queries": ["GNN overview", 42, "GNN vs transformers", "GNN overview"]}
```"#
                .to_string(),
        )]);
        let planner = LlmQueryPlanner::new(model, RetryPolicy::immediate(0));

        let queries = planner.plan("GNN", 5).await.unwrap();
        assert_eq!(queries, vec!["GNN overview", "GNN vs transformers"]);
    }

    #[tokio::test]
    async fn test_plan_truncates_to_max() {
        let model = ScriptedModel::new(vec![Ok(r#"{"queries": ["a", "b", "c"]}"#.to_string())]);
        let planner = LlmQueryPlanner::new(model, RetryPolicy::immediate(0));
        assert_eq!(planner.plan("topic", 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_plan_rejects_empty_topic() {
        let model = ScriptedModel::new(vec![]);
        let planner = LlmQueryPlanner::new(model, RetryPolicy::immediate(0));
        assert!(matches!(
            planner.plan("   ", 5).await,
            Err(RkgError::QueryGeneration(_))
        ));
    }

    #[tokio::test]
    async fn test_plan_zero_queries_fails() {
        let model = ScriptedModel::new(vec![Ok(r#"{"queries": []}"#.to_string())]);
        let planner = LlmQueryPlanner::new(model, RetryPolicy::immediate(0));
        assert!(matches!(
            planner.plan("GNN", 5).await,
            Err(RkgError::QueryGeneration(_))
        ));
    }

    #[tokio::test]
    async fn test_plan_retries_transient_errors() {
        let model = ScriptedModel::new(vec![
            Err(RkgError::LanguageModel("overloaded".into())),
            Ok(r#"{"queries": ["GNN overview"]}"#.to_string()),
        ]);
        let planner = LlmQueryPlanner::new(model, RetryPolicy::immediate(1));
        assert_eq!(planner.plan("GNN", 5).await.unwrap(), vec!["GNN overview"]);
    }

    #[tokio::test]
    async fn test_plan_falls_back_to_topic() {
        let model = ScriptedModel::new(vec![Ok("I cannot help with that".to_string())]);
        let planner =
            LlmQueryPlanner::new(model, RetryPolicy::immediate(0)).with_fallback_to_topic(true);
        assert_eq!(
            planner.plan(" graph  neural networks ", 5).await.unwrap(),
            vec!["graph neural networks"]
        );
    }
}
