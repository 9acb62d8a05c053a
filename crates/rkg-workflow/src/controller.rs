use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use rkg_core::concept::Concept;
use rkg_core::config::ResearchConfig;
use rkg_core::error::{Result, RkgError};
use rkg_core::relationship::Relationship;
use rkg_core::retry::RetryPolicy;
use rkg_core::search::{SearchBatch, SearchProvider, SearchResult};
use rkg_core::stage::{ExtractionOutcome, ExtractionStage, InferenceStage, QueryPlanner};
use rkg_graph::{KnowledgeGraph, ResearchGraph};

use crate::expansion::{component_concepts, pooled_batch};
use crate::state::{
    after_expanding, after_extracting, after_inferring, after_planning, after_searching,
    RunContext, WorkflowFailure, WorkflowState,
};

/// Limits applied to every run.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowSettings {
    pub max_queries: usize,
    pub max_results_per_query: usize,
    pub search_retry: RetryPolicy,
    /// Turn the topic concept's key components into concepts of their own.
    pub expand_components: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_queries: 5,
            max_results_per_query: 10,
            search_retry: RetryPolicy::default(),
            expand_components: true,
        }
    }
}

impl WorkflowSettings {
    pub fn from_config(config: &ResearchConfig) -> Self {
        Self {
            max_queries: config.max_queries,
            max_results_per_query: config.max_results_per_query,
            search_retry: config.search_retry_policy(),
            expand_components: config.expand_components,
        }
    }
}

/// Drives one topic through planning, search, extraction, expansion and inference.
pub struct WorkflowController {
    planner: Arc<dyn QueryPlanner>,
    search: Arc<dyn SearchProvider>,
    extraction: Arc<dyn ExtractionStage>,
    inference: Arc<dyn InferenceStage>,
    settings: WorkflowSettings,
}

impl WorkflowController {
    pub fn new(
        planner: Arc<dyn QueryPlanner>,
        search: Arc<dyn SearchProvider>,
        extraction: Arc<dyn ExtractionStage>,
        inference: Arc<dyn InferenceStage>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            planner,
            search,
            extraction,
            inference,
            settings,
        }
    }

    pub async fn run(&self, topic: &str) -> std::result::Result<ResearchGraph, WorkflowFailure> {
        self.run_with_cancel(topic, CancellationToken::new()).await
    }

    #[instrument(skip(self, cancel))]
    pub async fn run_with_cancel(
        &self,
        topic: &str,
        cancel: CancellationToken,
    ) -> std::result::Result<ResearchGraph, WorkflowFailure> {
        let mut state = WorkflowState::start(topic);
        info!(run_id = %state.run_id(), "Research run starting");

        loop {
            state = match state {
                WorkflowState::Done(graph) => {
                    info!(
                        run_id = %graph.run_id(),
                        concepts = graph.concepts().len(),
                        relationships = graph.relationships().len(),
                        citations = graph.citations().len(),
                        warnings = graph.warnings().len(),
                        "Research run complete"
                    );
                    return Ok(graph);
                }
                WorkflowState::Failed(failure) => {
                    error!(
                        run_id = %failure.run_id,
                        phase = %failure.phase,
                        reason = %failure.reason,
                        detail = ?failure.detail,
                        "Research run failed"
                    );
                    return Err(failure);
                }
                active => self.step(active, &cancel).await,
            };
        }
    }

    /// Advance exactly one transition.
    pub async fn step(&self, state: WorkflowState, cancel: &CancellationToken) -> WorkflowState {
        if state.is_terminal() {
            return state;
        }
        if cancel.is_cancelled() {
            return state.cancel();
        }

        let from = state.phase();
        let run_id = state.run_id();

        let next = match state {
            WorkflowState::Planning { ctx } => self.plan(ctx, cancel).await,
            WorkflowState::Searching { ctx, queries } => self.search_all(ctx, queries, cancel).await,
            WorkflowState::Extracting {
                ctx,
                queries,
                batches,
                next,
                graph,
            } => self.extract_next(ctx, queries, batches, next, graph, cancel).await,
            WorkflowState::Expanding {
                ctx,
                queries,
                batches,
                graph,
            } => self.expand(ctx, queries, batches, graph, cancel).await,
            WorkflowState::Inferring {
                ctx,
                queries,
                graph,
            } => self.infer(ctx, queries, graph, cancel).await,
            terminal => terminal,
        };

        // A stage that finished while the token fired still counts as cancelled.
        let next = if cancel.is_cancelled() { next.cancel() } else { next };

        info!(%run_id, %from, to = %next.phase(), "Workflow transition");
        next
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    async fn plan(&self, ctx: RunContext, cancel: &CancellationToken) -> WorkflowState {
        let planned = cancellable(cancel, self.planner.plan(&ctx.topic, self.settings.max_queries))
            .await
            .map(|mut queries| {
                queries.truncate(self.settings.max_queries);
                queries
            });
        if let Ok(queries) = &planned {
            info!(run_id = %ctx.run_id, count = queries.len(), "Queries planned");
        }
        after_planning(ctx, planned)
    }

    async fn search_all(
        &self,
        ctx: RunContext,
        queries: Vec<String>,
        cancel: &CancellationToken,
    ) -> WorkflowState {
        let mut join_set = JoinSet::new();

        for (index, query) in queries.iter().cloned().enumerate() {
            let search = Arc::clone(&self.search);
            let retry = self.settings.search_retry;
            let max_results = self.settings.max_results_per_query;
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let outcome = retry
                    .run_cancellable("search", &cancel, || {
                        search_once(search.as_ref(), &query, max_results)
                    })
                    .await;
                (index, outcome)
            });
        }

        let outcomes = collect(join_set, "search").await;
        let succeeded = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
        info!(
            run_id = %ctx.run_id,
            queries = queries.len(),
            succeeded,
            "Searches complete"
        );
        after_searching(ctx, queries, outcomes)
    }

    /// Extract one batch. The stage sees every concept the earlier batches produced.
    async fn extract_next(
        &self,
        ctx: RunContext,
        queries: Vec<String>,
        batches: Vec<SearchBatch>,
        next: usize,
        graph: KnowledgeGraph,
        cancel: &CancellationToken,
    ) -> WorkflowState {
        let outcome = match batches.get(next) {
            Some(batch) => {
                let known = graph.concepts().names();
                cancellable(cancel, self.extraction.extract(&ctx.topic, batch, &known)).await
            }
            None => Ok(ExtractionOutcome::default()),
        };
        if let Ok(outcome) = &outcome {
            info!(
                run_id = %ctx.run_id,
                batch = next,
                concepts = outcome.concepts.len(),
                facts = outcome.facts.len(),
                "Batch extracted"
            );
        }
        after_extracting(ctx, queries, batches, next, graph, outcome)
    }

    async fn expand(
        &self,
        ctx: RunContext,
        queries: Vec<String>,
        batches: Vec<SearchBatch>,
        graph: KnowledgeGraph,
        cancel: &CancellationToken,
    ) -> WorkflowState {
        let components = if self.settings.expand_components {
            component_concepts(&graph, &ctx.topic)
        } else {
            Vec::new()
        };
        if components.is_empty() {
            return after_expanding(ctx, queries, graph, components, Vec::new());
        }

        let known: Arc<[String]> = graph.concepts().names().into();
        let mut join_set = JoinSet::new();
        for (index, component) in components.iter().enumerate() {
            let extraction = Arc::clone(&self.extraction);
            let known = Arc::clone(&known);
            let batch = pooled_batch(&batches, &component.name);
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let outcome = cancellable(
                    &cancel,
                    extraction.extract(&batch.query, &batch, &known),
                )
                .await;
                (index, outcome)
            });
        }

        let outcomes = collect(join_set, "expansion").await;
        info!(
            run_id = %ctx.run_id,
            components = components.len(),
            enriched = outcomes.iter().filter(|(_, r)| r.is_ok()).count(),
            "Key components expanded"
        );
        after_expanding(ctx, queries, graph, components, outcomes)
    }

    async fn infer(
        &self,
        ctx: RunContext,
        queries: Vec<String>,
        graph: KnowledgeGraph,
        cancel: &CancellationToken,
    ) -> WorkflowState {
        let concepts: Vec<Concept> = graph.concepts().iter().cloned().collect();
        let facts: Vec<Relationship> = graph.relationships().facts().cloned().collect();

        let inferred = cancellable(
            cancel,
            self.inference.infer(&ctx.topic, &concepts, &facts),
        )
        .await;
        after_inferring(ctx, queries, graph, inferred)
    }
}

/// One search attempt. An empty result list counts as a transient failure so it is retried.
async fn search_once(
    provider: &dyn SearchProvider,
    query: &str,
    max_results: usize,
) -> Result<Vec<SearchResult>> {
    let mut results = provider.search(query, max_results).await?;
    if results.is_empty() {
        return Err(RkgError::SearchTransient(format!(
            "{} returned no results",
            provider.name()
        )));
    }
    results.truncate(max_results);
    Ok(results)
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RkgError::Cancelled),
        result = fut => result,
    }
}

/// Fan-in. Panicked tasks are logged and left out.
async fn collect<T: 'static>(mut join_set: JoinSet<(usize, Result<T>)>, stage: &str) -> Vec<(usize, Result<T>)> {
    let mut outcomes = Vec::with_capacity(join_set.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!(stage, error = %e, "Task panicked"),
        }
    }
    outcomes
}
