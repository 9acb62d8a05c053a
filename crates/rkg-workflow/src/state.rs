//! Workflow states and the pure transition functions between them.
//!
//! Nothing here performs I/O. The controller runs each stage, then hands the stage
//! results to one of the `after_*` functions to decide the next state.

use std::fmt;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use rkg_core::concept::Concept;
use rkg_core::error::{Result, RkgError};
use rkg_core::search::{SearchBatch, SearchResult};
use rkg_core::stage::{ExtractionOutcome, InferenceOutcome};
use rkg_graph::{KnowledgeGraph, ResearchGraph, RunMetadata};

use crate::expansion::enrich_component;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Planning,
    Searching,
    Extracting,
    Expanding,
    Inferring,
    Done,
    Failed,
}

impl WorkflowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::Planning => "planning",
            WorkflowPhase::Searching => "searching",
            WorkflowPhase::Extracting => "extracting",
            WorkflowPhase::Expanding => "expanding",
            WorkflowPhase::Inferring => "inferring",
            WorkflowPhase::Done => "done",
            WorkflowPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    QueryGeneration,
    NoSuccessfulSearches,
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureReason::QueryGeneration => "query generation failed",
            FailureReason::NoSuccessfulSearches => "no successful searches",
            FailureReason::Cancelled => "cancelled",
        })
    }
}

/// Why a run ended without a graph.
#[derive(Debug, Clone, thiserror::Error)]
#[error("research run failed while {phase}: {reason}")]
pub struct WorkflowFailure {
    pub run_id: Uuid,
    pub phase: WorkflowPhase,
    pub reason: FailureReason,
    /// The underlying error, when there is one.
    pub detail: Option<String>,
    pub warnings: Vec<String>,
}

/// What every non-terminal state carries.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub topic: String,
    pub warnings: Vec<String>,
}

impl RunContext {
    pub fn new(topic: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            topic: topic.trim().to_string(),
            warnings: Vec::new(),
        }
    }

    fn fail(self, phase: WorkflowPhase, reason: FailureReason, detail: Option<String>) -> WorkflowState {
        WorkflowState::Failed(WorkflowFailure {
            run_id: self.run_id,
            phase,
            reason,
            detail,
            warnings: self.warnings,
        })
    }
}

#[derive(Debug)]
pub enum WorkflowState {
    Planning {
        ctx: RunContext,
    },
    Searching {
        ctx: RunContext,
        queries: Vec<String>,
    },
    /// One batch is extracted per step, in query order, against the graph built so far.
    Extracting {
        ctx: RunContext,
        queries: Vec<String>,
        batches: Vec<SearchBatch>,
        next: usize,
        graph: KnowledgeGraph,
    },
    /// Key components of the topic concept become concepts of their own.
    Expanding {
        ctx: RunContext,
        queries: Vec<String>,
        batches: Vec<SearchBatch>,
        graph: KnowledgeGraph,
    },
    Inferring {
        ctx: RunContext,
        queries: Vec<String>,
        graph: KnowledgeGraph,
    },
    Done(ResearchGraph),
    Failed(WorkflowFailure),
}

impl WorkflowState {
    pub fn start(topic: &str) -> Self {
        WorkflowState::Planning {
            ctx: RunContext::new(topic),
        }
    }

    pub fn phase(&self) -> WorkflowPhase {
        match self {
            WorkflowState::Planning { .. } => WorkflowPhase::Planning,
            WorkflowState::Searching { .. } => WorkflowPhase::Searching,
            WorkflowState::Extracting { .. } => WorkflowPhase::Extracting,
            WorkflowState::Expanding { .. } => WorkflowPhase::Expanding,
            WorkflowState::Inferring { .. } => WorkflowPhase::Inferring,
            WorkflowState::Done(_) => WorkflowPhase::Done,
            WorkflowState::Failed(_) => WorkflowPhase::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Done(_) | WorkflowState::Failed(_))
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowState::Planning { ctx }
            | WorkflowState::Searching { ctx, .. }
            | WorkflowState::Extracting { ctx, .. }
            | WorkflowState::Expanding { ctx, .. }
            | WorkflowState::Inferring { ctx, .. } => ctx.run_id,
            WorkflowState::Done(graph) => graph.run_id(),
            WorkflowState::Failed(failure) => failure.run_id,
        }
    }

    /// Abandon the run. Any graph under construction is dropped; terminal states are kept.
    pub fn cancel(self) -> Self {
        let phase = self.phase();
        match self {
            WorkflowState::Planning { ctx }
            | WorkflowState::Searching { ctx, .. }
            | WorkflowState::Extracting { ctx, .. }
            | WorkflowState::Expanding { ctx, .. }
            | WorkflowState::Inferring { ctx, .. } => {
                ctx.fail(phase, FailureReason::Cancelled, None)
            }
            terminal => terminal,
        }
    }
}

// ── Transitions ────────────────────────────────────────────────────────────

pub fn after_planning(ctx: RunContext, planned: Result<Vec<String>>) -> WorkflowState {
    match planned {
        Ok(queries) if !queries.is_empty() => WorkflowState::Searching { ctx, queries },
        Ok(_) => ctx.fail(
            WorkflowPhase::Planning,
            FailureReason::QueryGeneration,
            Some("planner returned no queries".to_string()),
        ),
        Err(RkgError::Cancelled) => ctx.fail(WorkflowPhase::Planning, FailureReason::Cancelled, None),
        Err(e) => ctx.fail(
            WorkflowPhase::Planning,
            FailureReason::QueryGeneration,
            Some(e.to_string()),
        ),
    }
}

/// Collect per-query search results, in any order, into batches ordered by query index.
/// Failed and empty queries become warnings. No batch at all fails the run.
pub fn after_searching(
    mut ctx: RunContext,
    queries: Vec<String>,
    mut outcomes: Vec<(usize, Result<Vec<SearchResult>>)>,
) -> WorkflowState {
    outcomes.sort_by_key(|(index, _)| *index);

    let mut batches = Vec::new();
    let mut cancelled = false;
    for (index, outcome) in outcomes {
        let query = queries.get(index).cloned().unwrap_or_default();
        match outcome {
            Ok(results) if !results.is_empty() => batches.push(SearchBatch {
                query_index: index,
                query,
                results,
            }),
            Ok(_) => ctx.warnings.push(format!("search '{query}' returned no results")),
            Err(RkgError::Cancelled) => cancelled = true,
            Err(e) => {
                warn!(%query, error = %e, "Search failed, skipping query");
                ctx.warnings.push(format!("search '{query}' failed: {e}"));
            }
        }
    }

    if cancelled {
        return ctx.fail(WorkflowPhase::Searching, FailureReason::Cancelled, None);
    }
    if batches.is_empty() {
        return ctx.fail(
            WorkflowPhase::Searching,
            FailureReason::NoSuccessfulSearches,
            None,
        );
    }
    WorkflowState::Extracting {
        ctx,
        queries,
        batches,
        next: 0,
        graph: KnowledgeGraph::new(),
    }
}

/// Fold the extraction result of `batches[index]` into the graph, then move on to the
/// next batch, or to expansion after the last one. A failed batch becomes a warning.
pub fn after_extracting(
    mut ctx: RunContext,
    queries: Vec<String>,
    batches: Vec<SearchBatch>,
    index: usize,
    mut graph: KnowledgeGraph,
    outcome: Result<ExtractionOutcome>,
) -> WorkflowState {
    match outcome {
        Ok(outcome) => apply_extraction(&mut graph, outcome, &mut ctx.warnings),
        Err(RkgError::Cancelled) => {
            return ctx.fail(WorkflowPhase::Extracting, FailureReason::Cancelled, None)
        }
        Err(e) => {
            let query = batches.get(index).map(|b| b.query.as_str()).unwrap_or_default();
            warn!(%query, error = %e, "Extraction failed, skipping batch");
            ctx.warnings
                .push(format!("extraction for '{query}' failed: {e}"));
        }
    }

    let next = index + 1;
    if next < batches.len() {
        WorkflowState::Extracting {
            ctx,
            queries,
            batches,
            next,
            graph,
        }
    } else {
        WorkflowState::Expanding {
            ctx,
            queries,
            batches,
            graph,
        }
    }
}

/// Fold one extraction outcome into the graph. Rejected items become warnings.
pub fn apply_extraction(
    graph: &mut KnowledgeGraph,
    outcome: ExtractionOutcome,
    warnings: &mut Vec<String>,
) {
    warnings.extend(outcome.warnings);

    for citation in outcome.citations {
        graph.add_citation(citation);
    }
    for concept in outcome.concepts {
        if let Err(e) = graph.upsert_concept(concept) {
            warn!(error = %e, "Concept rejected");
            warnings.push(e.to_string());
        }
    }
    for fact in outcome.facts {
        if let Err(e) = graph.add_relationship(fact) {
            warn!(error = %e, "Fact rejected");
            warnings.push(e.to_string());
        }
    }
}

/// Upsert the component concepts, each enriched by its own extraction outcome when that
/// succeeded. Enrichment failures only cost detail; the bare component is still added.
pub fn after_expanding(
    mut ctx: RunContext,
    queries: Vec<String>,
    mut graph: KnowledgeGraph,
    mut components: Vec<Concept>,
    mut outcomes: Vec<(usize, Result<ExtractionOutcome>)>,
) -> WorkflowState {
    outcomes.sort_by_key(|(index, _)| *index);

    for (index, outcome) in outcomes {
        let Some(component) = components.get_mut(index) else {
            continue;
        };
        match outcome {
            Ok(outcome) => enrich_component(component, outcome),
            Err(RkgError::Cancelled) => {
                return ctx.fail(WorkflowPhase::Expanding, FailureReason::Cancelled, None)
            }
            Err(e) => {
                warn!(component = %component.name, error = %e, "Component enrichment failed, keeping summary");
                ctx.warnings
                    .push(format!("enrichment of '{}' failed: {e}", component.name));
            }
        }
    }

    for component in components {
        if let Err(e) = graph.upsert_concept(component) {
            warn!(error = %e, "Component concept rejected");
            ctx.warnings.push(e.to_string());
        }
    }

    WorkflowState::Inferring {
        ctx,
        queries,
        graph,
    }
}

/// Add inferred edges (or record the inference failure) and freeze the graph.
pub fn after_inferring(
    mut ctx: RunContext,
    queries: Vec<String>,
    mut graph: KnowledgeGraph,
    inferred: Result<InferenceOutcome>,
) -> WorkflowState {
    match inferred {
        Ok(outcome) => {
            ctx.warnings.extend(outcome.warnings);
            for inference in outcome.inferences {
                if let Err(e) = graph.add_relationship(inference) {
                    warn!(error = %e, "Inference rejected");
                    ctx.warnings.push(e.to_string());
                }
            }
        }
        Err(RkgError::Cancelled) => {
            return ctx.fail(WorkflowPhase::Inferring, FailureReason::Cancelled, None)
        }
        Err(e) => {
            warn!(error = %e, "Inference failed, continuing without inferred edges");
            ctx.warnings.push(format!("inference failed: {e}"));
        }
    }

    WorkflowState::Done(graph.finish(RunMetadata {
        run_id: ctx.run_id,
        topic: ctx.topic,
        queries,
        warnings: ctx.warnings,
    }))
}
