use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rkg_core::config::ResearchConfig;
use rkg_core::llm::LanguageModel;
use rkg_extraction::{AnthropicLanguageModel, LlmExtractionStage, LlmQueryPlanner};
use rkg_reasoning::LlmInferenceStage;
use rkg_search::BraveSearchProvider;
use rkg_workflow::{WorkflowController, WorkflowSettings};

mod logseq;

/// Research a topic on the web and write a cited knowledge graph as Logseq pages.
#[derive(Debug, Parser)]
#[command(name = "rkg", version, about)]
struct Args {
    /// Topic to research.
    topic: String,

    /// Directory for the generated pages [default: RKG_OUTPUT_DIR or output/logseq].
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Maximum number of search queries to generate.
    #[arg(long)]
    max_queries: Option<usize>,

    /// Maximum search results per query.
    #[arg(long)]
    max_results: Option<usize>,

    /// Also write the graph as graph.json.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rkg=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = ResearchConfig::from_env();
    if let Some(n) = args.max_queries {
        config.max_queries = n;
    }
    if let Some(n) = args.max_results {
        config.max_results_per_query = n;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.display().to_string();
    }
    config.validate().context("invalid configuration")?;

    let controller = build_controller(&config)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling research run");
            interrupt.cancel();
        }
    });

    let graph = controller.run_with_cancel(&args.topic, cancel).await?;

    for issue in graph.integrity_issues() {
        tracing::error!(%issue, "Graph integrity check failed");
    }
    for warning in graph.warnings() {
        tracing::debug!(%warning, "Run warning");
    }

    let output_dir = PathBuf::from(&config.output_dir);
    let pages = logseq::render(&graph);
    let written = logseq::write_pages(&output_dir, &pages)?;

    if args.json {
        let path = output_dir.join("graph.json");
        std::fs::write(&path, graph.to_json_pretty()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{}", path.display());
    }

    println!(
        "Researched \"{}\": {} concepts, {} facts, {} inferences, {} sources, {} warnings",
        graph.topic(),
        graph.concepts().len(),
        graph.facts().count(),
        graph.inferences().count(),
        graph.citations().len(),
        graph.warnings().len(),
    );
    match topic_page_path(&output_dir, &pages) {
        Some(path) => println!("{}", path.display()),
        None => tracing::warn!(pages = written.len(), "Topic has no usable file name; no topic page written"),
    }

    Ok(())
}

/// The file the topic page was written to. Always the first rendered page, never a
/// concept page standing in for it.
fn topic_page_path(dir: &Path, pages: &[logseq::Page]) -> Option<PathBuf> {
    pages.first().and_then(|page| page.path_in(dir))
}

fn build_controller(config: &ResearchConfig) -> Result<WorkflowController> {
    let llm: Arc<dyn LanguageModel> = Arc::new(AnthropicLanguageModel::new(config)?);
    let llm_retry = config.llm_retry_policy();

    let planner = LlmQueryPlanner::new(Arc::clone(&llm), llm_retry)
        .with_fallback_to_topic(config.query_fallback_to_topic);
    let search = BraveSearchProvider::new(config)?;
    let extraction = LlmExtractionStage::new(Arc::clone(&llm), llm_retry);
    let inference = LlmInferenceStage::new(llm, llm_retry);

    Ok(WorkflowController::new(
        Arc::new(planner),
        Arc::new(search),
        Arc::new(extraction),
        Arc::new(inference),
        WorkflowSettings::from_config(config),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "rkg",
            "graph neural networks",
            "--max-queries",
            "3",
            "--json",
        ]);
        assert_eq!(args.topic, "graph neural networks");
        assert_eq!(args.max_queries, Some(3));
        assert_eq!(args.max_results, None);
        assert!(args.json);
    }

    #[test]
    fn test_args_require_topic() {
        assert!(Args::try_parse_from(["rkg"]).is_err());
    }

    fn page(title: &str, file_name: &str) -> logseq::Page {
        logseq::Page {
            title: title.to_string(),
            file_name: file_name.to_string(),
            content: String::new(),
        }
    }

    #[test]
    fn test_topic_page_path_never_points_at_a_concept_page() {
        let dir = Path::new("out");
        assert_eq!(
            topic_page_path(dir, &[page("GNN", "GNN"), page("Message Passing", "Message_Passing")]),
            Some(dir.join("GNN.md"))
        );
        assert_eq!(
            topic_page_path(dir, &[page("???", ""), page("Message Passing", "Message_Passing")]),
            None
        );
        assert_eq!(topic_page_path(dir, &[]), None);
    }
}
