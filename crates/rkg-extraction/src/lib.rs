mod anthropic;
mod pipeline;
mod planner;
mod prompts;

pub use anthropic::AnthropicLanguageModel;
pub use pipeline::LlmExtractionStage;
pub use planner::LlmQueryPlanner;
