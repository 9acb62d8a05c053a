pub mod engine;

pub use engine::LlmInferenceStage;
