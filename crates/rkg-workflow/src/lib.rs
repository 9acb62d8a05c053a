mod controller;
pub mod expansion;
mod state;

pub use controller::{WorkflowController, WorkflowSettings};
pub use state::{
    after_expanding, after_extracting, after_inferring, after_planning, after_searching,
    apply_extraction, FailureReason, RunContext, WorkflowFailure, WorkflowPhase, WorkflowState,
};
