//! Prompt-driven collaborators for planning and critique.

pub mod collaborators;
pub mod prompts;

pub use collaborators::{
    CriticMode, LlmBackend, LlmChallengeGenerator, LlmCritic, LlmEvaluator, LlmPlanner,
    LlmValidator,
};
