//! Adapters for external systems: agent CLIs and the LLM-backed collaborators.

pub mod llm;
pub mod substrates;
