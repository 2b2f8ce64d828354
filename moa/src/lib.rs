//! Mixture-of-agents text generation over OpenAI-compatible backends

pub mod config;
pub mod llm;
pub mod pipeline;
