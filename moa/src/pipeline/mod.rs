//! Mixture-of-agents orchestration
//!
//! Reference models answer a prompt independently, optionally refine each
//! other's answers over further layers, and an aggregator model synthesizes
//! the last layer into the final response.

pub mod events;
mod invoker;
mod orchestrator;
mod prompt;
mod types;

#[cfg(test)]
mod testing;

pub use events::{event_channel, EventReceiver, EventSender, MoaEvent};
pub use invoker::{InvocationRole, ModelInvoker, RetryPolicy, MAX_ATTEMPTS, MAX_TOKENS, TEMPERATURE};
pub use orchestrator::{MoaError, MoaOrchestrator};
pub use prompt::aggregation_prompt;
pub use types::{LayerResult, MoaRun, ResponseText};
