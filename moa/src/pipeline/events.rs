//! Pipeline events for real-time visibility
//!
//! Emitted by the invoker and orchestrator while a run is in flight. The CLI
//! renders them with `--events`; any other subscriber can consume the channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::invoker::InvocationRole;

// ============================================================================
// MoA Events
// ============================================================================

/// Events emitted during a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MoaEvent {
    /// A layer is about to fan out
    LayerStart {
        /// 1-based round number; the aggregation is the last round
        layer: usize,
        /// Models invoked in this layer
        models: Vec<String>,
    },

    /// A model answered
    InvocationComplete {
        model: String,
        role: InvocationRole,
        /// 1-based attempt that succeeded
        attempt: u32,
        #[serde(with = "duration_millis")]
        duration: Duration,
    },

    /// One attempt failed; a retry may follow
    AttemptFailed {
        model: String,
        role: InvocationRole,
        attempt: u32,
        error: String,
    },

    /// All attempts failed; the sentinel takes this model's slot
    InvocationFailed {
        model: String,
        role: InvocationRole,
        attempts: u32,
    },

    /// Every invocation in the layer has finished
    LayerComplete {
        layer: usize,
        failures: usize,
        #[serde(with = "duration_millis")]
        duration: Duration,
    },

    /// Aggregator output is ready
    RunComplete {
        content: String,
        #[serde(with = "duration_millis")]
        total_duration: Duration,
    },
}

/// Serialize Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// ============================================================================
// Event Channel
// ============================================================================

pub type EventSender = mpsc::UnboundedSender<MoaEvent>;

pub type EventReceiver = mpsc::UnboundedReceiver<MoaEvent>;

/// Create a new event channel
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Optional sender; events are dropped when no channel is attached
#[derive(Clone, Default)]
pub struct MoaEventSender {
    sender: Option<EventSender>,
}

impl MoaEventSender {
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn none() -> Self {
        Self { sender: None }
    }

    pub fn is_active(&self) -> bool {
        self.sender.is_some()
    }

    /// Send an event (silently fails if no sender or receiver dropped)
    pub fn send(&self, event: MoaEvent) {
        if let Some(ref sender) = self.sender {
            let _ = sender.send(event);
        }
    }

    pub fn layer_start(&self, layer: usize, models: &[String]) {
        self.send(MoaEvent::LayerStart {
            layer,
            models: models.to_vec(),
        });
    }

    pub fn invocation_complete(
        &self,
        model: &str,
        role: InvocationRole,
        attempt: u32,
        duration: Duration,
    ) {
        self.send(MoaEvent::InvocationComplete {
            model: model.to_string(),
            role,
            attempt,
            duration,
        });
    }

    pub fn attempt_failed(&self, model: &str, role: InvocationRole, attempt: u32, error: &str) {
        self.send(MoaEvent::AttemptFailed {
            model: model.to_string(),
            role,
            attempt,
            error: error.to_string(),
        });
    }

    pub fn invocation_failed(&self, model: &str, role: InvocationRole, attempts: u32) {
        self.send(MoaEvent::InvocationFailed {
            model: model.to_string(),
            role,
            attempts,
        });
    }

    pub fn layer_complete(&self, layer: usize, failures: usize, duration: Duration) {
        self.send(MoaEvent::LayerComplete {
            layer,
            failures,
            duration,
        });
    }

    pub fn run_complete(&self, content: &str, total_duration: Duration) {
        self.send(MoaEvent::RunComplete {
            content: content.to_string(),
            total_duration,
        });
    }
}
