//! Single-model invocation with retry
//!
//! One `invoke` call is one logical "ask a model": build the messages,
//! call the backend up to [`MAX_ATTEMPTS`] times with exponential backoff,
//! and hand back a [`ResponseText`]. Exhausted retries produce a
//! `ResponseText::Failed` value instead of an error so the caller can keep
//! the layer index-aligned.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::llm::{ChatBackend, ChatRequest, Message};

use super::events::MoaEventSender;
use super::prompt::aggregation_prompt;
use super::types::{LayerResult, ResponseText};

/// Sampling temperature for every request
pub const TEMPERATURE: f32 = 0.7;

/// Output token limit for every request
pub const MAX_TOKENS: u32 = 1024;

/// Total attempts per invocation, including the first
pub const MAX_ATTEMPTS: u32 = 3;

/// Which side of the pipeline a call serves, for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationRole {
    Reference,
    Aggregator,
}

impl InvocationRole {
    fn for_prior(prior: Option<&LayerResult>) -> Self {
        match prior {
            Some(_) => InvocationRole::Aggregator,
            None => InvocationRole::Reference,
        }
    }
}

impl fmt::Display for InvocationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationRole::Reference => f.write_str("reference"),
            InvocationRole::Aggregator => f.write_str("aggregator"),
        }
    }
}

/// Backoff schedule between attempts
///
/// The wait before retry `k` (0 for the first retry) is `unit * 2^k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Same schedule with a different time unit
    pub fn with_unit(unit: Duration) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        self.unit * 2u32.pow(retry)
    }
}

/// Executes requests against named models over a shared backend
#[derive(Clone)]
pub struct ModelInvoker {
    backend: Arc<dyn ChatBackend>,
    directive: String,
    retry: RetryPolicy,
    event_sender: MoaEventSender,
}

impl ModelInvoker {
    /// Create an invoker that prefixes synthesis requests with `directive`
    pub fn new(backend: Arc<dyn ChatBackend>, directive: impl Into<String>) -> Self {
        Self {
            backend,
            directive: directive.into(),
            retry: RetryPolicy::default(),
            event_sender: MoaEventSender::none(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_event_sender(mut self, sender: MoaEventSender) -> Self {
        self.event_sender = sender;
        self
    }

    /// Build the request for one invocation
    ///
    /// With prior responses a system message carrying the directive and the
    /// enumerated responses precedes the user message.
    pub fn build_request(
        &self,
        model: &str,
        user_prompt: &str,
        prior: Option<&LayerResult>,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(previous) = prior {
            messages.push(Message::system(aggregation_prompt(&self.directive, previous)));
        }
        messages.push(Message::user(user_prompt));

        ChatRequest {
            model: model.to_string(),
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        }
    }

    /// Ask `model` to answer `user_prompt`, synthesizing `prior` if given
    pub async fn invoke(
        &self,
        model: &str,
        user_prompt: &str,
        prior: Option<&LayerResult>,
    ) -> ResponseText {
        // An empty layer carries nothing to synthesize
        let prior = prior.filter(|previous| !previous.is_empty());
        let role = InvocationRole::for_prior(prior);
        let request = self.build_request(model, user_prompt, prior);
        let max_attempts = self.retry.max_attempts();
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let started = Instant::now();
            match self.backend.complete(&request).await {
                Ok(text) => {
                    tracing::info!(
                        model = %model,
                        role = %role,
                        attempt = attempt + 1,
                        "Model responded"
                    );
                    self.event_sender
                        .invocation_complete(model, role, attempt + 1, started.elapsed());
                    return ResponseText::Success {
                        model: model.to_string(),
                        text,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        model = %model,
                        role = %role,
                        attempt = attempt + 1,
                        error = %e,
                        "API call failed"
                    );
                    self.event_sender
                        .attempt_failed(model, role, attempt + 1, &e.to_string());
                    last_error = e.to_string();

                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(self.retry.delay_before_retry(attempt)).await;
                    }
                }
            }
        }

        tracing::error!(
            model = %model,
            role = %role,
            attempts = max_attempts,
            "Failed to get response after retries"
        );
        self.event_sender.invocation_failed(model, role, max_attempts);

        ResponseText::Failed {
            model: model.to_string(),
            attempts: max_attempts,
            error: last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::pipeline::events::{event_channel, MoaEvent};
    use crate::pipeline::testing::ScriptedBackend;

    fn invoker(backend: &Arc<ScriptedBackend>) -> ModelInvoker {
        ModelInvoker::new(backend.clone(), "Synthesize:")
            .with_retry_policy(RetryPolicy::with_unit(Duration::from_millis(1)))
    }

    #[test]
    fn test_retry_schedule() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_before_retry(0), Duration::from_secs(1));
        assert_eq!(policy.delay_before_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_before_retry(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_plain_request_has_only_user_message() {
        let backend = Arc::new(ScriptedBackend::new());
        let response = invoker(&backend).invoke("a", "P", None).await;

        assert_eq!(response.text(), "a answer");
        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "a");
        assert_eq!(requests[0].messages, vec![Message::user("P")]);
        assert_eq!(requests[0].temperature, TEMPERATURE);
        assert_eq!(requests[0].max_tokens, MAX_TOKENS);
    }

    #[tokio::test]
    async fn test_prior_responses_become_system_message() {
        let backend = Arc::new(ScriptedBackend::new());
        let prior = LayerResult::new(vec![
            ResponseText::Success {
                model: "a".into(),
                text: "first".into(),
            },
            ResponseText::Success {
                model: "b".into(),
                text: "second".into(),
            },
        ]);

        invoker(&backend).invoke("c", "P", Some(&prior)).await;

        let request = &backend.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(
            request.messages[0].content,
            "Synthesize:\n\nAssistant 1 response: first\nAssistant 2 response: second"
        );
        assert_eq!(request.messages[1], Message::user("P"));
    }

    #[tokio::test]
    async fn test_empty_prior_is_plain_request() {
        let backend = Arc::new(ScriptedBackend::new());

        invoker(&backend).invoke("c", "P", Some(&LayerResult::default())).await;

        assert_eq!(backend.requests()[0].messages, vec![Message::user("P")]);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let backend = Arc::new(ScriptedBackend::new().fail_times("a", 2));

        let response = invoker(&backend).invoke("a", "P", None).await;

        assert!(response.is_success());
        assert_eq!(backend.calls_for("a"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_sentinel_after_backoff() {
        let backend = Arc::new(ScriptedBackend::new().always_fail("a"));
        let invoker = ModelInvoker::new(backend.clone(), "D");

        let started = tokio::time::Instant::now();
        let response = invoker.invoke("a", "P", None).await;
        let elapsed = started.elapsed();

        assert_eq!(backend.calls_for("a"), 3);
        assert_eq!(response.text(), "Error: Could not get response from a.");
        assert!(matches!(response, ResponseText::Failed { attempts: 3, .. }));
        // 1s before attempt 2, 2s before attempt 3, none after the last
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_emits_attempt_events() {
        let backend = Arc::new(ScriptedBackend::new().fail_times("a", 1));
        let (tx, mut rx) = event_channel();
        let invoker = invoker(&backend).with_event_sender(MoaEventSender::new(tx));

        invoker.invoke("a", "P", None).await;
        drop(invoker);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(
            events[0],
            MoaEvent::AttemptFailed { attempt: 1, role: InvocationRole::Reference, .. }
        ));
        assert!(matches!(events[1], MoaEvent::InvocationComplete { attempt: 2, .. }));
        assert_eq!(events.len(), 2);
    }
}
