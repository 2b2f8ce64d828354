//! In-memory backend for unit tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{ChatBackend, ChatRequest, LlmError, Role};

/// Records every request and answers deterministically
///
/// Plain requests get `"<model> answer"`, requests with a system message get
/// `"<model> synthesis"`. Models can be scripted to fail a number of times,
/// and every call can be made to take `latency` on the tokio clock.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    remaining_failures: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<ChatRequest>>,
    /// Calls already answered when each recorded request arrived
    completed_before: Mutex<Vec<usize>>,
    completed: Mutex<usize>,
    latency: Duration,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_times(self, model: &str, times: u32) -> Self {
        self.remaining_failures
            .lock()
            .unwrap()
            .insert(model.to_string(), times);
        self
    }

    pub(crate) fn always_fail(self, model: &str) -> Self {
        self.fail_times(model, u32::MAX)
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Requests paired with how many calls had finished when each arrived
    pub(crate) fn requests_with_completions(&self) -> Vec<(ChatRequest, usize)> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .zip(self.completed_before.lock().unwrap().iter().copied())
            .collect()
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls_for(&self, model: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.model == model)
            .count()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            self.completed_before
                .lock()
                .unwrap()
                .push(*self.completed.lock().unwrap());
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = self.answer(request);
        *self.completed.lock().unwrap() += 1;
        result
    }
}

impl ScriptedBackend {
    fn answer(&self, request: &ChatRequest) -> Result<String, LlmError> {
        if let Some(remaining) = self.remaining_failures.lock().unwrap().get_mut(&request.model) {
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(LlmError::Api {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
        }

        let has_system = request.messages.iter().any(|m| m.role == Role::System);
        Ok(if has_system {
            format!("{} synthesis", request.model)
        } else {
            format!("{} answer", request.model)
        })
    }
}
