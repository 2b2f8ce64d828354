//! Layered mixture-of-agents pipeline
//!
//! A run is:
//! 1. One reference layer: every reference model answers the prompt alone
//! 2. `layers - 2` refinement layers (if any): every reference model answers
//!    again with the previous layer's responses as synthesis context
//! 3. One aggregation call: the aggregator synthesizes the last layer
//!
//! Invocations within a layer run concurrently; layers run in order.
//!
//! Layer numbers in logs and events count rounds actually executed: the
//! reference rounds are 1..=n and the aggregation is round n + 1. With
//! `layers` of 1 or 2 that puts the aggregation at round 2.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use thiserror::Error;

use crate::config::{ConfigError, MoaConfig};
use crate::llm::ChatBackend;

use super::events::{EventSender, MoaEventSender};
use super::invoker::{ModelInvoker, RetryPolicy};
use super::types::{LayerResult, MoaRun};

/// Pipeline-fatal errors
///
/// Individual model failures never show up here; they become sentinel
/// entries in the layer instead.
#[derive(Debug, Error)]
pub enum MoaError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct MoaOrchestrator {
    config: MoaConfig,
    invoker: ModelInvoker,
    event_sender: MoaEventSender,
}

impl MoaOrchestrator {
    /// Create an orchestrator, rejecting invalid configuration up front
    pub fn new(config: MoaConfig, backend: Arc<dyn ChatBackend>) -> Result<Self, ConfigError> {
        config.validate()?;
        let invoker = ModelInvoker::new(backend, config.aggregator_system_prompt.clone());

        Ok(Self {
            config,
            invoker,
            event_sender: MoaEventSender::none(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.invoker = self.invoker.with_retry_policy(retry);
        self
    }

    /// Set event sender for real-time pipeline visibility
    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = MoaEventSender::new(sender);
        self.invoker = self.invoker.with_event_sender(self.event_sender.clone());
        self
    }

    pub fn config(&self) -> &MoaConfig {
        &self.config
    }

    /// Run the pipeline and return the aggregator's text
    ///
    /// A failed aggregator yields its sentinel text, not an error.
    pub async fn generate(&self, user_prompt: &str) -> Result<String, MoaError> {
        Ok(self.generate_detailed(user_prompt).await?.final_response.into_text())
    }

    /// Run the pipeline and return every layer plus the final response
    pub async fn generate_detailed(&self, user_prompt: &str) -> Result<MoaRun, MoaError> {
        self.config.validate()?;
        let started = Instant::now();

        let mut layers = Vec::with_capacity(1 + self.config.intermediate_layers());
        let mut current = self.run_reference_layer(1, user_prompt, None).await;

        for i in 0..self.config.intermediate_layers() {
            let layer_number = i + 2;
            tracing::info!(layer = layer_number, "Running intermediate aggregation layer");
            let next = self
                .run_reference_layer(layer_number, user_prompt, Some(&current))
                .await;
            layers.push(std::mem::replace(&mut current, next));
        }

        let final_layer = layers.len() + 2;
        tracing::info!(
            layer = final_layer,
            model = %self.config.aggregator_model,
            "Running final aggregation layer"
        );
        self.event_sender
            .layer_start(final_layer, std::slice::from_ref(&self.config.aggregator_model));
        let aggregation_started = Instant::now();

        let final_response = self
            .invoker
            .invoke(&self.config.aggregator_model, user_prompt, Some(&current))
            .await;

        self.event_sender.layer_complete(
            final_layer,
            usize::from(!final_response.is_success()),
            aggregation_started.elapsed(),
        );
        layers.push(current);

        let run = MoaRun {
            layers,
            final_response,
        };
        self.event_sender
            .run_complete(&run.final_text(), started.elapsed());

        Ok(run)
    }

    /// Invoke every reference model concurrently and join in model order
    async fn run_reference_layer(
        &self,
        layer: usize,
        user_prompt: &str,
        prior: Option<&LayerResult>,
    ) -> LayerResult {
        let models = &self.config.reference_models;
        self.event_sender.layer_start(layer, models);
        let started = Instant::now();

        let responses = join_all(
            models
                .iter()
                .map(|model| self.invoker.invoke(model, user_prompt, prior)),
        )
        .await;

        let result = LayerResult::new(responses);
        tracing::debug!(
            layer,
            responses = result.len(),
            failures = result.failures(),
            "Layer complete"
        );
        self.event_sender
            .layer_complete(layer, result.failures(), started.elapsed());

        result
    }
}
