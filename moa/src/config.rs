//! Configuration loading
//!
//! Settings come from `.moa.toml` (walked up from the working directory, then
//! `~/.config/moa/`), falling back to defaults. The API key is read from the
//! environment once at startup and never from the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::llm::{EmbeddingConfig, OpenAiConfig};

const CONFIG_FILE_NAME: &str = ".moa.toml";

/// Synthesis directive prepended to every aggregation request
pub const DEFAULT_AGGREGATOR_SYSTEM_PROMPT: &str = "You have been provided with a set of responses from various AI assistants to the latest user query.
Your task is to synthesize these responses into a single, high-quality response.
It is crucial to critically evaluate the information provided in these responses,
recognizing that some of it may be biased or incorrect.
Your response should not simply replicate the given answers but should offer a refined,
accurate, and comprehensive reply to the instruction.
Ensure your response is well-structured, coherent, and adheres to the highest standards of accuracy and reliability.

Responses from assistants:";

/// Errors that abort before any model is called
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    MissingCredential(String),

    #[error("MoA layer count must be at least 1, got {0}")]
    InvalidLayers(i64),

    #[error("At least one reference model is required")]
    NoReferenceModels,

    #[error("Aggregator model must not be empty")]
    NoAggregatorModel,

    #[error("Failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Look for `filename` in `start` and each of its ancestors
fn find_in_ancestors(start: &Path, filename: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(filename))
        .find(|candidate| candidate.is_file())
}

/// Find a config file by walking up from cwd, then checking `~/.config/moa/`
fn find_config_file(filename: &str) -> Option<PathBuf> {
    if let Some(path) = std::env::current_dir()
        .ok()
        .and_then(|cwd| find_in_ancestors(&cwd, filename))
    {
        return Some(path);
    }

    let global_path = dirs::config_dir()?.join("moa").join(filename);
    global_path.is_file().then_some(global_path)
}

// ============================================================================
// File Configuration (.moa.toml)
// ============================================================================

/// Top-level file configuration
#[derive(Debug, Default, Deserialize)]
pub struct MoaFileConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub moa: MoaSection,
    #[serde(default)]
    pub embeddings: EmbeddingsSection,
}

/// Backend connection section
#[derive(Debug, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Pipeline section
#[derive(Debug, Deserialize)]
pub struct MoaSection {
    #[serde(default = "default_reference_models")]
    pub reference_models: Vec<String>,
    #[serde(default = "default_aggregator_model")]
    pub aggregator_model: String,
    #[serde(default = "default_aggregator_system_prompt")]
    pub aggregator_system_prompt: String,
    #[serde(default = "default_layers")]
    pub layers: i64,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingsSection {
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_reference_models() -> Vec<String> {
    vec![
        "gpt-4o-mini".to_string(),
        "gpt-4.5-preview-2025-02-27".to_string(),
        "gpt-4o-2024-08-06".to_string(),
        "gpt-4-turbo-preview".to_string(),
    ]
}

fn default_aggregator_model() -> String {
    "gpt-4.5-preview".to_string()
}

fn default_aggregator_system_prompt() -> String {
    DEFAULT_AGGREGATOR_SYSTEM_PROMPT.to_string()
}

fn default_layers() -> i64 {
    1
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for MoaSection {
    fn default() -> Self {
        Self {
            reference_models: default_reference_models(),
            aggregator_model: default_aggregator_model(),
            aggregator_system_prompt: default_aggregator_system_prompt(),
            layers: default_layers(),
        }
    }
}

impl Default for EmbeddingsSection {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
        }
    }
}

impl MoaFileConfig {
    /// Load config from `.moa.toml`, or defaults when none is found
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(config_path) = find_config_file(CONFIG_FILE_NAME) {
            tracing::debug!("Loading config from: {}", config_path.display());
            return Self::load_from_path(&config_path);
        }

        tracing::debug!("No {} found, using defaults", CONFIG_FILE_NAME);
        Ok(Self::default())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Pipeline configuration from the `[moa]` section
    pub fn moa_config(&self) -> MoaConfig {
        MoaConfig {
            reference_models: self.moa.reference_models.clone(),
            aggregator_model: self.moa.aggregator_model.clone(),
            aggregator_system_prompt: self.moa.aggregator_system_prompt.clone(),
            layers: self.moa.layers,
        }
    }

    /// Chat client settings using the given credential
    pub fn openai_config(&self, credential: &ApiCredential) -> OpenAiConfig {
        OpenAiConfig::new(&self.llm.base_url, credential.key())
            .with_timeout(Duration::from_secs(self.llm.timeout_secs))
    }

    /// Embedding client settings using the given credential
    pub fn embedding_config(&self, credential: &ApiCredential) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: self.llm.base_url.clone(),
            api_key: credential.key().to_string(),
            model: self.embeddings.model.clone(),
        }
    }
}

// ============================================================================
// Pipeline Configuration
// ============================================================================

/// Immutable configuration for one orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct MoaConfig {
    /// Models queried in every reference layer, in enumeration order
    pub reference_models: Vec<String>,
    /// Model that produces the final answer
    pub aggregator_model: String,
    /// Directive placed ahead of the enumerated prior responses
    pub aggregator_system_prompt: String,
    /// Total layer count including the final aggregation
    pub layers: i64,
}

impl Default for MoaConfig {
    fn default() -> Self {
        MoaFileConfig::default().moa_config()
    }
}

impl MoaConfig {
    pub fn new(reference_models: Vec<String>, aggregator_model: impl Into<String>) -> Self {
        Self {
            reference_models,
            aggregator_model: aggregator_model.into(),
            ..Self::default()
        }
    }

    pub fn with_layers(mut self, layers: i64) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.aggregator_system_prompt = prompt.into();
        self
    }

    /// Number of reference rounds that receive prior responses
    pub fn intermediate_layers(&self) -> usize {
        usize::try_from(self.layers.saturating_sub(2)).unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layers < 1 {
            return Err(ConfigError::InvalidLayers(self.layers));
        }
        if self.reference_models.is_empty() {
            return Err(ConfigError::NoReferenceModels);
        }
        if self.aggregator_model.trim().is_empty() {
            return Err(ConfigError::NoAggregatorModel);
        }
        Ok(())
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// API key read from the process environment
#[derive(Clone)]
pub struct ApiCredential {
    key: String,
}

impl std::fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredential").field("key", &"<redacted>").finish()
    }
}

impl ApiCredential {
    /// Read the key from `var`; unset or blank is a fatal configuration error
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(Self { key }),
            _ => Err(ConfigError::MissingCredential(var.to_string())),
        }
    }

    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}
