//! Generation backend command: request shape, sampling limits, and the traits the session
//! controller and the engines meet at.
//!
//! A call resolves only to "finished" or "failed"; reply text is published on
//! [`crate::channels::TOKEN_CHANNEL`] while the call runs.

mod command;
mod prompt;
mod retrieval;

pub use command::CommandBackend;
pub use prompt::build_prompt;
pub use retrieval::{
    format_events, load_events, retrieve_context, search_events, EventRecord, RetrievalError,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::OllamaError;

pub const DEFAULT_MAX_TOKENS: u32 = 128;
pub const MAX_TOKENS_LIMIT: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Clamp a requested token budget into `[1, 1024]`; absent means 128.
pub fn clamp_max_tokens(value: Option<u32>) -> u32 {
    value
        .unwrap_or(DEFAULT_MAX_TOKENS)
        .clamp(1, MAX_TOKENS_LIMIT)
}

/// Clamp a requested temperature into `[0, 2]`; absent or NaN means 0.
pub fn clamp_temperature(value: Option<f64>) -> f64 {
    match value {
        Some(t) if !t.is_nan() => t.clamp(0.0, MAX_TEMPERATURE),
        _ => DEFAULT_TEMPERATURE,
    }
}

/// One generation call, as sent across the command boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    /// Location of the local model assets.
    pub model_dir: String,
    /// JSON file of past events used as retrieval context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_path: Option<String>,
    /// Human-readable date given to the model as context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// With `ollama_model`, redirects generation to an Ollama server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_model: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, model_dir: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model_dir: model_dir.into(),
            events_path: None,
            current_date: None,
            max_tokens: None,
            temperature: None,
            ollama_url: None,
            ollama_model: None,
        }
    }

    /// `(url, model)` when both alternate-backend fields are present and non-blank.
    pub fn alternate_backend(&self) -> Option<(&str, &str)> {
        let url = self.ollama_url.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let model = self
            .ollama_model
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?;
        Some((url, model))
    }
}

/// Clamped sampling knobs handed to an engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("model not loaded from {0}")]
    ModelNotLoaded(String),
    #[error(transparent)]
    Ollama(#[from] OllamaError),
    #[error("{0}")]
    Generation(String),
}

/// The generation command. Resolves when generation is finished; content goes out on the
/// token channel.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<(), BackendError>;
}

/// An engine that turns a fully templated prompt into streamed text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short label for logs (e.g. `ollama:llama3.2`).
    fn label(&self) -> String;

    async fn generate_stream(
        &self,
        prompt: &str,
        options: SamplingOptions,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), BackendError>;
}
