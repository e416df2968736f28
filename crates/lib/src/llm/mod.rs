//! Ollama client and the text generator built on it.
//!
//! Supports listing models and streaming raw completions against a local or remote Ollama instance.

mod ollama;

pub use ollama::{
    GenerateOptions, OllamaClient, OllamaError, OllamaGenerator, OllamaModel, DEFAULT_BASE_URL,
};
