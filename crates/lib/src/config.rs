//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.hearth/config.json`) and environment.
//! Missing keys fall back to defaults; a missing file is the same as `{}`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backend::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::llm::DEFAULT_BASE_URL;
use crate::session::{AlternateBackend, GenerationSettings};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory holding local model assets (default ~/.hearth/model).
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    /// JSON file of past events used as retrieval context.
    #[serde(default)]
    pub events_path: Option<PathBuf>,

    /// Sampling and reply post-processing.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Alternate Ollama backend for every request.
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Engine serving requests that do not select the alternate backend.
    #[serde(default)]
    pub local: LocalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Token budget per reply (clamped to 1..=1024, default 128).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature (clamped to 0..=2, default 0 = greedy).
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Cut model-invented "User:" turns from replies (default true).
    #[serde(default = "default_true")]
    pub strip_fake_turns: bool,

    /// Give the model today's date as context (default true).
    #[serde(default = "default_true")]
    pub include_date: bool,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_true() -> bool {
    true
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            strip_fake_turns: true,
            include_date: true,
        }
    }
}

/// Alternate backend. Used only when enabled and a model is named.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OllamaConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Server URL (default http://127.0.0.1:11434). Overridden by OLLAMA_HOST env.
    #[serde(default = "default_ollama_url")]
    pub url: String,

    /// Exact name from `ollama list` (e.g. "llama3.2:latest").
    pub model: Option<String>,
}

fn default_ollama_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_ollama_url(),
            model: None,
        }
    }
}

/// Local engine. Without one, requests that do not use the alternate backend fail with
/// "model not loaded".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    /// Serve local requests with this model on the Ollama server at `ollama.url`.
    pub ollama_model: Option<String>,
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Resolve the Ollama URL: env OLLAMA_HOST overrides config.
pub fn resolve_ollama_url(config: &Config) -> String {
    std::env::var("OLLAMA_HOST")
        .ok()
        .and_then(|s| non_empty(&s))
        .or_else(|| non_empty(&config.ollama.url))
        .unwrap_or_else(default_ollama_url)
}

/// Alternate backend selection when enabled and a model is set.
pub fn resolve_alternate_backend(config: &Config) -> Option<AlternateBackend> {
    if !config.ollama.enabled {
        return None;
    }
    let model = config.ollama.model.as_deref().and_then(non_empty)?;
    Some(AlternateBackend {
        url: resolve_ollama_url(config),
        model,
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("HEARTH_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".hearth").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Model directory: config value, or `model` next to the config file.
pub fn resolve_model_dir(config: &Config, config_path: &Path) -> PathBuf {
    match &config.model_dir {
        Some(d) if !d.as_os_str().is_empty() => d.clone(),
        _ => config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join("model"),
    }
}

/// Build the controller settings from config.
pub fn generation_settings(config: &Config, config_path: &Path) -> GenerationSettings {
    GenerationSettings {
        model_dir: resolve_model_dir(config, config_path)
            .to_string_lossy()
            .into_owned(),
        events_path: config
            .events_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
        include_date: config.generation.include_date,
        max_tokens: config.generation.max_tokens,
        temperature: config.generation.temperature,
        strip_fake_turns: config.generation.strip_fake_turns,
        alternate: resolve_alternate_backend(config),
    }
    .clamped()
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
