//! Model and sampling settings the controller turns into generation requests.

use crate::backend::{
    clamp_max_tokens, clamp_temperature, GenerationRequest, DEFAULT_MAX_TOKENS,
    DEFAULT_TEMPERATURE,
};

/// Alternate Ollama backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternateBackend {
    pub url: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model_dir: String,
    pub events_path: Option<String>,
    /// Send today's date as model context.
    pub include_date: bool,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Cut invented user turns out of finished replies.
    pub strip_fake_turns: bool,
    pub alternate: Option<AlternateBackend>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model_dir: String::new(),
            events_path: None,
            include_date: true,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            strip_fake_turns: true,
            alternate: None,
        }
    }
}

impl GenerationSettings {
    /// Plain streaming: default sampling, no sanitizing, no alternate backend.
    pub fn basic(model_dir: impl Into<String>) -> Self {
        Self {
            model_dir: model_dir.into(),
            include_date: false,
            strip_fake_turns: false,
            ..Self::default()
        }
    }

    /// Same settings with numeric fields forced into their allowed ranges.
    pub fn clamped(mut self) -> Self {
        self.max_tokens = clamp_max_tokens(Some(self.max_tokens));
        self.temperature = clamp_temperature(Some(self.temperature));
        self
    }

    pub fn request(&self, prompt: &str, current_date: Option<String>) -> GenerationRequest {
        let mut request = GenerationRequest::new(prompt, self.model_dir.clone());
        request.events_path = self.events_path.clone().filter(|p| !p.trim().is_empty());
        request.current_date = current_date.filter(|_| self.include_date);
        request.max_tokens = Some(clamp_max_tokens(Some(self.max_tokens)));
        request.temperature = Some(clamp_temperature(Some(self.temperature)));
        if let Some(alt) = &self.alternate {
            request.ollama_url = Some(alt.url.clone());
            request.ollama_model = Some(alt.model.clone());
        }
        request
    }
}

/// Today's date in long form, e.g. "Monday, October 19, 2026".
pub fn today_label() -> String {
    chrono::Local::now().format("%A, %B %-d, %Y").to_string()
}
