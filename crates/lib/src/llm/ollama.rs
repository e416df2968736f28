//! Ollama API client (http://127.0.0.1:11434 by default).
//! Streams raw completions from /api/generate (NDJSON) and lists installed models.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, SamplingOptions, TextGenerator};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Client for Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("ollama request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ollama error {0}")]
    Api(String),
}

impl OllamaClient {
    pub fn new(base_url: Option<String>) -> Self {
        Self::with_http(base_url, reqwest::Client::new())
    }

    /// Reuse an existing connection pool.
    pub fn with_http(base_url: Option<String>, client: reqwest::Client) -> Self {
        let base_url = base_url
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /api/tags: list available models.
    pub async fn list_models(&self) -> Result<Vec<OllamaModel>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{}: {}", status, body)));
        }
        let data: TagsResponse = res.json().await?;
        Ok(data.models.unwrap_or_default())
    }

    /// POST /api/generate with stream: true. Calls on_chunk for each non-empty `response`
    /// in arrival order and returns the concatenated text once `done` is seen or the body ends.
    /// Lines that are not valid JSON are skipped.
    pub async fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
        options: GenerateOptions,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, OllamaError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: true,
            options: Some(options),
        };
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{}: {}", status, body)));
        }
        let mut stream = res.bytes_stream();
        let mut buffer = Vec::new();
        let mut content = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(OllamaError::Request)?;
            buffer.extend_from_slice(&chunk);
            while let Some(i) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..i).collect();
                buffer.drain(..1);
                if handle_line(&line_bytes, &mut content, on_chunk) {
                    return Ok(content);
                }
            }
        }
        // Final line without a trailing newline.
        handle_line(&buffer, &mut content, on_chunk);
        Ok(content)
    }
}

/// Apply one NDJSON line; true when it carried `done: true`.
fn handle_line(
    line_bytes: &[u8],
    content: &mut String,
    on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> bool {
    let line = String::from_utf8_lossy(line_bytes);
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    let event: GenerateChunk = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(e) => {
            log::debug!("ollama: skipping malformed stream line: {}", e);
            return false;
        }
    };
    if let Some(ref text) = event.response {
        if !text.is_empty() {
            on_chunk(text);
            content.push_str(text);
        }
    }
    event.done
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

/// Sampling options in Ollama's naming.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl From<SamplingOptions> for GenerateOptions {
    fn from(o: SamplingOptions) -> Self {
        Self {
            num_predict: Some(o.max_tokens),
            temperature: Some(o.temperature),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<OllamaModel>>,
}

/// [`TextGenerator`] backed by one model on an Ollama server.
#[derive(Clone)]
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
}

impl OllamaGenerator {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn label(&self) -> String {
        format!("ollama:{}@{}", self.model, self.client.base_url())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: SamplingOptions,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), BackendError> {
        self.client
            .generate_stream(&self.model, prompt, options.into(), on_chunk)
            .await?;
        Ok(())
    }
}
