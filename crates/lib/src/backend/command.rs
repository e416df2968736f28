//! The generation command: template the prompt, pick an engine, stream onto the token channel.

use async_trait::async_trait;
use std::sync::Arc;

use super::{
    build_prompt, clamp_max_tokens, clamp_temperature, BackendError, GenerationBackend,
    GenerationRequest, SamplingOptions, TextGenerator,
};
use crate::channels::Emitter;
use crate::llm::{OllamaClient, OllamaGenerator};

/// Runs generation requests and publishes every fragment through `emitter`.
///
/// Requests carrying an Ollama url and model go to that server; everything else goes to the
/// local generator, if one was attached.
pub struct CommandBackend {
    emitter: Emitter,
    local: Option<Arc<dyn TextGenerator>>,
    http: reqwest::Client,
}

impl CommandBackend {
    pub fn new(emitter: Emitter) -> Self {
        Self {
            emitter,
            local: None,
            http: reqwest::Client::new(),
        }
    }

    /// Engine used when a request does not select an alternate backend.
    pub fn with_local_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.local = Some(generator);
        self
    }

    fn select_generator(
        &self,
        request: &GenerationRequest,
    ) -> Result<Arc<dyn TextGenerator>, BackendError> {
        if let Some((url, model)) = request.alternate_backend() {
            let client = OllamaClient::with_http(Some(url.to_string()), self.http.clone());
            return Ok(Arc::new(OllamaGenerator::new(client, model)));
        }
        self.local
            .clone()
            .ok_or_else(|| BackendError::ModelNotLoaded(request.model_dir.clone()))
    }
}

#[async_trait]
impl GenerationBackend for CommandBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<(), BackendError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(BackendError::EmptyPrompt);
        }
        let options = SamplingOptions {
            max_tokens: clamp_max_tokens(request.max_tokens),
            temperature: clamp_temperature(request.temperature),
        };
        // Event retrieval reads the events file from disk.
        let text = {
            let prompt = prompt.to_string();
            let events_path = request.events_path.clone();
            let current_date = request.current_date.clone();
            tokio::task::spawn_blocking(move || {
                build_prompt(&prompt, events_path.as_deref(), current_date.as_deref())
            })
            .await
            .map_err(|e| BackendError::Generation(format!("prompt building failed: {}", e)))?
        };
        let generator = self.select_generator(&request)?;
        log::info!(
            "backend: generating with {} (max_tokens={}, temperature={})",
            generator.label(),
            options.max_tokens,
            options.temperature
        );

        let emitter = self.emitter.clone();
        let mut fragments = 0usize;
        let mut on_chunk = |chunk: &str| {
            fragments += 1;
            if emitter.emit(chunk) == 0 {
                log::debug!("backend: fragment emitted with no listener on {}", emitter.channel());
            }
        };
        let result = generator.generate_stream(&text, options, &mut on_chunk).await;
        match &result {
            Ok(()) => log::debug!("backend: finished after {} fragments", fragments),
            Err(e) => log::warn!("backend: failed after {} fragments: {}", fragments, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{EventHub, EventSource, TOKEN_CHANNEL};
    use std::sync::Mutex;

    /// Records the prompt it was given and replays fixed chunks.
    struct Scripted {
        chunks: Vec<&'static str>,
        seen: Mutex<Vec<(String, SamplingOptions)>>,
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        fn label(&self) -> String {
            "scripted".to_string()
        }

        async fn generate_stream(
            &self,
            prompt: &str,
            options: SamplingOptions,
            on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
        ) -> Result<(), BackendError> {
            self.seen.lock().unwrap().push((prompt.to_string(), options));
            for c in &self.chunks {
                on_chunk(c);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn local_generator_streams_onto_token_channel() {
        let hub = EventHub::new();
        let mut sub = hub.listen(TOKEN_CHANNEL).await.unwrap();
        let local = Arc::new(Scripted {
            chunks: vec!["Hel", "lo"],
            seen: Mutex::new(Vec::new()),
        });
        let backend =
            CommandBackend::new(hub.emitter(TOKEN_CHANNEL)).with_local_generator(local.clone());

        let mut req = GenerationRequest::new("  hi  ", "/models/tiny");
        req.max_tokens = Some(4096);
        req.temperature = Some(-3.0);
        backend.generate(req).await.unwrap();

        assert_eq!(sub.try_next_fragment().as_deref(), Some("Hel"));
        assert_eq!(sub.try_next_fragment().as_deref(), Some("lo"));
        let seen = local.seen.lock().unwrap();
        assert_eq!(seen[0].0, "<|user|>\nhi</s>\n<|assistant|>\n");
        assert_eq!(
            seen[0].1,
            SamplingOptions {
                max_tokens: 1024,
                temperature: 0.0
            }
        );
    }

    #[tokio::test]
    async fn events_file_context_reaches_the_generator() {
        let path = std::env::temp_dir().join(format!("hearth-command-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"[{"title":"Dentist","date":"2026-03-02","description":"Cleaning appointment"}]"#,
        )
        .unwrap();
        let hub = EventHub::new();
        let local = Arc::new(Scripted {
            chunks: vec!["ok"],
            seen: Mutex::new(Vec::new()),
        });
        let backend =
            CommandBackend::new(hub.emitter(TOKEN_CHANNEL)).with_local_generator(local.clone());

        let mut req = GenerationRequest::new("when is the dentist", "/m");
        req.events_path = Some(path.to_string_lossy().into_owned());
        req.current_date = Some("Monday, October 19, 2026".to_string());
        backend.generate(req).await.unwrap();

        let seen = local.seen.lock().unwrap();
        let prompt = &seen[0].0;
        assert!(prompt.starts_with("<|system|>\nToday's date: Monday, October 19, 2026.\n"));
        assert!(prompt.contains("- Dentist (2026-03-02) Cleaning appointment"));
        assert!(prompt.ends_with("<|user|>\nwhen is the dentist</s>\n<|assistant|>\n"));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn without_local_generator_reports_model_not_loaded() {
        let hub = EventHub::new();
        let backend = CommandBackend::new(hub.emitter(TOKEN_CHANNEL));
        let err = backend
            .generate(GenerationRequest::new("hi", "/models/tiny"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "model not loaded from /models/tiny");
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected_before_dispatch() {
        let hub = EventHub::new();
        let backend = CommandBackend::new(hub.emitter(TOKEN_CHANNEL));
        let err = backend
            .generate(GenerationRequest::new("   ", "/m"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::EmptyPrompt));
    }
}
