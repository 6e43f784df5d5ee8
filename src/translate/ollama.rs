use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{classify_http_error, classify_status, ensure_input_length, TranslateBackend, TranslateRequest};
use crate::config::BackendConfig;
use crate::error::{DecklingError, Result};

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TranslationPayload {
    text: String,
}

/// Local-model backend over the Ollama generate API. Responses are requested
/// in JSON format as `{"text": "..."}` with a plain-text cleanup fallback.
pub struct OllamaBackend {
    client: Client,
    endpoint: String,
    model: String,
    max_input_chars: usize,
}

impl OllamaBackend {
    pub fn new(config: &BackendConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("HTTP client creation should not fail");

        Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_input_chars: config.max_input_chars,
        }
    }

    fn build_prompt(&self, text: &str, request: &TranslateRequest) -> String {
        let mut prompt = format!(
            "You are a professional translator.\n\
             \n\
             Translate the following {source} text to {target}. Preserve the meaning \
             and tone of the original and do not add content.\n\
             \n\
             Return ONLY the translation in JSON format as {{\"text\":\"your {target} translation here\"}}.\n\
             Do not include any explanations, alternatives, or text in other languages.\n\
             \n\
             [Text to translate]\n\
             {text}\n\n",
            source = request.source_language,
            target = request.target_language,
            text = text,
        );

        if let Some(context) = &request.context {
            prompt.push_str(&format!(
                "[Context for reference - DO NOT translate this part]\n\
                 {}\n\n\
                 Remember: only translate the text in the [Text to translate] section above to {}.\n",
                context, request.target_language
            ));
        }

        prompt
    }

    /// Salvage a plain-text reply when the model ignored the JSON contract.
    fn clean_response(&self, response: &str) -> String {
        for line in response.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with("Here are")
                || trimmed.starts_with("Translation:")
                || trimmed.starts_with("- ")
                || trimmed.starts_with("* ")
                || (trimmed.starts_with("**") && trimmed.ends_with("**"))
            {
                continue;
            }
            if trimmed.len() > 3 {
                return trimmed.to_string();
            }
        }
        response.trim().to_string()
    }

    async fn generate(&self, prompt: String, cancel: &CancellationToken) -> Result<String> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt,
            stream: false,
            format: "json".to_string(),
        };
        let url = format!("{}/api/generate", self.endpoint);

        debug!("Sending translation request to {}", url);

        let send = self.client.post(&url).json(&request).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DecklingError::TranslationCancelled),
            result = send => result.map_err(classify_http_error)?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| DecklingError::TranslationTransient(format!("bad response body: {}", e)))?;

        let raw = generated.response.trim().to_string();
        debug!("Raw backend response: {}", raw);

        if raw.is_empty() {
            return Err(DecklingError::TranslationTransient(
                "empty response from model".to_string(),
            ));
        }

        if let Ok(payload) = serde_json::from_str::<TranslationPayload>(&raw) {
            return Ok(payload.text.trim().to_string());
        }

        Ok(self.clean_response(&raw))
    }
}

#[async_trait]
impl TranslateBackend for OllamaBackend {
    async fn translate(
        &self,
        text: &str,
        request: &TranslateRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        ensure_input_length(text, self.max_input_chars)?;
        let prompt = self.build_prompt(text, request);
        self.generate(prompt, cancel).await
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    /// Verify the endpoint is reachable and the model is pulled.
    async fn check_availability(&self) -> Result<()> {
        let url = format!("{}/api/show", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": self.model }))
            .send()
            .await
            .map_err(|e| {
                DecklingError::TranslationTransient(format!("cannot reach backend: {}", e))
            })?;

        if response.status().is_success() {
            info!("Backend model '{}' is available", self.model);
            Ok(())
        } else {
            Err(DecklingError::TranslationPermanent {
                message: format!(
                    "model '{}' not found; pull it first: ollama pull {}",
                    self.model, self.model
                ),
                auth: false,
            })
        }
    }
}
