use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{classify_http_error, classify_status, ensure_input_length, TranslateBackend, TranslateRequest};
use crate::config::BackendConfig;
use crate::error::{DecklingError, Result};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Hosted chat-completions backend. Credentials come from the environment
/// supplied by the host; an authentication failure is unrecoverable for the
/// job.
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    model: String,
    max_input_chars: usize,
}

impl OpenAiBackend {
    pub fn from_env(config: &BackendConfig) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| DecklingError::Config(format!("{} not set", API_KEY_ENV)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("HTTP client creation should not fail");

        Ok(Self {
            client,
            api_key,
            model: config.openai_model.clone(),
            max_input_chars: config.max_input_chars,
        })
    }

    fn system_prompt(&self, request: &TranslateRequest) -> String {
        format!(
            "You are a professional translator. Translate the user's {source} text to {target}. \
             Only output the {target} translation, nothing else. Preserve the meaning and tone \
             of the original text and do not add content.",
            source = request.source_language,
            target = request.target_language,
        )
    }

    fn user_prompt(&self, text: &str, request: &TranslateRequest) -> String {
        match &request.context {
            Some(context) => format!(
                "{}\n\n[Reference context - do not translate]\n{}",
                text, context
            ),
            None => text.to_string(),
        }
    }
}

#[async_trait]
impl TranslateBackend for OpenAiBackend {
    async fn translate(
        &self,
        text: &str,
        request: &TranslateRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        ensure_input_length(text, self.max_input_chars)?;

        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.system_prompt(request),
                },
                ChatMessage {
                    role: "user",
                    content: self.user_prompt(text, request),
                },
            ],
            temperature: 0.3,
        };

        let send = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DecklingError::TranslationCancelled),
            result = send => result.map_err(classify_http_error)?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| DecklingError::TranslationTransient(format!("bad response body: {}", e)))?;

        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(DecklingError::TranslationTransient(
                "empty completion".to_string(),
            ));
        }

        Ok(content)
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }
}
