//! Language-model capability used for query structuring and decision synthesis.
//!
//! The pipeline only relies on [`LanguageModel::complete`]: a prompt goes in, the raw model text
//! comes out. Both adapters request JSON-formatted output, but validating the shape is left to
//! the caller so that the offending text can be attached to the failure.

use crate::config::{Config, LlmProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while asking the language model for a completion.
#[derive(Debug, Error)]
pub enum LanguageModelError {
    /// Provider was unreachable or the client could not be constructed.
    #[error("Language model unavailable: {0}")]
    Unavailable(String),
    /// Provider did not answer within the configured timeout.
    #[error("Language model timed out: {0}")]
    Timeout(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response envelope could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by language-model providers.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt` and return the raw model output.
    async fn complete(&self, prompt: &str) -> Result<String, LanguageModelError>;
}

/// Build a language-model client based on configuration.
pub fn build_language_model(
    config: &Config,
) -> Result<Arc<dyn LanguageModel>, LanguageModelError> {
    let timeout = config.capability_timeout();
    let model: Arc<dyn LanguageModel> = match config.llm_provider {
        LlmProvider::Ollama => Arc::new(OllamaLanguageModel::new(
            config.ollama_base_url(),
            config.llm_model.clone(),
            timeout,
        )?),
        LlmProvider::OpenAI => Arc::new(OpenAiLanguageModel::new(
            config.openai_base_url(),
            config.openai_api_key.clone().unwrap_or_default(),
            config.llm_model.clone(),
            timeout,
        )?),
    };
    tracing::debug!(
        provider = ?config.llm_provider,
        model = %config.llm_model,
        "Language model client initialized"
    );
    Ok(model)
}

fn build_http_client(timeout: Duration) -> Result<Client, LanguageModelError> {
    Client::builder()
        .user_agent("rusty-claims/complete")
        .timeout(timeout)
        .build()
        .map_err(|error| {
            LanguageModelError::Unavailable(format!("failed to build HTTP client: {error}"))
        })
}

fn map_send_error(error: reqwest::Error, endpoint: &str) -> LanguageModelError {
    if error.is_timeout() {
        LanguageModelError::Timeout(format!("request to {endpoint} timed out"))
    } else {
        LanguageModelError::Unavailable(format!("failed to reach {endpoint}: {error}"))
    }
}

/// Body reads are covered by the client timeout too, so a stalled body is a timeout.
fn map_decode_error(error: reqwest::Error, provider: &str) -> LanguageModelError {
    if error.is_timeout() {
        LanguageModelError::Timeout(format!("{provider} response body timed out"))
    } else {
        LanguageModelError::InvalidResponse(format!(
            "failed to decode {provider} response: {error}"
        ))
    }
}

async fn ensure_success(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, LanguageModelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(LanguageModelError::Unavailable(format!(
            "endpoint {endpoint} returned 404"
        )));
    }
    let body = response.text().await.unwrap_or_default();
    Err(LanguageModelError::GenerationFailed(format!(
        "{endpoint} returned {status}: {body}"
    )))
}

/// Ollama completions via the non-streaming `/api/generate` endpoint.
pub struct OllamaLanguageModel {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaLanguageModel {
    /// Create a client for the Ollama runtime at `base_url`.
    pub fn new(
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, LanguageModelError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            base_url,
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl LanguageModel for OllamaLanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String, LanguageModelError> {
        let endpoint = self.endpoint();
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": 0.0,
            }
        });

        let response = self
            .http
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|error| map_send_error(error, &endpoint))?;
        let response = ensure_success(response, &endpoint).await?;

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|error| map_decode_error(error, "Ollama"))?;

        if !body.done {
            return Err(LanguageModelError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

/// OpenAI-compatible chat completions via `/v1/chat/completions`.
pub struct OpenAiLanguageModel {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiLanguageModel {
    /// Create a client for an OpenAI-compatible endpoint.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, LanguageModelError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            base_url,
            api_key,
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiLanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String, LanguageModelError> {
        let endpoint = self.endpoint();
        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.0,
            "response_format": { "type": "json_object" },
        });

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| map_send_error(error, &endpoint))?;
        let response = ensure_success(response, &endpoint).await?;

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| map_decode_error(error, "OpenAI"))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| {
                LanguageModelError::InvalidResponse(
                    "completion contained no message content".into(),
                )
            })
    }
}
