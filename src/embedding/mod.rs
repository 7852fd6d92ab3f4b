//! Embedding capability used by the clause retriever.
//!
//! Every adapter implements [`EmbeddingClient::embed`], which returns exactly one vector per
//! input text in input order. HTTP adapters talk to Ollama (`/api/embed`) or an
//! OpenAI-compatible endpoint (`/v1/embeddings`); the hashing client is a deterministic offline
//! fallback that needs no network access.

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached or the client could not be constructed.
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),
    /// Provider did not answer within the configured timeout.
    #[error("Embedding provider timed out: {0}")]
    Timeout(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be decoded or did not match the request.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, preserving order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Build an embedding client suitable for the current configuration.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    let timeout = config.capability_timeout();
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config.ollama_base_url(),
            config.embedding_model.clone(),
            timeout,
        )?),
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient::new(
            config.openai_base_url(),
            config.openai_api_key.clone().unwrap_or_default(),
            config.embedding_model.clone(),
            timeout,
        )?),
        EmbeddingProvider::Hashing => {
            Arc::new(HashingEmbeddingClient::new(config.embedding_dimension))
        }
    };
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        "Embedding client initialized"
    );
    Ok(client)
}

fn build_http_client(timeout: Duration) -> Result<Client, EmbeddingClientError> {
    Client::builder()
        .user_agent("rusty-claims/embed")
        .timeout(timeout)
        .build()
        .map_err(|error| {
            EmbeddingClientError::Unavailable(format!("failed to build HTTP client: {error}"))
        })
}

fn map_send_error(error: reqwest::Error, endpoint: &str) -> EmbeddingClientError {
    if error.is_timeout() {
        EmbeddingClientError::Timeout(format!("request to {endpoint} timed out"))
    } else {
        EmbeddingClientError::Unavailable(format!("failed to reach {endpoint}: {error}"))
    }
}

/// Body reads are covered by the client timeout too, so a stalled body is a timeout.
fn map_decode_error(error: reqwest::Error, provider: &str) -> EmbeddingClientError {
    if error.is_timeout() {
        EmbeddingClientError::Timeout(format!("{provider} response body timed out"))
    } else {
        EmbeddingClientError::InvalidResponse(format!(
            "failed to decode {provider} response: {error}"
        ))
    }
}

async fn ensure_success(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, EmbeddingClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND || status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(EmbeddingClientError::Unavailable(format!(
            "{endpoint} returned {status}: {body}"
        )));
    }
    Err(EmbeddingClientError::GenerationFailed(format!(
        "{endpoint} returned {status}: {body}"
    )))
}

fn ensure_count(expected: usize, actual: usize) -> Result<(), EmbeddingClientError> {
    if expected == actual {
        Ok(())
    } else {
        Err(EmbeddingClientError::InvalidResponse(format!(
            "expected {expected} vectors, got {actual}"
        )))
    }
}

/// Ollama embeddings via the batch `/api/embed` endpoint.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingClient {
    /// Create a client for the Ollama runtime at `base_url`.
    pub fn new(
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            base_url,
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let endpoint = self.endpoint();
        let expected = texts.len();
        tracing::debug!(model = %self.model, texts = expected, "Requesting Ollama embeddings");

        let response = self
            .http
            .post(&endpoint)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| map_send_error(error, &endpoint))?;
        let response = ensure_success(response, &endpoint).await?;

        let body: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|error| map_decode_error(error, "Ollama"))?;
        ensure_count(expected, body.embeddings.len())?;
        Ok(body.embeddings)
    }
}

/// OpenAI-compatible embeddings via `/v1/embeddings`.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbeddingClient {
    /// Create a client for an OpenAI-compatible endpoint.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            base_url,
            api_key,
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let endpoint = self.endpoint();
        let expected = texts.len();
        tracing::debug!(model = %self.model, texts = expected, "Requesting OpenAI embeddings");

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| map_send_error(error, &endpoint))?;
        let response = ensure_success(response, &endpoint).await?;

        let mut body: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|error| map_decode_error(error, "OpenAI"))?;
        ensure_count(expected, body.data.len())?;
        // The API does not promise response order.
        body.data.sort_by_key(|item| item.index);
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

/// Deterministic feature-hashing embeddings for offline runs and tests.
///
/// Lowercased alphanumeric tokens are hashed into signed buckets and the result is L2
/// normalized, so texts sharing vocabulary score higher under cosine similarity.
pub struct HashingEmbeddingClient {
    dimension: usize,
}

impl HashingEmbeddingClient {
    /// Construct a hashing client producing vectors of `dimension` entries.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket_bytes = [0_u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let position = (u64::from_le_bytes(bucket_bytes) % dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[position] += sign;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }
}
