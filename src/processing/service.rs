//! Pipeline service coordinating query structuring, ingestion, retrieval, and synthesis.

use crate::{
    config::Config,
    embedding::{EmbeddingClient, EmbeddingClientError, build_embedding_client},
    llm::{LanguageModel, LanguageModelError, build_language_model},
    metrics::{MetricsSnapshot, PipelineMetrics},
    processing::{
        documents::parse_documents,
        query::extract_query,
        retrieval::{RetrievalSettings, retrieve},
        synthesis::synthesize,
        types::{
            Capability, Decision, DecisionOutcome, PipelineError, PipelineStage, UploadedFile,
        },
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

/// Tunables for a pipeline instance.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Chunking, ranking, and embedding-call settings.
    pub retrieval: RetrievalSettings,
    /// Upper bound for each language-model call.
    pub call_timeout: Duration,
    /// Upper bound for extracting text from one uploaded file.
    pub extraction_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let retrieval = RetrievalSettings::default();
        Self {
            call_timeout: retrieval.call_timeout,
            extraction_timeout: Duration::from_secs(60),
            retrieval,
        }
    }
}

impl PipelineSettings {
    /// Derive settings from loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        let call_timeout = config.capability_timeout();
        Self {
            retrieval: RetrievalSettings {
                chunk_size: config.text_splitter_chunk_size,
                top_k: config.retrieval_top_k,
                batch_size: config.embedding_batch_size,
                call_timeout,
            },
            call_timeout,
            extraction_timeout: config.extraction_timeout(),
        }
    }
}

/// Errors raised while wiring capability clients at startup.
#[derive(Debug, Error)]
pub enum PipelineInitError {
    /// The language-model client could not be built.
    #[error("Failed to initialize language model: {0}")]
    LanguageModel(#[from] LanguageModelError),
    /// The embedding client could not be built.
    #[error("Failed to initialize embedding client: {0}")]
    Embedding(#[from] EmbeddingClientError),
}

/// Runs the four pipeline stages against injected capabilities.
///
/// Holds long-lived handles to the language model, embedding client, and metrics registry so
/// every surface (HTTP, CLI) shares them. Construct once and share through an `Arc`.
pub struct Pipeline {
    language_model: Arc<dyn LanguageModel>,
    embedder: Arc<dyn EmbeddingClient>,
    settings: PipelineSettings,
    metrics: Arc<PipelineMetrics>,
}

/// Abstraction over the pipeline used by external surfaces.
#[async_trait]
pub trait DecisionApi: Send + Sync {
    /// Adjudicate `raw_query` against the uploaded evidence.
    async fn run_pipeline(
        &self,
        raw_query: &str,
        files: Vec<UploadedFile>,
    ) -> Result<Decision, PipelineError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl Pipeline {
    /// Assemble a pipeline from explicit capabilities.
    pub fn new(
        language_model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn EmbeddingClient>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            language_model,
            embedder,
            settings,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Build capability clients from configuration and assemble a pipeline.
    pub fn from_config(config: &Config) -> Result<Self, PipelineInitError> {
        tracing::info!("Initializing capability clients");
        let language_model = build_language_model(config)?;
        let embedder = build_embedding_client(config)?;
        tracing::info!("Capability clients initialized");
        Ok(Self::new(
            language_model,
            embedder,
            PipelineSettings::from_config(config),
        ))
    }

    /// Settings in effect.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Adjudicate `raw_query` against `files`.
    ///
    /// Query structuring and document parsing run concurrently; retrieval waits for both, and
    /// synthesis waits for retrieval. Every failure is reported as a [`PipelineError`] naming the
    /// stage that failed.
    pub async fn run_pipeline(
        &self,
        raw_query: &str,
        files: Vec<UploadedFile>,
    ) -> Result<Decision, PipelineError> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("pipeline", %request_id);
        self.metrics.record_request();

        let result = self.execute(raw_query, files).instrument(span.clone()).await;
        let _entered = span.enter();
        match &result {
            Ok(decision) => {
                self.metrics.record_decision(
                    decision.decision == DecisionOutcome::InsufficientInformation,
                );
                tracing::info!(
                    stage = %PipelineStage::Completed,
                    decision = ?decision.decision,
                    amount = ?decision.amount,
                    citations = decision.clauses.len(),
                    "Decision produced"
                );
            }
            Err(error) => {
                self.metrics.record_failure();
                tracing::warn!(
                    stage = %error.stage(),
                    kind = error.kind(),
                    error = %error,
                    "Pipeline failed"
                );
            }
        }
        result
    }

    async fn execute(
        &self,
        raw_query: &str,
        files: Vec<UploadedFile>,
    ) -> Result<Decision, PipelineError> {
        tracing::info!(
            stage = %PipelineStage::Received,
            files = files.len(),
            query_chars = raw_query.chars().count(),
            "Pipeline request received"
        );
        if raw_query.trim().is_empty() {
            return Err(PipelineError::InvalidQuery);
        }

        tracing::debug!(
            stage = %PipelineStage::Structuring,
            "Structuring query and ingesting documents"
        );
        let (query, documents) = tokio::join!(
            self.with_model_timeout(
                PipelineStage::Structuring,
                extract_query(self.language_model.as_ref(), raw_query),
            ),
            parse_documents(files, self.settings.extraction_timeout),
        );
        let empty = documents
            .iter()
            .filter(|document| document.text.trim().is_empty())
            .count();
        self.metrics.record_documents(documents.len() as u64, empty as u64);
        tracing::info!(
            stage = %PipelineStage::Ingesting,
            documents = documents.len(),
            empty,
            "Documents parsed"
        );
        let query = query?;

        tracing::debug!(stage = %PipelineStage::Retrieving, "Retrieving clauses");
        let outcome = retrieve(
            self.embedder.as_ref(),
            &documents,
            &query,
            &self.settings.retrieval,
        )
        .await?;
        self.metrics.record_chunks_embedded(outcome.chunks_embedded as u64);
        if outcome.clauses.is_empty() && documents.len() > empty {
            tracing::warn!("Documents contained text but no clause was retrieved");
        }
        tracing::info!(
            stage = %PipelineStage::Retrieving,
            chunks = outcome.chunks_embedded,
            clauses = outcome.clauses.len(),
            "Grounding set assembled"
        );

        tracing::debug!(stage = %PipelineStage::Synthesizing, "Synthesizing decision");
        self.with_model_timeout(
            PipelineStage::Synthesizing,
            synthesize(self.language_model.as_ref(), &query, &outcome.clauses),
        )
        .await
    }

    async fn with_model_timeout<T>(
        &self,
        stage: PipelineStage,
        call: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        tokio::time::timeout(self.settings.call_timeout, call)
            .await
            .map_err(|_| PipelineError::CapabilityTimeout {
                stage,
                capability: Capability::LanguageModel,
            })?
    }

    /// Return the current pipeline metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl DecisionApi for Pipeline {
    async fn run_pipeline(
        &self,
        raw_query: &str,
        files: Vec<UploadedFile>,
    ) -> Result<Decision, PipelineError> {
        Pipeline::run_pipeline(self, raw_query, files).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        Pipeline::metrics_snapshot(self)
    }
}
