//! Core data types and error definitions for the decision pipeline.

use crate::embedding::EmbeddingClientError;
use crate::llm::LanguageModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Facts extracted from the free-text claim query.
///
/// Absent facts stay `None`; the structurer never invents values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    /// Claimant age in years.
    pub age: Option<u32>,
    /// Claimant gender as stated.
    pub gender: Option<String>,
    /// Medical procedure or claim subject.
    pub procedure: Option<String>,
    /// Location where the procedure took place.
    pub location: Option<String>,
    /// Age of the policy in months.
    pub policy_duration_months: Option<f64>,
}

impl StructuredQuery {
    /// Text embedded to rank clauses: `procedure` and `location`, space separated.
    ///
    /// Missing fields contribute nothing; the result may be empty.
    pub fn search_text(&self) -> String {
        [self.procedure.as_deref(), self.location.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Raw file handed to the pipeline by a transport.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Original file name, used for format detection.
    pub name: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Normalized text extracted from one supported upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedDocument {
    /// Original file name.
    pub name: String,
    /// Extracted text; empty when extraction failed.
    pub text: String,
}

/// Contiguous slice of a document's text used as the retrieval unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Chunk text, verbatim from the document.
    pub text: String,
    /// Name of the originating document.
    pub source_name: String,
    /// Zero-based position of the chunk within its document.
    pub chunk_index: usize,
}

/// Chunk selected for the grounding set together with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedClause {
    /// The retrieved chunk.
    #[serde(flatten)]
    pub chunk: Chunk,
    /// Position of the source document in the submitted batch.
    pub document_index: usize,
    /// Cosine similarity to the search text; higher is more relevant.
    pub score: f32,
}

/// Final verdict category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// The claim is covered.
    Approved,
    /// The claim is not covered.
    Denied,
    /// The grounding set could not support a verdict.
    InsufficientInformation,
}

impl DecisionOutcome {
    /// Parse the model's verdict label, accepting a few common synonyms.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "approved" | "approve" | "accepted" => Some(Self::Approved),
            "denied" | "deny" | "rejected" => Some(Self::Denied),
            "insufficient_information" | "insufficient_info" => {
                Some(Self::InsufficientInformation)
            }
            _ => None,
        }
    }
}

/// Structured adjudication result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// Verdict.
    pub decision: DecisionOutcome,
    /// Payable amount, when the policy text supports one.
    pub amount: Option<f64>,
    /// Model-written rationale.
    pub justification: String,
    /// Supporting clause text, drawn only from the grounding set.
    pub clauses: Vec<String>,
}

impl Decision {
    /// Outcome used when retrieval produced no clauses.
    pub fn insufficient_information() -> Self {
        Self {
            decision: DecisionOutcome::InsufficientInformation,
            amount: None,
            justification: "No relevant policy clauses were found in the supplied documents, \
                            so the claim cannot be evaluated."
                .to_string(),
            clauses: Vec::new(),
        }
    }
}

/// Stages of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Request accepted, nothing started.
    Received,
    /// Extracting the structured query.
    Structuring,
    /// Parsing uploaded documents.
    Ingesting,
    /// Chunking, embedding, and ranking.
    Retrieving,
    /// Asking the model for a grounded decision.
    Synthesizing,
    /// Decision produced.
    Completed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Received => "received",
            Self::Structuring => "structuring",
            Self::Ingesting => "ingesting",
            Self::Retrieving => "retrieving",
            Self::Synthesizing => "synthesizing",
            Self::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// External capability involved in a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Text completion provider.
    LanguageModel,
    /// Embedding provider.
    Embedding,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LanguageModel => f.write_str("language model"),
            Self::Embedding => f.write_str("embedding"),
        }
    }
}

/// Structured failure of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The raw query was blank.
    #[error("Query text must not be empty")]
    InvalidQuery,
    /// The model's extraction output did not match the structured query shape.
    #[error("Malformed query extraction: {reason}")]
    MalformedExtraction {
        /// Offending model output.
        raw: String,
        /// What failed validation.
        reason: String,
    },
    /// The model's decision output did not match the decision shape.
    #[error("Malformed decision: {reason}")]
    MalformedDecision {
        /// Offending model output.
        raw: String,
        /// What failed validation.
        reason: String,
    },
    /// The language model failed for a reason other than a timeout.
    #[error("Language model unavailable during {stage}: {source}")]
    LanguageModelUnavailable {
        /// Stage that issued the call.
        stage: PipelineStage,
        /// Provider error.
        #[source]
        source: LanguageModelError,
    },
    /// The embedding capability failed, so no grounding set can be built.
    #[error("Retrieval unavailable: {source}")]
    RetrievalUnavailable {
        /// Provider error.
        #[source]
        source: EmbeddingClientError,
    },
    /// A capability call exceeded its timeout.
    #[error("{capability} call timed out during {stage}")]
    CapabilityTimeout {
        /// Stage that issued the call.
        stage: PipelineStage,
        /// Capability that timed out.
        capability: Capability,
    },
}

impl PipelineError {
    /// Stage at which the pipeline failed.
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::InvalidQuery | Self::MalformedExtraction { .. } => PipelineStage::Structuring,
            Self::MalformedDecision { .. } => PipelineStage::Synthesizing,
            Self::RetrievalUnavailable { .. } => PipelineStage::Retrieving,
            Self::LanguageModelUnavailable { stage, .. }
            | Self::CapabilityTimeout { stage, .. } => *stage,
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidQuery => "invalid_query",
            Self::MalformedExtraction { .. } => "malformed_extraction",
            Self::MalformedDecision { .. } => "malformed_decision",
            Self::LanguageModelUnavailable { .. } => "language_model_unavailable",
            Self::RetrievalUnavailable { .. } => "retrieval_unavailable",
            Self::CapabilityTimeout { .. } => "capability_timeout",
        }
    }

    /// Raw model output attached to malformed-output failures.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::MalformedExtraction { raw, .. } | Self::MalformedDecision { raw, .. } => {
                Some(raw)
            }
            _ => None,
        }
    }

    /// Map a language-model failure raised while in `stage`.
    pub(crate) fn from_language_model(stage: PipelineStage, error: LanguageModelError) -> Self {
        match error {
            LanguageModelError::Timeout(_) => Self::CapabilityTimeout {
                stage,
                capability: Capability::LanguageModel,
            },
            source => Self::LanguageModelUnavailable { stage, source },
        }
    }

    /// Map an embedding failure raised during retrieval.
    pub(crate) fn from_embedding(error: EmbeddingClientError) -> Self {
        match error {
            EmbeddingClientError::Timeout(_) => Self::CapabilityTimeout {
                stage: PipelineStage::Retrieving,
                capability: Capability::Embedding,
            },
            source => Self::RetrievalUnavailable { source },
        }
    }
}
