//! Decision pipeline: query structuring, document ingestion, clause retrieval, and synthesis.

pub mod chunking;
pub mod documents;
mod json;
pub mod query;
pub mod retrieval;
mod service;
pub mod synthesis;
pub mod types;

pub use service::{DecisionApi, Pipeline, PipelineInitError, PipelineSettings};
pub use types::{
    Capability, Chunk, Decision, DecisionOutcome, ParsedDocument, PipelineError, PipelineStage,
    RetrievedClause, StructuredQuery, UploadedFile,
};
