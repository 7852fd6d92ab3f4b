//! Clause retrieval: chunk, embed, and rank document text against the structured query.

use super::chunking::chunk_document;
use super::types::{
    Capability, Chunk, ParsedDocument, PipelineError, PipelineStage, RetrievedClause,
    StructuredQuery,
};
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use futures_util::future::try_join_all;
use std::time::Duration;

/// Knobs controlling how the grounding set is built.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Number of clauses returned.
    pub top_k: usize,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Upper bound for each embedding call.
    pub call_timeout: Duration,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            top_k: 5,
            batch_size: 32,
            call_timeout: Duration::from_secs(60),
        }
    }
}

struct Candidate {
    document_index: usize,
    chunk: Chunk,
}

/// Output of [`retrieve`], including how many chunks were embedded.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    /// Top-ranked clauses, best first.
    pub clauses: Vec<RetrievedClause>,
    /// Number of chunks scored.
    pub chunks_embedded: usize,
}

/// Rank every chunk of `documents` against the query's procedure and location.
///
/// Documents with blank text contribute nothing. When no chunk remains the embedding
/// capability is not called and the result is empty.
pub async fn retrieve(
    embedder: &dyn EmbeddingClient,
    documents: &[ParsedDocument],
    query: &StructuredQuery,
    settings: &RetrievalSettings,
) -> Result<RetrievalOutcome, PipelineError> {
    let candidates = collect_candidates(documents, settings.chunk_size);
    if candidates.is_empty() {
        tracing::debug!("No non-empty chunks to rank");
        return Ok(RetrievalOutcome::default());
    }

    let search_text = query.search_text();
    let batch_size = settings.batch_size.max(1);
    let batches = candidates.chunks(batch_size).map(|batch| {
        let texts = batch.iter().map(|c| c.chunk.text.clone()).collect();
        embed_with_timeout(embedder, texts, settings.call_timeout)
    });

    tracing::debug!(
        chunks = candidates.len(),
        batch_size,
        search_text = %search_text,
        "Embedding chunks for retrieval"
    );
    let (chunk_batches, mut query_vectors) = tokio::try_join!(
        try_join_all(batches),
        embed_with_timeout(embedder, vec![search_text], settings.call_timeout)
    )?;
    let query_vector = query_vectors.pop().unwrap_or_default();
    let chunk_vectors: Vec<Vec<f32>> = chunk_batches.into_iter().flatten().collect();

    let chunks_embedded = candidates.len();
    let mut scored = Vec::with_capacity(chunks_embedded);
    for (candidate, vector) in candidates.into_iter().zip(chunk_vectors) {
        if vector.len() != query_vector.len() {
            return Err(PipelineError::RetrievalUnavailable {
                source: EmbeddingClientError::InvalidResponse(format!(
                    "embedding dimension mismatch: query has {}, chunk has {}",
                    query_vector.len(),
                    vector.len()
                )),
            });
        }
        scored.push(RetrievedClause {
            score: cosine_similarity(&query_vector, &vector),
            document_index: candidate.document_index,
            chunk: candidate.chunk,
        });
    }

    let clauses = rank(scored, settings.top_k);
    tracing::debug!(
        retrieved = clauses.len(),
        top_score = clauses.first().map(|clause| clause.score),
        "Clauses retrieved"
    );
    Ok(RetrievalOutcome {
        clauses,
        chunks_embedded,
    })
}

fn collect_candidates(documents: &[ParsedDocument], chunk_size: usize) -> Vec<Candidate> {
    documents
        .iter()
        .enumerate()
        .filter(|(_, document)| !document.text.trim().is_empty())
        .flat_map(|(document_index, document)| {
            chunk_document(document, chunk_size)
                .into_iter()
                // Whitespace-only chunks keep their index but are never scored.
                .filter(|chunk| !chunk.text.trim().is_empty())
                .map(move |chunk| Candidate {
                    document_index,
                    chunk,
                })
        })
        .collect()
}

async fn embed_with_timeout(
    embedder: &dyn EmbeddingClient,
    texts: Vec<String>,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>, PipelineError> {
    let expected = texts.len();
    let vectors = tokio::time::timeout(timeout, embedder.embed(texts))
        .await
        .map_err(|_| PipelineError::CapabilityTimeout {
            stage: PipelineStage::Retrieving,
            capability: Capability::Embedding,
        })?
        .map_err(PipelineError::from_embedding)?;

    if vectors.len() != expected {
        return Err(PipelineError::RetrievalUnavailable {
            source: EmbeddingClientError::InvalidResponse(format!(
                "expected {expected} vectors, got {}",
                vectors.len()
            )),
        });
    }
    Ok(vectors)
}

/// Sort by descending score, then document order, then chunk index, and keep `top_k`.
fn rank(mut scored: Vec<RetrievedClause>, top_k: usize) -> Vec<RetrievedClause> {
    scored.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.document_index.cmp(&right.document_index))
            .then(left.chunk.chunk_index.cmp(&right.chunk.chunk_index))
    });
    scored.truncate(top_k);
    scored
}

/// Cosine similarity; zero when either vector has no magnitude.
pub(crate) fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut left_norm = 0.0_f32;
    let mut right_norm = 0.0_f32;
    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    let score = dot / (left_norm.sqrt() * right_norm.sqrt());
    if score.is_nan() { 0.0 } else { score }
}
