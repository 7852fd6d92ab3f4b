use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity since startup.
#[derive(Default)]
pub struct PipelineMetrics {
    requests: AtomicU64,
    decisions_completed: AtomicU64,
    insufficient_information: AtomicU64,
    failures: AtomicU64,
    documents_parsed: AtomicU64,
    documents_empty: AtomicU64,
    chunks_embedded: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the arrival of a pipeline request.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the documents produced by ingestion, counting those with no extractable text.
    pub fn record_documents(&self, parsed: u64, empty: u64) {
        self.documents_parsed.fetch_add(parsed, Ordering::Relaxed);
        self.documents_empty.fetch_add(empty, Ordering::Relaxed);
    }

    /// Record the number of chunks sent to the embedding capability.
    pub fn record_chunks_embedded(&self, chunk_count: u64) {
        self.chunks_embedded.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a finished decision.
    pub fn record_decision(&self, insufficient_information: bool) {
        self.decisions_completed.fetch_add(1, Ordering::Relaxed);
        if insufficient_information {
            self.insufficient_information.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a request that ended in a structured failure.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            decisions_completed: self.decisions_completed.load(Ordering::Relaxed),
            insufficient_information: self.insufficient_information.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            documents_parsed: self.documents_parsed.load(Ordering::Relaxed),
            documents_empty: self.documents_empty.load(Ordering::Relaxed),
            chunks_embedded: self.chunks_embedded.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Pipeline requests received.
    pub requests: u64,
    /// Requests that produced a decision (including insufficient information).
    pub decisions_completed: u64,
    /// Decisions whose verdict was insufficient information.
    pub insufficient_information: u64,
    /// Requests that ended in a structured failure.
    pub failures: u64,
    /// Documents produced by ingestion.
    pub documents_parsed: u64,
    /// Documents whose extraction produced no text.
    pub documents_empty: u64,
    /// Chunks embedded across all requests.
    pub chunks_embedded: u64,
}
