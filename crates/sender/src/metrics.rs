//! Sender metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use contracts::{MetricsSnapshot, StreamKind};

/// Counters for a single sender
///
/// Shared by the producer path, the worker and the ack observers.
#[derive(Debug, Default)]
pub struct SenderMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Submissions accepted into the queue
    accepted_count: AtomicU64,
    /// Submissions rejected (queue full or closed)
    rejected_count: AtomicU64,
    /// Writes to the span stream
    span_written_count: AtomicU64,
    /// Writes to the span chunk stream
    span_chunk_written_count: AtomicU64,
    /// Records dropped as unsupported
    unsupported_count: AtomicU64,
    /// Conversion or write failures
    failure_count: AtomicU64,
    /// Acknowledgements received
    ack_count: AtomicU64,
    /// Stream-level errors reported by the transport
    stream_error_count: AtomicU64,
    /// Entries left in the queue at shutdown
    discarded_count: AtomicU64,
}

impl SenderMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted_count.load(Ordering::Relaxed)
    }

    pub fn inc_accepted_count(&self) {
        self.accepted_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    pub fn inc_rejected_count(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get write count for one stream
    pub fn written_count(&self, kind: StreamKind) -> u64 {
        match kind {
            StreamKind::Span => self.span_written_count.load(Ordering::Relaxed),
            StreamKind::SpanChunk => self.span_chunk_written_count.load(Ordering::Relaxed),
        }
    }

    /// Increment write count for one stream
    pub fn inc_written_count(&self, kind: StreamKind) {
        match kind {
            StreamKind::Span => self.span_written_count.fetch_add(1, Ordering::Relaxed),
            StreamKind::SpanChunk => self.span_chunk_written_count.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn unsupported_count(&self) -> u64 {
        self.unsupported_count.load(Ordering::Relaxed)
    }

    pub fn inc_unsupported_count(&self) {
        self.unsupported_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_count(&self) -> u64 {
        self.ack_count.load(Ordering::Relaxed)
    }

    pub fn inc_ack_count(&self) {
        self.ack_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_error_count(&self) -> u64 {
        self.stream_error_count.load(Ordering::Relaxed)
    }

    pub fn inc_stream_error_count(&self) {
        self.stream_error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discarded_count(&self) -> u64 {
        self.discarded_count.load(Ordering::Relaxed)
    }

    pub fn add_discarded_count(&self, count: u64) {
        self.discarded_count.fetch_add(count, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            accepted_count: self.accepted_count(),
            rejected_count: self.rejected_count(),
            span_written_count: self.written_count(StreamKind::Span),
            span_chunk_written_count: self.written_count(StreamKind::SpanChunk),
            unsupported_count: self.unsupported_count(),
            failure_count: self.failure_count(),
            ack_count: self.ack_count(),
            stream_error_count: self.stream_error_count(),
            discarded_count: self.discarded_count(),
        }
    }
}
