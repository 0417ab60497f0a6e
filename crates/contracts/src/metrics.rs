//! Sender metrics snapshot (for reporting)

use serde::{Deserialize, Serialize};

/// Point-in-time copy of one sender's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub accepted_count: u64,
    pub rejected_count: u64,
    pub span_written_count: u64,
    pub span_chunk_written_count: u64,
    pub unsupported_count: u64,
    pub failure_count: u64,
    pub ack_count: u64,
    pub stream_error_count: u64,
    pub discarded_count: u64,
}

impl MetricsSnapshot {
    /// Records written to either stream
    pub fn written_count(&self) -> u64 {
        self.span_written_count + self.span_chunk_written_count
    }
}
