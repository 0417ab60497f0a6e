//! AckObserver - receives server responses for one outbound stream

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use contracts::{Ack, ContractError, StreamKind, StreamObserver};
use tracing::{debug, info};

use crate::error::SenderError;
use crate::metrics::SenderMetrics;

/// Logs acknowledgements, stream errors and remote completion
///
/// Runs on transport threads. Never touches worker state: it only logs,
/// counts, and records that the collector finished the stream.
#[derive(Debug)]
pub struct AckObserver {
    sender: String,
    stream: StreamKind,
    remote_completed: AtomicBool,
    metrics: Arc<SenderMetrics>,
}

impl AckObserver {
    pub fn new(sender: impl Into<String>, stream: StreamKind, metrics: Arc<SenderMetrics>) -> Self {
        Self {
            sender: sender.into(),
            stream,
            remote_completed: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Whether the collector has completed its side of the stream
    pub fn is_remote_completed(&self) -> bool {
        self.remote_completed.load(Ordering::Acquire)
    }
}

impl StreamObserver for AckObserver {
    fn on_ack(&self, _ack: Ack) {
        self.metrics.inc_ack_count();
        debug!(sender = %self.sender, stream = %self.stream, "Ack received");
    }

    fn on_error(&self, error: &ContractError) {
        self.metrics.inc_stream_error_count();
        let err = SenderError::stream_transport(&self.sender, error.clone());
        info!(sender = %self.sender, stream = %self.stream, error = %err, "Stream error");
    }

    fn on_completed(&self) {
        if !self.remote_completed.swap(true, Ordering::AcqRel) {
            debug!(sender = %self.sender, stream = %self.stream, "Stream completed by collector");
        }
    }
}
