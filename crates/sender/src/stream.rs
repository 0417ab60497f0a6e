//! StreamHandle - one outbound stream plus its acknowledgement observer

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{Connection, ContractError, OutboundStream, StreamKind, WireMessage};
use tracing::{debug, instrument};

use crate::metrics::SenderMetrics;
use crate::observer::AckObserver;

/// Sending-side state of a stream
///
/// Moves forward only: `Open -> HalfClosed -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    HalfClosed,
    Closed,
}

/// Handle to one open outbound stream
pub struct StreamHandle {
    sender: String,
    kind: StreamKind,
    stream: Box<dyn OutboundStream>,
    observer: Arc<AckObserver>,
    /// Held for the duration of a write so a concurrent half-close cannot
    /// interleave with it.
    state: Mutex<StreamState>,
}

impl StreamHandle {
    /// Open a stream of `kind` on `connection`
    #[instrument(name = "stream_handle_open", skip(connection, metrics))]
    pub fn open(
        connection: &dyn Connection,
        sender: &str,
        kind: StreamKind,
        metrics: Arc<SenderMetrics>,
    ) -> Result<Self, ContractError> {
        let observer = Arc::new(AckObserver::new(sender, kind, metrics));
        let stream = connection.open_stream(kind, observer.clone())?;
        debug!(sender, stream = %kind, "Stream opened");

        Ok(Self {
            sender: sender.to_string(),
            kind,
            stream,
            observer,
            state: Mutex::new(StreamState::Open),
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn state(&self) -> StreamState {
        *self.lock_state()
    }

    /// Whether the collector has completed its side
    pub fn is_remote_completed(&self) -> bool {
        self.observer.is_remote_completed()
    }

    /// Enqueue a message on the stream (non-blocking)
    ///
    /// Delivery outcome is reported later through the observer.
    pub fn write(&self, message: WireMessage) -> Result<(), ContractError> {
        if message.kind() != self.kind {
            return Err(ContractError::stream_write(
                self.kind,
                format!("message for '{}' routed to wrong stream", message.kind()),
            ));
        }

        let state = self.lock_state();
        if *state != StreamState::Open {
            return Err(ContractError::StreamClosed { stream: self.kind });
        }
        self.stream.on_next(message)
    }

    /// Signal that no more writes will follow
    ///
    /// Idempotent. Returns true if this call performed the transition.
    pub fn half_close(&self) -> bool {
        let mut state = self.lock_state();
        if *state != StreamState::Open {
            return false;
        }
        *state = StreamState::HalfClosed;
        self.stream.on_completed();
        debug!(sender = %self.sender, stream = %self.kind, "Stream half-closed");
        true
    }

    /// Final transition, only valid after `half_close`
    ///
    /// Returns true if this call performed the transition.
    pub fn close(&self) -> bool {
        let mut state = self.lock_state();
        if *state != StreamState::HalfClosed {
            return false;
        }
        *state = StreamState::Closed;
        debug!(sender = %self.sender, stream = %self.kind, "Stream closed");
        true
    }

    fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The two streams a sender writes to
pub struct StreamPair {
    span: StreamHandle,
    span_chunk: StreamHandle,
}

impl StreamPair {
    /// Open both streams, span first
    pub fn open(
        connection: &dyn Connection,
        sender: &str,
        metrics: &Arc<SenderMetrics>,
    ) -> Result<Self, ContractError> {
        let span = StreamHandle::open(connection, sender, StreamKind::Span, Arc::clone(metrics))?;
        let span_chunk = match StreamHandle::open(
            connection,
            sender,
            StreamKind::SpanChunk,
            Arc::clone(metrics),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                span.half_close();
                span.close();
                return Err(e);
            }
        };
        Ok(Self { span, span_chunk })
    }

    /// Handle for the given record type
    pub fn get(&self, kind: StreamKind) -> &StreamHandle {
        match kind {
            StreamKind::Span => &self.span,
            StreamKind::SpanChunk => &self.span_chunk,
        }
    }

    pub fn half_close_all(&self) {
        for kind in StreamKind::ALL {
            self.get(kind).half_close();
        }
    }

    pub fn close_all(&self) {
        for kind in StreamKind::ALL {
            self.get(kind).close();
        }
    }
}
