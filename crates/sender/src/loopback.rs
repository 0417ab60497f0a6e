//! In-memory loopback transport
//!
//! A `ConnectionProvider` that keeps everything in process: writes are
//! recorded by a `LoopbackCollector` and acknowledged from a dedicated thread
//! per stream, the way a streaming RPC client delivers responses. Supports
//! injecting failures for tests and demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{
    Ack, AgentHeader, Connection, ConnectionOptions, ConnectionProvider, ConnectionState,
    ContractError, HeaderFactory, OutboundStream, SpanChunkMessage, SpanMessage, StreamKind,
    StreamObserver, WireMessage,
};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loopback provider configuration (failure injection)
#[derive(Debug, Default, Clone)]
pub struct LoopbackConfig {
    /// Refuse every connection attempt
    pub refuse_connections: bool,
    /// Stream kinds whose open call fails
    pub fail_streams: Vec<StreamKind>,
}

/// Server side of the loopback transport
#[derive(Default)]
pub struct LoopbackCollector {
    spans: Mutex<Vec<SpanMessage>>,
    span_chunks: Mutex<Vec<SpanChunkMessage>>,
    /// Remaining writes to fail
    fail_writes: AtomicUsize,
    /// Writes refused because the stream or connection was already closed
    late_writes: AtomicUsize,
    half_closes: Mutex<HashMap<StreamKind, usize>>,
    observers: Mutex<HashMap<StreamKind, Arc<dyn StreamObserver>>>,
    ack_slots: Mutex<HashMap<StreamKind, AckSlot>>,
    connections_opened: AtomicUsize,
    last_options: Mutex<Option<ConnectionOptions>>,
    last_header: Mutex<Option<AgentHeader>>,
    connection_state: Mutex<Option<Arc<Mutex<ConnectionState>>>>,
}

impl LoopbackCollector {
    /// Spans received, in arrival order
    pub fn spans(&self) -> Vec<SpanMessage> {
        lock(&self.spans).clone()
    }

    /// Span chunks received, in arrival order
    pub fn span_chunks(&self) -> Vec<SpanChunkMessage> {
        lock(&self.span_chunks).clone()
    }

    pub fn write_count(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Span => lock(&self.spans).len(),
            StreamKind::SpanChunk => lock(&self.span_chunks).len(),
        }
    }

    /// Fail the next `count` writes on any stream
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    pub fn late_write_count(&self) -> usize {
        self.late_writes.load(Ordering::SeqCst)
    }

    /// Number of half-close signals received for `kind`
    pub fn half_close_count(&self, kind: StreamKind) -> usize {
        lock(&self.half_closes).get(&kind).copied().unwrap_or(0)
    }

    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ConnectionOptions> {
        lock(&self.last_options).clone()
    }

    pub fn last_header(&self) -> Option<AgentHeader> {
        lock(&self.last_header).clone()
    }

    /// State of the most recently opened connection
    pub fn connection_state(&self) -> Option<ConnectionState> {
        lock(&self.connection_state)
            .as_ref()
            .map(|state| *lock(state))
    }

    /// Report a stream-level error to the client, as a failing server would
    ///
    /// Returns false if no stream of that kind was ever opened.
    pub fn inject_stream_error(&self, kind: StreamKind, message: &str) -> bool {
        let observer = lock(&self.observers).get(&kind).cloned();
        match observer {
            Some(observer) => {
                observer.on_error(&ContractError::stream_failed(kind, message));
                true
            }
            None => false,
        }
    }

    /// End the server side of a stream, as a collector finishing the call would
    ///
    /// Pending acks are still delivered, then the client observer sees
    /// completion. Later writes on that stream fail. Returns false if no stream
    /// of that kind is open.
    pub fn inject_completion(&self, kind: StreamKind) -> bool {
        let slot = lock(&self.ack_slots).get(&kind).cloned();
        slot.is_some_and(|slot| lock(&slot).take().is_some())
    }

    fn record(&self, message: WireMessage) {
        match message {
            WireMessage::Span(span) => lock(&self.spans).push(span),
            WireMessage::SpanChunk(chunk) => lock(&self.span_chunks).push(chunk),
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Connection provider backed by a `LoopbackCollector`
#[derive(Clone, Default)]
pub struct LoopbackProvider {
    config: LoopbackConfig,
    collector: Arc<LoopbackCollector>,
}

impl LoopbackProvider {
    pub fn new() -> Self {
        Self::with_config(LoopbackConfig::default())
    }

    pub fn with_config(config: LoopbackConfig) -> Self {
        Self {
            config,
            collector: Arc::new(LoopbackCollector::default()),
        }
    }

    /// Server side, for inspecting what was sent
    pub fn collector(&self) -> &Arc<LoopbackCollector> {
        &self.collector
    }
}

impl ConnectionProvider for LoopbackProvider {
    #[instrument(
        name = "loopback_open",
        skip(self, options, headers),
        fields(sender = %options.sender_name)
    )]
    async fn open(
        &self,
        options: &ConnectionOptions,
        headers: &dyn HeaderFactory,
    ) -> Result<Arc<dyn Connection>, ContractError> {
        if self.config.refuse_connections {
            return Err(ContractError::connection(
                &options.host,
                options.port,
                "connection refused",
            ));
        }

        let state = Arc::new(Mutex::new(ConnectionState::Active));
        self.collector.connections_opened.fetch_add(1, Ordering::SeqCst);
        *lock(&self.collector.last_options) = Some(options.clone());
        *lock(&self.collector.last_header) = Some(headers.header());
        *lock(&self.collector.connection_state) = Some(Arc::clone(&state));

        debug!(host = %options.host, port = options.port, "Loopback connection opened");

        Ok(Arc::new(LoopbackConnection {
            sender: options.sender_name.clone(),
            fail_streams: self.config.fail_streams.clone(),
            collector: Arc::clone(&self.collector),
            state,
            ack_channels: Mutex::new(Vec::new()),
        }))
    }
}

type AckSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Ack>>>>;

struct LoopbackConnection {
    sender: String,
    fail_streams: Vec<StreamKind>,
    collector: Arc<LoopbackCollector>,
    state: Arc<Mutex<ConnectionState>>,
    ack_channels: Mutex<Vec<AckSlot>>,
}

impl Connection for LoopbackConnection {
    fn open_stream(
        &self,
        kind: StreamKind,
        observer: Arc<dyn StreamObserver>,
    ) -> Result<Box<dyn OutboundStream>, ContractError> {
        if *lock(&self.state) != ConnectionState::Active {
            return Err(ContractError::StreamClosed { stream: kind });
        }
        if self.fail_streams.contains(&kind) {
            return Err(ContractError::stream_failed(kind, "stream open refused"));
        }

        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<Ack>();
        let pump_observer = Arc::clone(&observer);
        std::thread::Builder::new()
            .name(format!("{}-{}-ack", self.sender, kind))
            .spawn(move || {
                while let Some(ack) = ack_rx.blocking_recv() {
                    pump_observer.on_ack(ack);
                }
                pump_observer.on_completed();
            })
            .map_err(|e| ContractError::stream_failed(kind, e.to_string()))?;

        let slot: AckSlot = Arc::new(Mutex::new(Some(ack_tx)));
        lock(&self.ack_channels).push(Arc::clone(&slot));
        lock(&self.collector.observers).insert(kind, observer);
        lock(&self.collector.ack_slots).insert(kind, Arc::clone(&slot));

        Ok(Box::new(LoopbackStream {
            kind,
            collector: Arc::clone(&self.collector),
            connection_state: Arc::clone(&self.state),
            ack_tx: slot,
            half_closed: AtomicBool::new(false),
        }))
    }

    fn shutdown(&self) {
        let mut state = lock(&self.state);
        if *state == ConnectionState::Active {
            *state = ConnectionState::ShuttingDown;
            debug!(sender = %self.sender, "Loopback connection shutting down");
        }
    }

    fn shutdown_now(&self) {
        *lock(&self.state) = ConnectionState::Closed;
        for slot in lock(&self.ack_channels).iter() {
            lock(slot).take();
        }
        debug!(sender = %self.sender, "Loopback connection closed");
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }
}

struct LoopbackStream {
    kind: StreamKind,
    collector: Arc<LoopbackCollector>,
    connection_state: Arc<Mutex<ConnectionState>>,
    ack_tx: AckSlot,
    half_closed: AtomicBool,
}

impl OutboundStream for LoopbackStream {
    fn on_next(&self, message: WireMessage) -> Result<(), ContractError> {
        if *lock(&self.connection_state) == ConnectionState::Closed {
            self.collector.late_writes.fetch_add(1, Ordering::SeqCst);
            return Err(ContractError::stream_write(self.kind, "connection closed"));
        }

        if self.half_closed.load(Ordering::SeqCst) {
            self.collector.late_writes.fetch_add(1, Ordering::SeqCst);
            return Err(ContractError::StreamClosed { stream: self.kind });
        }

        let slot = lock(&self.ack_tx);
        let Some(ack_tx) = slot.as_ref() else {
            return Err(ContractError::stream_write(
                self.kind,
                "stream completed by collector",
            ));
        };

        if self.collector.take_injected_failure() {
            return Err(ContractError::stream_write(self.kind, "injected write failure"));
        }

        self.collector.record(message);
        trace!(stream = %self.kind, "Loopback write recorded");
        // Receiver only goes away with the ack thread; nothing to report then.
        let _ = ack_tx.send(Ack);
        Ok(())
    }

    fn on_completed(&self) {
        if !self.half_closed.swap(true, Ordering::SeqCst) {
            lock(&self.ack_tx).take();
            *lock(&self.collector.half_closes)
                .entry(self.kind)
                .or_insert(0) += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::StaticHeaderFactory;

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            sender_name: "loop".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9993,
        }
    }

    fn headers() -> StaticHeaderFactory {
        StaticHeaderFactory::new(AgentHeader {
            agent_id: "agent-1".to_string(),
            application_name: "demo".to_string(),
            agent_start_time: 1_700_000_000_000,
        })
    }

    struct NullObserver;

    impl StreamObserver for NullObserver {
        fn on_ack(&self, _ack: Ack) {}
        fn on_error(&self, _error: &ContractError) {}
        fn on_completed(&self) {}
    }

    #[tokio::test]
    async fn test_open_records_options_and_header() {
        let provider = LoopbackProvider::new();
        let connection = provider.open(&options(), &headers()).await.unwrap();

        let collector = provider.collector();
        assert_eq!(collector.connections_opened(), 1);
        assert_eq!(collector.last_options(), Some(options()));
        assert_eq!(collector.last_header().unwrap().agent_id, "agent-1");
        assert_eq!(connection.state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let provider = LoopbackProvider::with_config(LoopbackConfig {
            refuse_connections: true,
            ..Default::default()
        });

        let result = provider.open(&options(), &headers()).await;
        assert!(matches!(result, Err(ContractError::Connection { .. })));
        assert_eq!(provider.collector().connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_states_and_no_new_streams() {
        let provider = LoopbackProvider::new();
        let connection = provider.open(&options(), &headers()).await.unwrap();

        connection.shutdown();
        assert_eq!(connection.state(), ConnectionState::ShuttingDown);
        assert!(connection
            .open_stream(StreamKind::Span, Arc::new(NullObserver))
            .is_err());

        connection.shutdown_now();
        assert_eq!(
            provider.collector().connection_state(),
            Some(ConnectionState::Closed)
        );
    }

    #[tokio::test]
    async fn test_injected_write_failure_then_recovery() {
        let provider = LoopbackProvider::new();
        let connection = provider.open(&options(), &headers()).await.unwrap();
        let stream = connection
            .open_stream(StreamKind::Span, Arc::new(NullObserver))
            .unwrap();

        provider.collector().fail_next_writes(1);
        let message = WireMessage::Span(SpanMessage {
            transaction_id: "tx".to_string(),
            span_id: 7,
            payload: Default::default(),
        });

        assert!(stream.on_next(message.clone()).is_err());
        assert!(stream.on_next(message).is_ok());
        assert_eq!(provider.collector().write_count(StreamKind::Span), 1);
    }

    #[tokio::test]
    async fn test_injected_completion_ends_server_side_only() {
        let provider = LoopbackProvider::new();
        let collector = provider.collector();
        assert!(!collector.inject_completion(StreamKind::Span));

        let connection = provider.open(&options(), &headers()).await.unwrap();
        let stream = connection
            .open_stream(StreamKind::Span, Arc::new(NullObserver))
            .unwrap();

        assert!(collector.inject_completion(StreamKind::Span));
        assert!(!collector.inject_completion(StreamKind::Span));

        let message = WireMessage::Span(SpanMessage {
            transaction_id: "tx".to_string(),
            span_id: 1,
            payload: Default::default(),
        });
        assert!(matches!(
            stream.on_next(message),
            Err(ContractError::StreamWrite { .. })
        ));
        assert_eq!(collector.late_write_count(), 0);

        // The client may still half-close its side
        stream.on_completed();
        assert_eq!(collector.half_close_count(StreamKind::Span), 1);
    }
}
