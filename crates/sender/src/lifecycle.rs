//! DataSender - owns the connection, both streams and the dispatcher
//!
//! Startup: connection -> streams -> worker.
//! Shutdown: close submissions -> half-close streams -> shut the connection
//! down -> bounded wait for the worker -> release everything.

use std::fmt;
use std::sync::Arc;

use contracts::{
    Connection, ConnectionProvider, ConnectionState, HeaderFactory, MessageConverter,
    MetricsSnapshot, SenderConfig, StreamKind,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::dispatcher::Dispatcher;
use crate::error::SenderError;
use crate::metrics::SenderMetrics;
use crate::stream::{StreamPair, StreamState};

struct Resources {
    connection: Arc<dyn Connection>,
    streams: Arc<StreamPair>,
}

enum Phase {
    Created,
    /// Connecting; the lock is not held while the provider works
    Starting,
    Running(Resources),
    /// Resources are kept for inspection after shutdown
    Stopped(Option<Resources>),
}

/// Asynchronous span sender
///
/// `submit` may be called from any thread at any time and never blocks.
/// Records submitted before `start` are queued and sent once the worker runs.
pub struct DataSender<R, C, P> {
    config: SenderConfig,
    converter: Arc<C>,
    provider: P,
    headers: Arc<dyn HeaderFactory>,
    dispatcher: Dispatcher<R>,
    metrics: Arc<SenderMetrics>,
    phase: Mutex<Phase>,
}

impl<R, C, P> DataSender<R, C, P>
where
    R: fmt::Debug + Send + 'static,
    C: MessageConverter<R> + Sync + 'static,
    P: ConnectionProvider + Sync,
{
    /// Create a sender
    ///
    /// # Errors
    /// Returns `SenderError::Construction` if the configuration is invalid.
    pub fn new(
        config: SenderConfig,
        converter: C,
        provider: P,
        headers: Arc<dyn HeaderFactory>,
    ) -> Result<Self, SenderError> {
        config.validate().map_err(SenderError::Construction)?;

        let metrics = Arc::new(SenderMetrics::new());
        let dispatcher =
            Dispatcher::new(&config.name, config.queue_capacity, Arc::clone(&metrics));

        Ok(Self {
            config,
            converter: Arc::new(converter),
            provider,
            headers,
            dispatcher,
            metrics,
            phase: Mutex::new(Phase::Created),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Submit a record for sending (non-blocking)
    ///
    /// Returns false if the queue is full or the sender is stopping.
    pub fn submit(&self, record: R) -> bool {
        self.dispatcher.submit(record)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Open the connection and both streams, then start the worker
    ///
    /// # Errors
    /// - `AlreadyStarted` if called more than once
    /// - `Connection` if the provider fails to open the connection or a stream
    /// - `StoppedDuringStart` if `stop` ran while connecting
    #[instrument(name = "data_sender_start", skip(self), fields(sender = %self.config.name))]
    pub async fn start(&self) -> Result<(), SenderError> {
        {
            let mut phase = self.phase.lock().await;
            if !matches!(*phase, Phase::Created) {
                return Err(SenderError::AlreadyStarted {
                    sender: self.config.name.clone(),
                });
            }
            *phase = Phase::Starting;
        }

        let resources = match self.connect().await {
            Ok(resources) => resources,
            Err(e) => {
                let mut phase = self.phase.lock().await;
                if matches!(*phase, Phase::Starting) {
                    *phase = Phase::Created;
                }
                return Err(e);
            }
        };

        let mut phase = self.phase.lock().await;
        if !matches!(*phase, Phase::Starting) {
            resources.streams.half_close_all();
            resources.streams.close_all();
            resources.connection.shutdown_now();
            info!(
                sender = %self.config.name,
                "Sender stopped while connecting, start abandoned"
            );
            return Err(SenderError::StoppedDuringStart {
                sender: self.config.name.clone(),
            });
        }

        // Both streams exist before the first record can be routed
        let streams = Arc::clone(&resources.streams);
        self.dispatcher.start(Arc::clone(&self.converter), streams).await;
        *phase = Phase::Running(resources);

        info!(
            sender = %self.config.name,
            host = %self.config.host,
            port = self.config.port,
            queue_capacity = self.config.queue_capacity,
            "Data sender started"
        );
        Ok(())
    }

    async fn connect(&self) -> Result<Resources, SenderError> {
        let connection = self
            .provider
            .open(&self.config.connection_options(), self.headers.as_ref())
            .await
            .map_err(|e| SenderError::connection(&self.config.name, e))?;

        match StreamPair::open(connection.as_ref(), &self.config.name, &self.metrics) {
            Ok(streams) => Ok(Resources {
                connection,
                streams: Arc::new(streams),
            }),
            Err(e) => {
                connection.shutdown_now();
                Err(SenderError::connection(&self.config.name, e))
            }
        }
    }

    /// Stop the sender
    ///
    /// Waits at most the configured shutdown timeout for the worker, then
    /// aborts it. A `start` still connecting is abandoned. Idempotent.
    #[instrument(name = "data_sender_stop", skip(self), fields(sender = %self.config.name))]
    pub async fn stop(&self) {
        self.dispatcher.close();

        let mut phase = self.phase.lock().await;
        let resources = match std::mem::replace(&mut *phase, Phase::Stopped(None)) {
            Phase::Stopped(resources) => {
                *phase = Phase::Stopped(resources);
                debug!(sender = %self.config.name, "Data sender already stopped");
                return;
            }
            Phase::Created | Phase::Starting => None,
            Phase::Running(resources) => Some(resources),
        };

        if let Some(resources) = &resources {
            resources.streams.half_close_all();
            resources.connection.shutdown();
        }

        let graceful = self
            .dispatcher
            .shutdown(self.config.shutdown_timeout())
            .await;

        if let Some(resources) = &resources {
            resources.streams.close_all();
            resources.connection.shutdown_now();
        }

        let snapshot = self.metrics.snapshot();
        info!(
            sender = %self.config.name,
            graceful,
            accepted = snapshot.accepted_count,
            rejected = snapshot.rejected_count,
            written = snapshot.written_count(),
            discarded = snapshot.discarded_count,
            "Data sender stopped"
        );

        *phase = Phase::Stopped(resources);
    }

    /// Whether `start` succeeded and `stop` has not been called
    pub async fn is_running(&self) -> bool {
        matches!(*self.phase.lock().await, Phase::Running(_))
    }

    /// Sending-side state of one stream, if the streams were opened
    pub async fn stream_state(&self, kind: StreamKind) -> Option<StreamState> {
        self.with_resources(|r| r.streams.get(kind).state()).await
    }

    /// Current connection state, if a connection was opened
    pub async fn connection_state(&self) -> Option<ConnectionState> {
        self.with_resources(|r| r.connection.state()).await
    }

    async fn with_resources<T>(&self, f: impl FnOnce(&Resources) -> T) -> Option<T> {
        match &*self.phase.lock().await {
            Phase::Running(resources) | Phase::Stopped(Some(resources)) => Some(f(resources)),
            _ => None,
        }
    }
}
