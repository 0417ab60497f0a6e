//! Dispatcher - bounded submission queue drained by a single worker

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{ConvertedMessage, MessageConverter, WireMessage};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::error::{RejectReason, SenderError};
use crate::metrics::SenderMetrics;
use crate::stream::StreamPair;

/// Accepts records from any thread and feeds them, in order, to one worker
pub struct Dispatcher<R> {
    name: String,
    tx: mpsc::Sender<R>,
    /// Taken by the worker when it starts
    rx: Mutex<Option<mpsc::Receiver<R>>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<SenderMetrics>,
    /// Set by whichever side accounts for the leftover queue first
    drained: Arc<AtomicBool>,
}

impl<R> Dispatcher<R>
where
    R: fmt::Debug + Send + 'static,
{
    /// Create a dispatcher with a queue of `capacity` entries
    ///
    /// Submissions are queued from creation on and processed once the worker
    /// is started.
    pub fn new(name: impl Into<String>, capacity: usize, metrics: Arc<SenderMetrics>) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name: name.into(),
            tx,
            rx: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
            metrics,
            drained: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Submit a record (non-blocking)
    ///
    /// Returns true if queued, false if the queue is full or the dispatcher is
    /// closed. Never waits.
    pub fn submit(&self, record: R) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.reject(RejectReason::Closed);
            return false;
        }

        match self.tx.try_send(record) {
            Ok(()) => {
                self.metrics.inc_accepted_count();
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.reject(RejectReason::QueueFull);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.reject(RejectReason::Closed);
                false
            }
        }
    }

    fn reject(&self, reason: RejectReason) {
        self.metrics.inc_rejected_count();
        debug!(error = %SenderError::rejected(&self.name, reason), "Submission rejected");
    }

    /// Whether new submissions are refused
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse all further submissions
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(sender = %self.name, "Dispatcher closed for submissions");
        }
    }

    /// Spawn the worker
    ///
    /// The streams must already be open. Returns false if the worker was
    /// started before.
    pub async fn start<C>(&self, converter: Arc<C>, streams: Arc<StreamPair>) -> bool
    where
        C: MessageConverter<R> + Sync + 'static,
    {
        let Some(rx) = self.rx.lock().await.take() else {
            return false;
        };

        let worker = Worker {
            name: self.name.clone(),
            converter,
            streams,
            metrics: Arc::clone(&self.metrics),
            drained: Arc::clone(&self.drained),
        };
        let cancel = self.cancel.clone();
        let span = tracing::info_span!("sender_worker", sender = %self.name);
        let handle = tokio::spawn(worker.run(rx, cancel).instrument(span));

        *self.worker.lock().await = Some(handle);
        true
    }

    /// Stop the worker, waiting at most `timeout` for the in-flight entry
    ///
    /// Entries still queued are discarded, including when the worker never
    /// started. Returns false if the worker had to be aborted.
    #[instrument(name = "dispatcher_shutdown", skip(self), fields(sender = %self.name))]
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.cancel.cancel();

        let Some(mut handle) = self.worker.lock().await.take() else {
            if let Some(mut rx) = self.rx.lock().await.take() {
                let discarded = drain(&mut rx);
                report_discarded(&self.name, &self.metrics, &self.drained, discarded);
            }
            return true;
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(sender = %self.name, error = ?e, "Worker task panicked");
                true
            }
            Err(_) => {
                let err = SenderError::ShutdownTimeout {
                    sender: self.name.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                warn!(error = %err, "Forcing worker termination");
                // Cancelled worker receives nothing more, so the queue is stable
                let queued = self.tx.max_capacity() - self.tx.capacity();
                handle.abort();
                report_discarded(&self.name, &self.metrics, &self.drained, queued as u64);
                false
            }
        }
    }
}

impl<R> Drop for Dispatcher<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Close the receiver and drop everything still queued
fn drain<R>(rx: &mut mpsc::Receiver<R>) -> u64 {
    rx.close();
    let mut discarded = 0;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}

/// Account for records that will never be processed. Only the first call counts.
fn report_discarded(name: &str, metrics: &SenderMetrics, drained: &AtomicBool, discarded: u64) {
    if drained.swap(true, Ordering::AcqRel) {
        return;
    }
    if discarded > 0 {
        metrics.add_discarded_count(discarded);
        warn!(sender = %name, discarded, "Queued records discarded at shutdown");
    }
    metrics.set_queue_len(0);
}

struct Worker<C> {
    name: String,
    converter: Arc<C>,
    streams: Arc<StreamPair>,
    metrics: Arc<SenderMetrics>,
    drained: Arc<AtomicBool>,
}

impl<C> Worker<C> {
    async fn run<R>(self, mut rx: mpsc::Receiver<R>, cancel: CancellationToken)
    where
        R: fmt::Debug + Send + 'static,
        C: MessageConverter<R> + Sync,
    {
        info!(sender = %self.name, "Worker started");

        let mut processed: u64 = 0;
        loop {
            let record = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(record) => record,
                    None => break,
                },
            };
            self.metrics.set_queue_len(rx.len());
            self.process(record).await;
            processed += 1;
        }

        let discarded = drain(&mut rx);
        report_discarded(&self.name, &self.metrics, &self.drained, discarded);

        info!(sender = %self.name, processed, "Worker stopped");
    }

    /// Convert and route one record. Failures are logged, never propagated.
    async fn process<R>(&self, record: R)
    where
        R: fmt::Debug + Send,
        C: MessageConverter<R> + Sync,
    {
        let converted = match self.converter.convert(record).await {
            Ok(converted) => converted,
            Err(e) => {
                self.metrics.inc_failure_count();
                warn!(sender = %self.name, error = %e, "Conversion failed, record dropped");
                return;
            }
        };

        let message = match converted {
            ConvertedMessage::Span(span) => WireMessage::Span(span),
            ConvertedMessage::SpanChunk(chunk) => WireMessage::SpanChunk(chunk),
            ConvertedMessage::Unsupported(record) => {
                self.metrics.inc_unsupported_count();
                let err = SenderError::unsupported(&self.name, format!("{record:?}"));
                warn!(error = %err, "Unsupported record dropped");
                return;
            }
        };

        let kind = message.kind();
        match self.streams.get(kind).write(message) {
            Ok(()) => self.metrics.inc_written_count(kind),
            Err(e) => {
                self.metrics.inc_failure_count();
                let err = SenderError::stream_transport(&self.name, e);
                error!(stream = %kind, error = %err, "Write failed");
                // Stream stays open for the next record
            }
        }
    }
}
