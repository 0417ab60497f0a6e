//! # Integration Tests
//!
//! End-to-end scenarios for the span sender against the loopback transport.
//!
//! Covers:
//! - Ordered, per-type routing through the worker
//! - Backpressure on a full queue
//! - Shutdown sequencing, idempotence and the bounded wait

#[cfg(test)]
mod contract_tests {
    #[test]
    fn test_contracts_compile() {
        let config = contracts::SenderConfig::new("span", "localhost", 9993);
        assert_eq!(config.queue_capacity, contracts::DEFAULT_QUEUE_CAPACITY);
        assert_eq!(contracts::StreamKind::ALL.len(), 2);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use contracts::{
        AgentHeader, ConnectionState, ContractError, ConvertedMessage, HeaderFactory,
        MessageConverter, SenderConfig, SpanChunkMessage, SpanMessage, StaticHeaderFactory,
        StreamKind,
    };
    use sender::{DataSender, LoopbackProvider, StreamState};
    use tokio::sync::Semaphore;
    use tokio::time::{sleep, Instant};

    /// Domain record produced by an instrumented application
    #[derive(Debug, Clone)]
    enum TraceRecord {
        Span { tx: &'static str, id: i64 },
        Chunk { tx: &'static str, id: i64, seq: u32 },
        Metric(&'static str),
        /// Takes `delay` to convert
        Slow { id: i64, delay: Duration },
        /// Converts only once the gate grants a permit
        Gated { id: i64 },
    }

    struct TraceConverter {
        gate: Arc<Semaphore>,
        /// Gated records currently waiting on the gate
        waiting: Arc<AtomicUsize>,
    }

    impl TraceConverter {
        fn new() -> Self {
            Self {
                gate: Arc::new(Semaphore::new(0)),
                waiting: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn span(tx: &str, id: i64) -> ConvertedMessage<TraceRecord> {
            ConvertedMessage::Span(SpanMessage {
                transaction_id: tx.to_string(),
                span_id: id,
                payload: Bytes::from(format!("span-{id}")),
            })
        }
    }

    impl MessageConverter<TraceRecord> for TraceConverter {
        async fn convert(
            &self,
            record: TraceRecord,
        ) -> Result<ConvertedMessage<TraceRecord>, ContractError> {
            match record {
                TraceRecord::Span { tx, id } => Ok(Self::span(tx, id)),
                TraceRecord::Chunk { tx, id, seq } => {
                    Ok(ConvertedMessage::SpanChunk(SpanChunkMessage {
                        transaction_id: tx.to_string(),
                        span_id: id,
                        sequence: seq,
                        payload: Bytes::new(),
                    }))
                }
                TraceRecord::Slow { id, delay } => {
                    sleep(delay).await;
                    Ok(Self::span("slow", id))
                }
                TraceRecord::Gated { id } => {
                    self.waiting.fetch_add(1, Ordering::SeqCst);
                    self.gate
                        .acquire()
                        .await
                        .map_err(|e| ContractError::conversion(e.to_string()))?
                        .forget();
                    self.waiting.fetch_sub(1, Ordering::SeqCst);
                    Ok(Self::span("gated", id))
                }
                metric @ TraceRecord::Metric(_) => Ok(ConvertedMessage::Unsupported(metric)),
            }
        }
    }

    type TestSender = DataSender<TraceRecord, TraceConverter, LoopbackProvider>;

    fn headers() -> Arc<dyn HeaderFactory> {
        Arc::new(StaticHeaderFactory::new(AgentHeader {
            agent_id: "agent-e2e".to_string(),
            application_name: "checkout".to_string(),
            agent_start_time: 1_700_000_000_000,
        }))
    }

    struct Gate {
        permits: Arc<Semaphore>,
        waiting: Arc<AtomicUsize>,
    }

    fn build(config: SenderConfig) -> (TestSender, LoopbackProvider, Gate) {
        let provider = LoopbackProvider::new();
        let converter = TraceConverter::new();
        let gate = Gate {
            permits: Arc::clone(&converter.gate),
            waiting: Arc::clone(&converter.waiting),
        };
        let sender = DataSender::new(config, converter, provider.clone(), headers()).unwrap();
        (sender, provider, gate)
    }

    fn span(id: i64) -> TraceRecord {
        TraceRecord::Span { tx: "tx-1", id }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            sleep(Duration::from_millis(5)).await;
        }
    }

    /// Every submission within capacity is accepted and arrives in order on
    /// its own stream.
    #[tokio::test]
    async fn test_e2e_ordered_delivery_per_stream() {
        let (sender, provider, _gate) = build(SenderConfig::new("agent", "localhost", 9993));
        sender.start().await.unwrap();

        for i in 0..50 {
            assert!(sender.submit(span(i)));
            assert!(sender.submit(TraceRecord::Chunk {
                tx: "tx-1",
                id: i,
                seq: i as u32,
            }));
        }

        let collector = provider.collector();
        wait_until(|| collector.write_count(StreamKind::Span) == 50).await;
        wait_until(|| collector.write_count(StreamKind::SpanChunk) == 50).await;

        let spans: Vec<i64> = collector.spans().iter().map(|s| s.span_id).collect();
        let seqs: Vec<u32> = collector.span_chunks().iter().map(|c| c.sequence).collect();
        assert_eq!(spans, (0..50).collect::<Vec<_>>());
        assert_eq!(seqs, (0..50).collect::<Vec<_>>());

        // Acks arrive asynchronously on the transport threads
        wait_until(|| sender.metrics().ack_count == 100).await;

        sender.stop().await;
    }

    /// capacity = 3, worker not yet running: A, B, C accepted, D rejected;
    /// once the worker runs A, B, C are written in that order.
    #[tokio::test]
    async fn test_e2e_capacity_scenario() {
        let config = SenderConfig::new("agent", "localhost", 9993).with_queue_capacity(3);
        let (sender, provider, _gate) = build(config);

        assert!(sender.submit(span(1)));
        assert!(sender.submit(span(2)));
        assert!(sender.submit(span(3)));
        assert!(!sender.submit(span(4)));

        sender.start().await.unwrap();

        let collector = provider.collector();
        wait_until(|| collector.write_count(StreamKind::Span) == 3).await;
        let ids: Vec<i64> = collector.spans().iter().map(|s| s.span_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        sender.stop().await;
        assert_eq!(collector.write_count(StreamKind::Span), 3);
        assert_eq!(sender.metrics().rejected_count, 1);
    }

    /// A blocked worker fills the queue; every further submit returns false
    /// immediately.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_backpressure_with_blocked_worker() {
        let config = SenderConfig::new("agent", "localhost", 9993).with_queue_capacity(4);
        let (sender, provider, gate) = build(config);
        sender.start().await.unwrap();

        // Worker picks this up and blocks on the gate
        assert!(sender.submit(TraceRecord::Gated { id: 0 }));
        wait_until(|| gate.waiting.load(Ordering::SeqCst) == 1).await;

        for i in 1..=4 {
            assert!(sender.submit(span(i)));
        }

        let started = Instant::now();
        let rejected = (5..105).filter(|i| !sender.submit(span(*i))).count();
        assert_eq!(rejected, 100);
        assert!(started.elapsed() < Duration::from_millis(100));

        gate.permits.add_permits(1);
        let collector = provider.collector();
        wait_until(|| collector.write_count(StreamKind::Span) == 5).await;
        let ids: Vec<i64> = collector.spans().iter().map(|s| s.span_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);

        sender.stop().await;
    }

    /// Producers on many threads share one sender; each producer's records
    /// keep their relative order.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_concurrent_producers() {
        let (sender, provider, _gate) = build(SenderConfig::new("agent", "localhost", 9993));
        sender.start().await.unwrap();

        const PRODUCERS: i64 = 4;
        const PER_PRODUCER: i64 = 100;

        std::thread::scope(|scope| {
            for producer in 0..PRODUCERS {
                let sender = &sender;
                scope.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        assert!(sender.submit(span(producer * 1000 + i)));
                    }
                });
            }
        });

        let collector = provider.collector();
        let total = (PRODUCERS * PER_PRODUCER) as usize;
        wait_until(|| collector.write_count(StreamKind::Span) == total).await;

        let ids: Vec<i64> = collector.spans().iter().map(|s| s.span_id).collect();
        for producer in 0..PRODUCERS {
            let own: Vec<i64> = ids
                .iter()
                .copied()
                .filter(|id| id / 1000 == producer)
                .collect();
            let expected: Vec<i64> = (0..PER_PRODUCER).map(|i| producer * 1000 + i).collect();
            assert_eq!(own, expected);
        }

        sender.stop().await;
    }

    /// Unsupported records reach neither stream.
    #[tokio::test]
    async fn test_e2e_unsupported_record_is_dropped() {
        let (sender, provider, _gate) = build(SenderConfig::new("agent", "localhost", 9993));
        sender.start().await.unwrap();

        assert!(sender.submit(TraceRecord::Metric("cpu")));
        assert!(sender.submit(span(1)));

        let collector = provider.collector();
        wait_until(|| collector.write_count(StreamKind::Span) == 1).await;
        assert_eq!(collector.write_count(StreamKind::SpanChunk), 0);
        assert_eq!(sender.metrics().unsupported_count, 1);

        sender.stop().await;
    }

    /// After stop: no writes, connection closed, submit refused; a second
    /// stop has no effect.
    #[tokio::test]
    async fn test_e2e_stop_is_final_and_idempotent() {
        let (sender, provider, _gate) = build(SenderConfig::new("agent", "localhost", 9993));
        sender.start().await.unwrap();

        assert!(sender.submit(span(1)));
        let collector = provider.collector();
        wait_until(|| collector.write_count(StreamKind::Span) == 1).await;

        sender.stop().await;
        assert!(!sender.submit(span(2)));
        sender.stop().await;

        sleep(Duration::from_millis(50)).await;
        assert_eq!(collector.write_count(StreamKind::Span), 1);
        assert_eq!(collector.late_write_count(), 0);
        assert_eq!(collector.half_close_count(StreamKind::Span), 1);
        assert_eq!(collector.half_close_count(StreamKind::SpanChunk), 1);
        assert_eq!(collector.connection_state(), Some(ConnectionState::Closed));
        assert_eq!(sender.stream_state(StreamKind::Span).await, Some(StreamState::Closed));
        assert!(!sender.is_running().await);
    }

    /// A worker stuck on a long conversion does not hold stop() past the
    /// configured timeout.
    #[tokio::test]
    async fn test_e2e_stop_bounded_by_timeout() {
        let config = SenderConfig::new("agent", "localhost", 9993)
            .with_shutdown_timeout(Duration::from_millis(300));
        let (sender, provider, _gate) = build(config);
        sender.start().await.unwrap();

        assert!(sender.submit(TraceRecord::Slow {
            id: 1,
            delay: Duration::from_secs(30),
        }));
        assert!(sender.submit(span(2)));
        wait_until(|| sender.metrics().queue_len == 1).await;

        let started = Instant::now();
        sender.stop().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(1500), "stop took {elapsed:?}");
        assert_eq!(provider.collector().write_count(StreamKind::Span), 0);
        // The record queued behind the stuck one is accounted for
        assert_eq!(sender.metrics().discarded_count, 1);
        assert_eq!(sender.metrics().queue_len, 0);
        assert_eq!(
            provider.collector().connection_state(),
            Some(ConnectionState::Closed)
        );
    }

    /// Write failures and remote stream errors are logged only; the stream
    /// stays usable.
    #[tokio::test]
    async fn test_e2e_transport_errors_are_contained() {
        let (sender, provider, _gate) = build(SenderConfig::new("agent", "localhost", 9993));
        sender.start().await.unwrap();
        let collector = provider.collector();

        collector.fail_next_writes(2);
        for i in 0..4 {
            assert!(sender.submit(span(i)));
        }
        assert!(collector.inject_stream_error(StreamKind::Span, "server reset"));

        wait_until(|| collector.write_count(StreamKind::Span) == 2).await;
        let ids: Vec<i64> = collector.spans().iter().map(|s| s.span_id).collect();
        assert_eq!(ids, vec![2, 3]);

        let metrics = sender.metrics();
        assert_eq!(metrics.failure_count, 2);
        assert_eq!(metrics.stream_error_count, 1);
        assert_eq!(sender.stream_state(StreamKind::Span).await, Some(StreamState::Open));

        sender.stop().await;
    }

    /// The provider sees the identifying parameters and the agent header.
    #[tokio::test]
    async fn test_e2e_connection_parameters() {
        let (sender, provider, _gate) = build(SenderConfig::new("agent", "collector.local", 9993));
        sender.start().await.unwrap();

        let collector = provider.collector();
        let options = collector.last_options().unwrap();
        assert_eq!(options.host, "collector.local");
        assert_eq!(options.sender_name, "agent");
        assert_eq!(collector.last_header().unwrap().application_name, "checkout");

        sender.stop().await;
        assert!(collector.connections_opened() == 1);
    }

    #[test]
    fn test_e2e_metrics_export_without_recorder() {
        let snapshot = contracts::MetricsSnapshot {
            accepted_count: 3,
            ..Default::default()
        };
        observability::record_sender_metrics("agent", &snapshot);
        let mut tracker = observability::ThroughputTracker::new();
        assert_eq!(tracker.update(snapshot, Duration::from_secs(1)).accepted, 3);
    }
}
