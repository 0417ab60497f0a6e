//! Loopback Sender Example
//!
//! Drives a `DataSender` against the in-memory loopback collector: several
//! producer threads submit spans and span chunks at full speed while the
//! sender reports throughput and backpressure.
//!
//! Run with: cargo run -p demos --bin loopback_sender [config.json]
//!
//! Environment (also read from `.env`):
//! - `SPAN_SENDER_LOG_FORMAT`: json | pretty | compact (default: compact)
//! - `SPAN_SENDER_METRICS_PORT`: enable the Prometheus endpoint
//! - `SPAN_SENDER_RUN_SECS`: how long producers run (default: 3)

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use bytes::Bytes;
use contracts::{
    AgentHeader, ContractError, ConvertedMessage, MessageConverter, SenderConfig,
    SpanChunkMessage, SpanMessage, StaticHeaderFactory, StreamKind,
};
use observability::{LogFormat, ObservabilityConfig, ThroughputTracker};
use sender::{DataSender, LoopbackProvider};
use tracing::{debug, info, warn};

/// What an instrumented application hands to the sender
#[derive(Debug)]
enum TraceRecord {
    Span { transaction_id: String, span_id: i64 },
    Chunk { transaction_id: String, span_id: i64, sequence: u32 },
    /// Not a trace type; the converter refuses it
    AgentStat { cpu_load: f64 },
}

struct TraceConverter;

impl MessageConverter<TraceRecord> for TraceConverter {
    async fn convert(
        &self,
        record: TraceRecord,
    ) -> Result<ConvertedMessage<TraceRecord>, ContractError> {
        match record {
            TraceRecord::Span {
                transaction_id,
                span_id,
            } => {
                let payload = serde_json::to_vec(&(&transaction_id, span_id))
                    .map_err(|e| ContractError::conversion(e.to_string()))?;
                Ok(ConvertedMessage::Span(SpanMessage {
                    transaction_id,
                    span_id,
                    payload: Bytes::from(payload),
                }))
            }
            TraceRecord::Chunk {
                transaction_id,
                span_id,
                sequence,
            } => Ok(ConvertedMessage::SpanChunk(SpanChunkMessage {
                transaction_id,
                span_id,
                sequence,
                payload: Bytes::new(),
            })),
            TraceRecord::AgentStat { cpu_load } => {
                debug!(cpu_load, "Agent stat has no trace stream");
                Ok(ConvertedMessage::Unsupported(TraceRecord::AgentStat { cpu_load }))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_format = std::env::var("SPAN_SENDER_LOG_FORMAT")
        .ok()
        .map(|v| v.parse::<LogFormat>())
        .transpose()?
        .unwrap_or(LogFormat::Compact);
    let metrics_port = std::env::var("SPAN_SENDER_METRICS_PORT")
        .ok()
        .map(|v| v.parse::<u16>())
        .transpose()
        .context("SPAN_SENDER_METRICS_PORT must be a port number")?;
    let run_secs: u64 = std::env::var("SPAN_SENDER_RUN_SECS")
        .ok()
        .map(|v| v.parse())
        .transpose()
        .context("SPAN_SENDER_RUN_SECS must be an integer")?
        .unwrap_or(3);

    observability::init_with_config(ObservabilityConfig {
        log_format,
        metrics_port,
        ..Default::default()
    })?;

    // ==== Stage 1: Configuration ====
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {path}"))?;
            serde_json::from_str::<SenderConfig>(&content)
                .with_context(|| format!("Failed to parse config file {path}"))?
        }
        None => SenderConfig::new("loopback-agent", "127.0.0.1", 9993).with_queue_capacity(256),
    };

    // ==== Stage 2: Build and start the sender ====
    let start_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock before epoch")?
        .as_millis();
    let start_time = i64::try_from(start_time).unwrap_or(i64::MAX);
    let headers = Arc::new(StaticHeaderFactory::new(AgentHeader {
        agent_id: format!("{}-{}", config.name, std::process::id()),
        application_name: "loopback-demo".to_string(),
        agent_start_time: start_time,
    }));

    let provider = LoopbackProvider::new();
    let collector = Arc::clone(provider.collector());
    let sender = Arc::new(DataSender::new(config, TraceConverter, provider, headers)?);
    info!(config = ?sender.config(), "Sender configuration");
    sender.start().await.context("Failed to start sender")?;

    // ==== Stage 3: Producers ====
    let running = Arc::new(AtomicBool::new(true));
    let produced = Arc::new(AtomicU64::new(0));
    let mut producers = Vec::new();
    for producer in 0..4 {
        let sender = Arc::clone(&sender);
        let running = Arc::clone(&running);
        let produced = Arc::clone(&produced);
        producers.push(std::thread::spawn(move || {
            let mut span_id: i64 = 0;
            while running.load(Ordering::Relaxed) {
                span_id += 1;
                let transaction_id = format!("tx-{producer}-{}", span_id / 10);
                let record = match span_id % 10 {
                    0 => TraceRecord::AgentStat { cpu_load: 0.42 },
                    n if n % 3 == 0 => TraceRecord::Chunk {
                        transaction_id,
                        span_id,
                        sequence: n as u32,
                    },
                    _ => TraceRecord::Span {
                        transaction_id,
                        span_id,
                    },
                };
                sender.submit(record);
                produced.fetch_add(1, Ordering::Relaxed);
                if span_id % 64 == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }));
    }

    // ==== Stage 4: Report ====
    let mut tracker = ThroughputTracker::new();
    let interval = Duration::from_secs(1);
    for _ in 0..run_secs {
        tokio::time::sleep(interval).await;
        let snapshot = sender.metrics();
        observability::record_sender_metrics(sender.name(), &snapshot);
        let summary = tracker.update(snapshot, interval);
        info!(
            accepted = summary.accepted,
            rejected = summary.rejected,
            written = summary.written,
            write_rate = format!("{:.0}/s", summary.write_rate),
            reject_rate = format!("{:.1}%", summary.reject_rate),
            queue_len = summary.queue_len,
            "Sender throughput"
        );
    }

    // ==== Stage 5: Shutdown ====
    running.store(false, Ordering::Relaxed);
    for producer in producers {
        if producer.join().is_err() {
            warn!("Producer thread panicked");
        }
    }
    sender.stop().await;

    let snapshot = sender.metrics();
    observability::record_sender_metrics(sender.name(), &snapshot);
    info!(
        produced = produced.load(Ordering::Relaxed),
        spans = collector.write_count(StreamKind::Span),
        span_chunks = collector.write_count(StreamKind::SpanChunk),
        unsupported = snapshot.unsupported_count,
        rejected = snapshot.rejected_count,
        discarded = snapshot.discarded_count,
        acks = snapshot.ack_count,
        "Demo finished"
    );

    Ok(())
}
