//! Wire message contracts
//!
//! The converter output and the two typed messages the collector accepts.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identity of an outbound stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Completed spans
    Span,
    /// Partial span chunks flushed before the span completes
    SpanChunk,
}

impl StreamKind {
    /// Both stream kinds, in the order they are opened
    pub const ALL: [StreamKind; 2] = [StreamKind::Span, StreamKind::SpanChunk];

    /// Stable name used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Span => "span",
            StreamKind::SpanChunk => "span_chunk",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed span in wire form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanMessage {
    /// Transaction (trace) identifier
    pub transaction_id: String,
    /// Span identifier
    pub span_id: i64,
    /// Encoded span body
    pub payload: Bytes,
}

/// A span chunk in wire form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanChunkMessage {
    /// Transaction (trace) identifier
    pub transaction_id: String,
    /// Span the chunk belongs to
    pub span_id: i64,
    /// Position of this chunk within the span
    pub sequence: u32,
    /// Encoded span events
    pub payload: Bytes,
}

/// A message ready to be written to its stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    Span(SpanMessage),
    SpanChunk(SpanChunkMessage),
}

impl WireMessage {
    /// Stream this message must be written to
    pub fn kind(&self) -> StreamKind {
        match self {
            WireMessage::Span(_) => StreamKind::Span,
            WireMessage::SpanChunk(_) => StreamKind::SpanChunk,
        }
    }
}

/// Converter output
///
/// Exactly one tag per record. `Unsupported` hands the original record back so
/// the worker can log it.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvertedMessage<R> {
    Span(SpanMessage),
    SpanChunk(SpanChunkMessage),
    Unsupported(R),
}

/// Empty acknowledgement emitted by the collector for each write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack;
