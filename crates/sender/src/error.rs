//! Sender error types

use std::fmt;

use contracts::ContractError;
use thiserror::Error;

/// Why a submission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Queue at capacity
    QueueFull,
    /// Shutdown has begun
    Closed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QueueFull => f.write_str("queue full"),
            RejectReason::Closed => f.write_str("sender closed"),
        }
    }
}

/// Sender-specific errors
///
/// Only `Construction`, `Connection`, `AlreadyStarted` and `StoppedDuringStart`
/// ever reach a caller.
/// The rest are built for logging inside the worker and the observers.
#[derive(Debug, Error)]
pub enum SenderError {
    /// Submission refused, surfaced to the producer as `false`
    #[error("sender '{sender}' rejected submission: {reason}")]
    RejectedSubmission { sender: String, reason: RejectReason },

    /// Converter produced no known destination
    #[error("sender '{sender}' has no stream for record {record}")]
    UnsupportedRecordType { sender: String, record: String },

    /// Write or remote stream failure
    #[error("sender '{sender}' stream transport error: {source}")]
    StreamTransport {
        sender: String,
        #[source]
        source: ContractError,
    },

    /// Worker did not finish in-flight work in time
    #[error("sender '{sender}' worker did not stop within {timeout_ms}ms")]
    ShutdownTimeout { sender: String, timeout_ms: u64 },

    /// Invalid construction parameter
    #[error("invalid sender configuration: {0}")]
    Construction(#[source] ContractError),

    /// Connection or stream could not be opened
    #[error("sender '{sender}' failed to connect: {source}")]
    Connection {
        sender: String,
        #[source]
        source: ContractError,
    },

    /// `start()` called more than once
    #[error("sender '{sender}' already started")]
    AlreadyStarted { sender: String },

    /// `stop()` ran while `start()` was still connecting
    #[error("sender '{sender}' was stopped before start completed")]
    StoppedDuringStart { sender: String },
}

impl SenderError {
    pub fn rejected(sender: impl Into<String>, reason: RejectReason) -> Self {
        Self::RejectedSubmission {
            sender: sender.into(),
            reason,
        }
    }

    pub fn unsupported(sender: impl Into<String>, record: impl Into<String>) -> Self {
        Self::UnsupportedRecordType {
            sender: sender.into(),
            record: record.into(),
        }
    }

    pub fn stream_transport(sender: impl Into<String>, source: ContractError) -> Self {
        Self::StreamTransport {
            sender: sender.into(),
            source,
        }
    }

    pub fn connection(sender: impl Into<String>, source: ContractError) -> Self {
        Self::Connection {
            sender: sender.into(),
            source,
        }
    }
}
