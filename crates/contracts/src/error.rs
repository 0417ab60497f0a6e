//! Layered error definitions
//!
//! Categorized by source: config / conversion / transport

use thiserror::Error;

use crate::StreamKind;

/// Unified error type for converters and transports
#[derive(Debug, Clone, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Conversion Errors =====
    /// Converter failed to produce a wire message
    #[error("conversion error: {message}")]
    Conversion { message: String },

    // ===== Transport Errors =====
    /// Connection could not be opened or is unusable
    #[error("connection error to {host}:{port}: {message}")]
    Connection {
        host: String,
        port: u16,
        message: String,
    },

    /// Write to an outbound stream failed
    #[error("stream '{stream}' write error: {message}")]
    StreamWrite { stream: StreamKind, message: String },

    /// Stream no longer accepts writes
    #[error("stream '{stream}' is closed")]
    StreamClosed { stream: StreamKind },

    /// Stream-level failure reported by the remote side
    #[error("stream '{stream}' failed: {message}")]
    StreamFailed { stream: StreamKind, message: String },
}

impl ContractError {
    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create conversion error
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
        }
    }

    /// Create connection error
    pub fn connection(host: impl Into<String>, port: u16, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            port,
            message: message.into(),
        }
    }

    /// Create stream write error
    pub fn stream_write(stream: StreamKind, message: impl Into<String>) -> Self {
        Self::StreamWrite {
            stream,
            message: message.into(),
        }
    }

    /// Create remote stream failure
    pub fn stream_failed(stream: StreamKind, message: impl Into<String>) -> Self {
        Self::StreamFailed {
            stream,
            message: message.into(),
        }
    }
}
