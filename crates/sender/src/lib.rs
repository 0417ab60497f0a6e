//! # Sender
//!
//! Asynchronous span sender.
//!
//! Responsibilities:
//! - Accept records from any thread without blocking (bounded queue)
//! - Convert and route each record to the span or span chunk stream
//! - Coordinate startup and bounded, idempotent shutdown

pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod loopback;
pub mod metrics;
pub mod observer;
pub mod stream;

pub use contracts::{ConvertedMessage, MessageConverter, SenderConfig, StreamKind};
pub use dispatcher::Dispatcher;
pub use error::{RejectReason, SenderError};
pub use lifecycle::DataSender;
pub use loopback::{LoopbackCollector, LoopbackConfig, LoopbackProvider};
pub use metrics::SenderMetrics;
pub use observer::AckObserver;
pub use stream::{StreamHandle, StreamPair, StreamState};
