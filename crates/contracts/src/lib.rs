//! # Contracts
//!
//! Frozen interface contracts shared by the sender and its collaborators.
//! Business crates depend on this crate, reverse dependencies are prohibited.
//!
//! ## Collaborators
//! - `MessageConverter`: domain record -> tagged wire message
//! - `ConnectionProvider`: opens the transport connection and its streams

mod config;
mod converter;
mod error;
mod message;
mod metrics;
mod transport;

pub use config::*;
pub use converter::{LocalMessageConverter, MessageConverter};
pub use error::*;
pub use message::*;
pub use metrics::MetricsSnapshot;
pub use transport::*;
