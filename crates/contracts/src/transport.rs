//! Transport contracts
//!
//! The streaming RPC transport is provided from outside. These traits describe
//! only what the sender needs from it: one connection, two outbound streams,
//! and an observer per stream that receives acknowledgements.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Ack, ContractError, StreamKind, WireMessage};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Accepting new streams and writes
    Active,
    /// Shutdown initiated, no new outbound operations
    ShuttingDown,
    /// Fully released
    Closed,
}

/// Identifying parameters handed to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Sender name, used by the transport for thread and log naming
    pub sender_name: String,
    /// Collector host
    pub host: String,
    /// Collector port
    pub port: u16,
}

/// Agent identity attached to every call by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHeader {
    pub agent_id: String,
    pub application_name: String,
    /// Agent start time, epoch milliseconds
    pub agent_start_time: i64,
}

/// Produces the authentication / identity header for a connection
pub trait HeaderFactory: Send + Sync {
    fn header(&self) -> AgentHeader;
}

/// A header factory that always returns the same header
#[derive(Debug, Clone)]
pub struct StaticHeaderFactory {
    header: AgentHeader,
}

impl StaticHeaderFactory {
    pub fn new(header: AgentHeader) -> Self {
        Self { header }
    }
}

impl HeaderFactory for StaticHeaderFactory {
    fn header(&self) -> AgentHeader {
        self.header.clone()
    }
}

/// Receives server responses for one stream
///
/// Called on transport-owned threads, concurrently with writes.
pub trait StreamObserver: Send + Sync {
    /// One acknowledgement per accepted write
    fn on_ack(&self, ack: Ack);

    /// Stream-level failure
    fn on_error(&self, error: &ContractError);

    /// Server finished the stream
    fn on_completed(&self);
}

/// Client side of one outbound stream
pub trait OutboundStream: Send + Sync {
    /// Enqueue a message for sending. Must not wait on the network.
    fn on_next(&self, message: WireMessage) -> Result<(), ContractError>;

    /// Half-close: no more messages will follow
    fn on_completed(&self);
}

/// An open transport connection
pub trait Connection: Send + Sync {
    /// Open a client-streaming call bound to this connection
    fn open_stream(
        &self,
        kind: StreamKind,
        observer: Arc<dyn StreamObserver>,
    ) -> Result<Box<dyn OutboundStream>, ContractError>;

    /// Stop accepting new outbound operations; in-flight ones may finish
    fn shutdown(&self);

    /// Release the connection immediately
    fn shutdown_now(&self);

    fn state(&self) -> ConnectionState;
}

/// Connection provider trait
///
/// Owns addressing, TLS, authentication and reconnect policy.
#[trait_variant::make(ConnectionProvider: Send)]
pub trait LocalConnectionProvider {
    /// Open the connection the sender will use for its whole lifetime
    ///
    /// # Errors
    /// Returns a connection error if the collector is unreachable
    async fn open(
        &self,
        options: &ConnectionOptions,
        headers: &dyn HeaderFactory,
    ) -> Result<Arc<dyn Connection>, ContractError>;
}
