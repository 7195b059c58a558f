//! Connection transports for simgrid.
//!
//! A [`Transport`] accepts viewer connections as [`Incoming`] peers.
//! Accepting does no protocol work; the upgrade to a [`Connection`]
//! happens in [`Incoming::upgrade`], on the connection's own task, so a
//! peer that never finishes its upgrade cannot hold up the accept loop.
//!
//! Each [`Connection`] is split once into a [`ConnectionReader`] and a
//! [`ConnectionWriter`] so the session worker can wait for inbound frames
//! while it flushes outbound ones.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{
    WebSocketConnection, WebSocketIncoming, WebSocketReader, WebSocketTransport, WebSocketWriter,
};

use std::fmt;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    type Incoming: Incoming<Error = Self::Error>;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next peer. Returns as soon as the peer is accepted;
    /// nothing is read from it yet.
    async fn accept(&mut self) -> Result<Self::Incoming, Self::Error>;

    /// The address the transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// An accepted peer that has not been upgraded yet.
pub trait Incoming: Send + 'static {
    type Error: std::error::Error + Send + Sync;
    type Connection: Connection<Error = Self::Error>;

    fn peer_addr(&self) -> SocketAddr;

    /// Runs the transport's opening handshake. Callers bound this with a
    /// timeout; it waits on the peer.
    async fn upgrade(self) -> Result<Self::Connection, Self::Error>;
}

/// One upgraded connection, before it is split.
pub trait Connection: Send + 'static {
    type Error: std::error::Error + Send + Sync;
    type Reader: ConnectionReader<Error = Self::Error>;
    type Writer: ConnectionWriter<Error = Self::Error>;

    fn id(&self) -> ConnectionId;

    fn peer_addr(&self) -> SocketAddr;

    /// Separates the inbound and outbound halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Inbound half of a connection.
pub trait ConnectionReader: Send + 'static {
    type Error: std::error::Error + Send + Sync;

    /// Receives the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, Self::Error>;
}

/// Outbound half of a connection.
pub trait ConnectionWriter: Send + 'static {
    type Error: std::error::Error + Send + Sync;

    async fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Sends a close frame. Further sends fail.
    async fn close(&mut self) -> Result<(), Self::Error>;
}
