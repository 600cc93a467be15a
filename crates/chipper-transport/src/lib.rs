//! Transport abstraction layer for Chipper.
//!
//! A connection rides on up to two channels:
//!
//! - a reliable, ordered byte **stream** ([`Link`], implemented by
//!   [`TcpLink`]), which carries every message that must arrive;
//! - an optional unreliable **datagram** channel ([`DatagramLink`],
//!   implemented by [`UdpLink`]), one packet per datagram.
//!
//! [`Transport`] accepts new stream links on the server side.
//!
//! Transports only move bytes. Framing, decoding and connection state live
//! in the layers above.

#![allow(async_fn_in_trait)]

mod error;
mod tcp;
mod udp;

pub use error::TransportError;
pub use tcp::{TcpLink, TcpTransport};
pub use udp::UdpLink;

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates a process-unique ID.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming stream links.
pub trait Transport: Send + Sync + 'static {
    /// The link type produced by this transport.
    type Link: Link;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming link.
    async fn accept(&mut self) -> Result<Self::Link, Self::Error>;

    /// Stops accepting new links.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A reliable, ordered byte stream to one peer.
///
/// `recv` returns whatever bytes the socket had ready, with no regard for
/// message boundaries. Both `send` and `recv` take `&self` so one task can
/// wait on reads while another path writes.
pub trait Link: Send + Sync + 'static {
    /// The error type for link operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Writes all of `data`.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Reads the next chunk of bytes.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly. Must be
    /// cancel safe: dropping the future loses no bytes.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the sending half, signalling end of stream to the peer.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this link.
    fn id(&self) -> ConnectionId;

    /// Address of the remote end, when there is one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// An unreliable, unordered datagram channel to one peer.
pub trait DatagramLink: Send + Sync + 'static {
    /// The error type for datagram operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends `data` as a single datagram.
    fn send_datagram(&self, data: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next datagram. Must be cancel safe.
    fn recv_datagram(&self) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;
}
