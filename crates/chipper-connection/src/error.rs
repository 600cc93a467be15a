//! Error types for the connection layer.

use chipper_protocol::ProtocolError;

/// Errors that can occur while feeding or configuring a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The peer sent something that breaks the wire protocol. The
    /// connection has already been closed when this is returned.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection is closed; the bytes were discarded.
    #[error("connection closed")]
    Closed,

    /// A configuration file could not be parsed.
    #[error("invalid connection config: {0}")]
    Config(String),
}

impl ConnectionError {
    /// Returns `true` if the peer is to blame.
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}
