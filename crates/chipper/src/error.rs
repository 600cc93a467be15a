//! Unified error type for Chipper.

use chipper_connection::ConnectionError;
use chipper_protocol::{ProtocolError, RegistryError};
use chipper_transport::TransportError;

/// Top-level error wrapping every layer's error.
///
/// `?` converts sub-crate errors through the generated `From` impls.
#[derive(Debug, thiserror::Error)]
pub enum ChipperError {
    /// Socket-level failure: bind, connect, read or write.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The peer broke the wire protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Protocols were assembled incorrectly.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Connection-level failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl ChipperError {
    /// Returns `true` if the peer caused this error.
    pub fn is_violation(&self) -> bool {
        match self {
            Self::Protocol(_) => true,
            Self::Connection(e) => e.is_violation(),
            _ => false,
        }
    }
}
