//! Error types for the protocol layer.
//!
//! Two families live here. [`CodecError`] is what the byte-level
//! [`Unmarshaller`](crate::Unmarshaller) and [`Marshaller`](crate::Marshaller)
//! report. [`ProtocolError`] is what packet and message decoding report once
//! the bytes have been read: unknown short IDs, conflicting mappings, and
//! Identifiers with no registered message.
//!
//! [`RegistryError`] is separate because it is never caused by a peer. It
//! signals a mistake in how an application assembled its protocols.

use crate::{Identifier, Role};

/// Errors produced while reading or writing primitive fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Not enough bytes for the next field.
    ///
    /// While reassembling a TCP stream this means "wait for more data".
    /// Everywhere else it means the peer sent a truncated value.
    #[error("buffer underflow: need {needed} bytes, {remaining} remaining")]
    Underflow {
        /// Bytes the field required.
        needed: usize,
        /// Bytes that were left in the buffer.
        remaining: usize,
    },

    /// Marshallers and unmarshallers only operate on big-endian buffers.
    #[error("unsupported byte order: buffers must be big-endian")]
    UnsupportedByteOrder,

    /// A varint ran past the maximum number of bytes for its width.
    #[error("varint longer than {max_bytes} bytes")]
    VarintTooLong {
        /// 5 for 32-bit varints, 10 for 64-bit.
        max_bytes: usize,
    },

    /// The last byte of a varint carried bits beyond its width.
    #[error("varint overflows {bits} bits")]
    VarintOverflow {
        /// 32 or 64.
        bits: u32,
    },

    /// A length prefix decoded to a negative value.
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    /// A string field did not contain valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

impl CodecError {
    /// Returns `true` for [`CodecError::Underflow`].
    pub fn is_underflow(&self) -> bool {
        matches!(self, Self::Underflow { .. })
    }
}

/// Errors caused by semantically invalid wire data.
///
/// Every variant is fatal to the connection it happened on. There is no
/// resynchronization marker in the framing, so one bad packet invalidates
/// everything after it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A primitive field could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A short ID arrived before any long-form packet defined it.
    #[error("unknown short id {0}")]
    UnknownShortId(i32),

    /// A long-form packet tried to rebind a short ID that already names
    /// a different Identifier.
    #[error("short id {short_id} already bound to {existing}, peer sent {received}")]
    ShortIdConflict {
        /// The contested short ID.
        short_id: i32,
        /// What the table already maps it to.
        existing: Identifier,
        /// What the peer claimed.
        received: Identifier,
    },

    /// A long-form packet bound a second short ID to an Identifier that
    /// already has one.
    #[error("{id} already bound to short id {existing}, peer sent {received}")]
    ShortIdAlias {
        /// The Identifier being rebound.
        id: Identifier,
        /// The short ID it already has.
        existing: i32,
        /// The additional short ID the peer claimed.
        received: i32,
    },

    /// The leading varint cannot be negated into a short ID.
    #[error("invalid short id field {0}")]
    InvalidShortId(i32),

    /// No message with this Identifier can be decoded in this role.
    #[error("no {role} message registered for {id}")]
    UnknownMessage {
        /// The Identifier from the wire.
        id: Identifier,
        /// Which side tried to decode it.
        role: Role,
    },

    /// A stream frame announced a length outside the accepted range.
    #[error("frame length {length} outside 0..={max}")]
    FrameTooLarge {
        /// Length read from the frame prefix.
        length: i64,
        /// Configured upper bound.
        max: usize,
    },

    /// The message decoded, but violates a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Errors raised while building protocols or the protocol registry.
///
/// These indicate an integration bug, not peer misbehavior, and are
/// returned to the caller rather than logged and swallowed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The Identifier is already registered in an overlapping scope.
    #[error("message {0} registered twice")]
    DuplicateMessage(Identifier),

    /// A message type was registered under a direction it does not declare.
    #[error("message {id} declares {declared:?} but was registered as {registered:?}")]
    DirectionMismatch {
        /// The message Identifier.
        id: Identifier,
        /// What the type declares.
        declared: crate::Direction,
        /// What registration asked for.
        registered: crate::Direction,
    },

    /// The same protocol type was registered twice.
    #[error("protocol {0} registered twice")]
    DuplicateProtocol(&'static str),

    /// Two protocols advertise the same start message.
    #[error("start message {0} already claimed by another protocol")]
    DuplicateStartMessage(Identifier),
}
