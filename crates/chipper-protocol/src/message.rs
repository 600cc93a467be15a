//! Message traits: what a wire message is, and who may process it.
//!
//! A message type implements three layers:
//!
//! - [`Message`]: object-safe core (Identifier, send mode, `marshal`).
//!   Outbound queues hold `Box<dyn Message>`.
//! - [`MessageType`]: static facts (`ID`, `DIRECTION`) plus `unmarshal`,
//!   used when the type is registered in a [`Protocol`](crate::Protocol).
//! - [`Serverbound`] and/or [`Clientbound`]: the handler for the side that
//!   receives it.
//!
//! The server only ever decodes into `Box<dyn Serverbound>` and the client
//! into `Box<dyn Clientbound>`, so handing a message to the wrong side's
//! handler does not compile.

use std::any::Any;
use std::fmt;

use crate::{CodecError, Identifier, Marshaller, Unmarshaller};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which way a message type may travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Server → client.
    Clientbound,
    /// Client → server.
    Serverbound,
    /// Either way.
    Bidirectional,
}

/// Delivery class of a message.
///
/// | mode | datagram channel up | datagram channel down |
/// |------|---------------------|-----------------------|
/// | `Reliable` | stream | stream |
/// | `Unreliable` | datagram | stream |
/// | `Unimportant` | datagram | dropped |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SendMode {
    #[default]
    Reliable,
    Unreliable,
    Unimportant,
}

/// Which end of a connection the local process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

// ---------------------------------------------------------------------------
// Message traits
// ---------------------------------------------------------------------------

/// A logical message that can be written to the wire.
pub trait Message: Send + fmt::Debug + 'static {
    /// The registered Identifier of this message's type.
    fn id(&self) -> Identifier;

    /// Delivery class. Most messages must arrive.
    fn send_mode(&self) -> SendMode {
        SendMode::Reliable
    }

    /// Writes this message's fields.
    fn marshal(&self, out: &mut Marshaller);
}

/// Static description of a concrete message type.
pub trait MessageType: Message + Sized {
    /// Identifier shared by every peer.
    const ID: Identifier;

    /// Which way this type travels. Checked at registration.
    const DIRECTION: Direction;

    /// Reads the fields written by [`Message::marshal`].
    fn unmarshal(input: &mut Unmarshaller<'_>) -> Result<Self, CodecError>;
}

/// A message the server knows how to process.
pub trait Serverbound: Message {
    fn process_server(self: Box<Self>, ctx: &mut dyn ServerContext);
}

/// A message the client knows how to process.
pub trait Clientbound: Message {
    fn process_client(self: Box<Self>, ctx: &mut dyn ClientContext);
}

// ---------------------------------------------------------------------------
// Peer and contexts
// ---------------------------------------------------------------------------

/// The remote end of a connection, as seen from message handlers.
///
/// Implemented by the connection layer. Defined here so that built-in
/// messages such as [`Goodbye`](crate::Goodbye) can drive the connection
/// without this crate depending on it.
pub trait Peer: Send + Sync {
    /// Queues a message for sending. Dropped silently after goodbye.
    fn send_boxed(&self, message: Box<dyn Message>);

    /// Starts the farewell handshake. No-op if already started.
    fn goodbye(&self, reason: Identifier, extras: Vec<String>);

    /// Closes the connection now, discarding queued messages.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Human-readable label for logs.
    fn describe(&self) -> String;

    /// Returns `true` once the local side has sent its goodbye.
    fn has_said_goodbye(&self) -> bool;

    /// Records that the peer said goodbye.
    ///
    /// Returns `true` if this set the disconnect record, i.e. the peer
    /// spoke first.
    fn record_remote_goodbye(&self, reason: Identifier, extras: Vec<String>) -> bool;
}

/// Lets a `dyn` context be turned back into its concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// What server-side handlers run against.
pub trait ServerContext: AsAny {
    /// The connection the message arrived on.
    fn peer(&self) -> &dyn Peer;

    /// Called when the client said goodbye first.
    fn on_remote_goodbye(&mut self) {}
}

/// What client-side handlers run against.
pub trait ClientContext: AsAny {
    /// The connection the message arrived on.
    fn peer(&self) -> &dyn Peer;

    /// Called when the server said goodbye first.
    fn on_remote_goodbye(&mut self) {}
}

impl dyn ServerContext {
    /// Returns the concrete context if it is a `T`.
    pub fn downcast_mut<T: ServerContext>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

impl dyn ClientContext {
    /// Returns the concrete context if it is a `T`.
    pub fn downcast_mut<T: ClientContext>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}
