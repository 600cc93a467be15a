//! Wire protocol for Chipper.
//!
//! This crate defines how peers talk at the byte level:
//!
//! - **Codec** ([`Marshaller`], [`Unmarshaller`]): big-endian primitives,
//!   packed booleans, ZigZag varints, quantized floats, strings, UUIDs
//!   and [`Identifier`]s.
//! - **Packet** ([`Packet`]): the frame carrying one message, named either
//!   by a connection-local short ID or by its full Identifier.
//! - **Messages** ([`Message`], [`MessageType`], [`Serverbound`],
//!   [`Clientbound`]): typed units that marshal themselves and know which
//!   side processes them.
//! - **Protocols** ([`Protocol`], [`ProtocolRegistry`]): closed sets of
//!   message types, built once and shared.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (Packet → Message) → Connection (queues, state)
//! ```
//!
//! Nothing here knows about sockets or threads. The connection layer owns
//! the per-peer state; this crate only turns bytes into messages and back.

mod error;
mod goodbye;
mod identifier;
mod marshal;
mod message;
mod packet;
mod protocol;
mod registry;
mod unmarshal;

pub use error::{CodecError, ProtocolError, RegistryError};
pub use goodbye::{ACKNOWLEDGED, Goodbye};
pub use identifier::{Identifier, ParseIdentifierError};
pub use marshal::{ByteOrder, Marshaller};
pub use message::{
    AsAny, ClientContext, Clientbound, Direction, Message, MessageType, Peer, Role, SendMode,
    ServerContext, Serverbound,
};
pub use packet::{Packet, PacketId, split_stream_frame};
pub use protocol::{ClientSide, Protocol, ProtocolBuilder, ServerSide, Side};
pub use registry::{BaseProtocol, ProtocolDefinition, ProtocolRegistry};
pub use unmarshal::Unmarshaller;
