//! Protocols: closed sets of message types, partitioned by direction.
//!
//! A [`Protocol`] is assembled with a [`ProtocolBuilder`] and is immutable
//! afterwards. Every protocol contains the built-in
//! [`Goodbye`](crate::Goodbye) message, so the farewell handshake works no
//! matter which protocol a connection is currently speaking.
//!
//! Decoding searches the maps in a fixed order:
//!
//! ```text
//! server: serverbound → bidirectional
//! client: clientbound → bidirectional
//! ```

use std::collections::HashMap;

use crate::{
    ClientContext, Clientbound, CodecError, Direction, Goodbye, Identifier, Message,
    MessageType, ProtocolError, RegistryError, Role, ServerContext, Serverbound,
    Unmarshaller,
};

type ServerDecoder = fn(&mut Unmarshaller<'_>) -> Result<Box<dyn Serverbound>, CodecError>;
type ClientDecoder = fn(&mut Unmarshaller<'_>) -> Result<Box<dyn Clientbound>, CodecError>;

fn decode_server<M: MessageType + Serverbound>(
    input: &mut Unmarshaller<'_>,
) -> Result<Box<dyn Serverbound>, CodecError> {
    Ok(Box::new(M::unmarshal(input)?))
}

fn decode_client<M: MessageType + Clientbound>(
    input: &mut Unmarshaller<'_>,
) -> Result<Box<dyn Clientbound>, CodecError> {
    Ok(Box::new(M::unmarshal(input)?))
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects message registrations, then freezes them into a [`Protocol`].
pub struct ProtocolBuilder {
    name: &'static str,
    start_message: Option<Identifier>,
    serverbound: HashMap<Identifier, ServerDecoder>,
    clientbound: HashMap<Identifier, ClientDecoder>,
    bidirectional: HashMap<Identifier, (ServerDecoder, ClientDecoder)>,
}

impl ProtocolBuilder {
    /// Starts a protocol that already knows the goodbye message.
    pub fn new(name: &'static str) -> Self {
        let mut bidirectional: HashMap<Identifier, (ServerDecoder, ClientDecoder)> =
            HashMap::new();
        bidirectional.insert(
            Goodbye::ID,
            (decode_server::<Goodbye>, decode_client::<Goodbye>),
        );
        Self {
            name,
            start_message: None,
            serverbound: HashMap::new(),
            clientbound: HashMap::new(),
            bidirectional,
        }
    }

    /// Sets the Identifier that announces a switch to this protocol.
    pub fn start_message(&mut self, id: Identifier) -> &mut Self {
        self.start_message = Some(id);
        self
    }

    fn check(&self, id: &Identifier, declared: Direction, registered: Direction) -> Result<(), RegistryError> {
        if declared != registered {
            return Err(RegistryError::DirectionMismatch {
                id: id.clone(),
                declared,
                registered,
            });
        }
        let taken = match registered {
            Direction::Serverbound => {
                self.serverbound.contains_key(id) || self.bidirectional.contains_key(id)
            }
            Direction::Clientbound => {
                self.clientbound.contains_key(id) || self.bidirectional.contains_key(id)
            }
            Direction::Bidirectional => {
                self.serverbound.contains_key(id)
                    || self.clientbound.contains_key(id)
                    || self.bidirectional.contains_key(id)
            }
        };
        if taken {
            return Err(RegistryError::DuplicateMessage(id.clone()));
        }
        Ok(())
    }

    /// Registers a client → server message type.
    pub fn serverbound<M: MessageType + Serverbound>(&mut self) -> Result<&mut Self, RegistryError> {
        self.check(&M::ID, M::DIRECTION, Direction::Serverbound)?;
        self.serverbound.insert(M::ID, decode_server::<M>);
        Ok(self)
    }

    /// Registers a server → client message type.
    pub fn clientbound<M: MessageType + Clientbound>(&mut self) -> Result<&mut Self, RegistryError> {
        self.check(&M::ID, M::DIRECTION, Direction::Clientbound)?;
        self.clientbound.insert(M::ID, decode_client::<M>);
        Ok(self)
    }

    /// Registers a message type that travels both ways.
    pub fn bidirectional<M: MessageType + Serverbound + Clientbound>(
        &mut self,
    ) -> Result<&mut Self, RegistryError> {
        self.check(&M::ID, M::DIRECTION, Direction::Bidirectional)?;
        self.bidirectional
            .insert(M::ID, (decode_server::<M>, decode_client::<M>));
        Ok(self)
    }

    /// Freezes the registrations.
    pub fn build(self) -> Protocol {
        tracing::debug!(
            protocol = self.name,
            serverbound = self.serverbound.len(),
            clientbound = self.clientbound.len(),
            bidirectional = self.bidirectional.len(),
            "protocol built"
        );
        Protocol {
            name: self.name,
            start_message: self.start_message,
            serverbound: self.serverbound,
            clientbound: self.clientbound,
            bidirectional: self.bidirectional,
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// An immutable set of message types.
pub struct Protocol {
    name: &'static str,
    start_message: Option<Identifier>,
    serverbound: HashMap<Identifier, ServerDecoder>,
    clientbound: HashMap<Identifier, ClientDecoder>,
    bidirectional: HashMap<Identifier, (ServerDecoder, ClientDecoder)>,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The Identifier that switches a connection to this protocol, if any.
    pub fn start_message(&self) -> Option<&Identifier> {
        self.start_message.as_ref()
    }

    /// Number of registered message types, goodbye included.
    pub fn len(&self) -> usize {
        self.serverbound.len() + self.clientbound.len() + self.bidirectional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The registered direction of `id`, if it is part of this protocol.
    pub fn direction_of(&self, id: &Identifier) -> Option<Direction> {
        if self.serverbound.contains_key(id) {
            Some(Direction::Serverbound)
        } else if self.clientbound.contains_key(id) {
            Some(Direction::Clientbound)
        } else if self.bidirectional.contains_key(id) {
            Some(Direction::Bidirectional)
        } else {
            None
        }
    }

    /// Returns `true` if a process acting as `role` can decode `id`.
    pub fn accepts(&self, role: Role, id: &Identifier) -> bool {
        match role {
            Role::Server => self.serverbound.contains_key(id) || self.bidirectional.contains_key(id),
            Role::Client => self.clientbound.contains_key(id) || self.bidirectional.contains_key(id),
        }
    }

    /// Builds a server-side message from its payload.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownMessage`] if `id` has no serverbound or
    /// bidirectional registration.
    pub fn decode_server(
        &self,
        id: &Identifier,
        input: &mut Unmarshaller<'_>,
    ) -> Result<Box<dyn Serverbound>, ProtocolError> {
        let decode = self
            .serverbound
            .get(id)
            .or_else(|| self.bidirectional.get(id).map(|(server, _)| server))
            .ok_or_else(|| ProtocolError::UnknownMessage {
                id: id.clone(),
                role: Role::Server,
            })?;
        Ok(decode(input)?)
    }

    /// Builds a client-side message from its payload.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownMessage`] if `id` has no clientbound or
    /// bidirectional registration.
    pub fn decode_client(
        &self,
        id: &Identifier,
        input: &mut Unmarshaller<'_>,
    ) -> Result<Box<dyn Clientbound>, ProtocolError> {
        let decode = self
            .clientbound
            .get(id)
            .or_else(|| self.bidirectional.get(id).map(|(_, client)| client))
            .ok_or_else(|| ProtocolError::UnknownMessage {
                id: id.clone(),
                role: Role::Client,
            })?;
        Ok(decode(input)?)
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.name)
            .field("start_message", &self.start_message)
            .field("messages", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Sides
// ---------------------------------------------------------------------------

/// Compile-time choice of which end of the connection we are.
///
/// Connection code is generic over `Side`, so the decoded message type and
/// the context it is processed against always agree.
pub trait Side: Send + Sync + 'static {
    const ROLE: Role;

    /// What inbound messages decode into.
    type Inbound: ?Sized + Message;

    /// What inbound messages are processed against.
    type Context: ?Sized;

    fn decode(
        protocol: &Protocol,
        id: &Identifier,
        input: &mut Unmarshaller<'_>,
    ) -> Result<Box<Self::Inbound>, ProtocolError>;

    fn process(message: Box<Self::Inbound>, ctx: &mut Self::Context);
}

/// The server end.
#[derive(Debug, Clone, Copy)]
pub struct ServerSide;

/// The client end.
#[derive(Debug, Clone, Copy)]
pub struct ClientSide;

impl Side for ServerSide {
    const ROLE: Role = Role::Server;
    type Inbound = dyn Serverbound;
    type Context = dyn ServerContext;

    fn decode(
        protocol: &Protocol,
        id: &Identifier,
        input: &mut Unmarshaller<'_>,
    ) -> Result<Box<dyn Serverbound>, ProtocolError> {
        protocol.decode_server(id, input)
    }

    fn process(message: Box<Self::Inbound>, ctx: &mut Self::Context) {
        message.process_server(ctx);
    }
}

impl Side for ClientSide {
    const ROLE: Role = Role::Client;
    type Inbound = dyn Clientbound;
    type Context = dyn ClientContext;

    fn decode(
        protocol: &Protocol,
        id: &Identifier,
        input: &mut Unmarshaller<'_>,
    ) -> Result<Box<dyn Clientbound>, ProtocolError> {
        protocol.decode_client(id, input)
    }

    fn process(message: Box<Self::Inbound>, ctx: &mut Self::Context) {
        message.process_client(ctx);
    }
}
