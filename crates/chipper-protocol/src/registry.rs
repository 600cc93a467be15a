//! The set of every protocol a process can speak.
//!
//! Applications describe each protocol with a [`ProtocolDefinition`] type and
//! register it once, at startup:
//!
//! ```rust
//! use chipper_protocol::{ProtocolBuilder, ProtocolDefinition, ProtocolRegistry, RegistryError};
//!
//! struct Lobby;
//!
//! impl ProtocolDefinition for Lobby {
//!     const NAME: &'static str = "lobby";
//!
//!     fn define(_builder: &mut ProtocolBuilder) -> Result<(), RegistryError> {
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = ProtocolRegistry::new();
//! registry.register::<Lobby>().unwrap();
//! assert!(registry.get::<Lobby>().is_some());
//! ```
//!
//! The finished registry is shared behind an `Arc` and never mutated again.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{Identifier, Protocol, ProtocolBuilder, RegistryError};

/// A type that describes one protocol.
pub trait ProtocolDefinition: 'static {
    /// Human-readable protocol name, used in logs.
    const NAME: &'static str;

    /// The message that announces a switch to this protocol.
    fn start_message() -> Option<Identifier> {
        None
    }

    /// Registers this protocol's message types.
    fn define(builder: &mut ProtocolBuilder) -> Result<(), RegistryError>;

    /// Builds the protocol.
    fn build() -> Result<Protocol, RegistryError> {
        let mut builder = ProtocolBuilder::new(Self::NAME);
        if let Some(start) = Self::start_message() {
            builder.start_message(start);
        }
        Self::define(&mut builder)?;
        Ok(builder.build())
    }
}

/// The protocol every connection starts in. Only knows goodbye.
#[derive(Debug, Clone, Copy)]
pub struct BaseProtocol;

impl ProtocolDefinition for BaseProtocol {
    const NAME: &'static str = "chipper:base";

    fn define(_builder: &mut ProtocolBuilder) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// Every registered protocol, indexed by type and by start message.
#[derive(Debug)]
pub struct ProtocolRegistry {
    base: Arc<Protocol>,
    by_type: HashMap<TypeId, Arc<Protocol>>,
    by_start_message: HashMap<Identifier, Arc<Protocol>>,
}

impl ProtocolRegistry {
    /// Creates a registry holding only [`BaseProtocol`].
    pub fn new() -> Self {
        let base = Arc::new(ProtocolBuilder::new(BaseProtocol::NAME).build());
        let mut by_type = HashMap::new();
        by_type.insert(TypeId::of::<BaseProtocol>(), Arc::clone(&base));
        Self {
            base,
            by_type,
            by_start_message: HashMap::new(),
        }
    }

    /// Builds and registers `P`.
    ///
    /// # Errors
    /// - [`RegistryError::DuplicateProtocol`] if `P` is already registered
    /// - [`RegistryError::DuplicateStartMessage`] if another protocol
    ///   claims the same start message
    /// - whatever `P::define` returns
    pub fn register<P: ProtocolDefinition>(&mut self) -> Result<Arc<Protocol>, RegistryError> {
        let type_id = TypeId::of::<P>();
        if self.by_type.contains_key(&type_id) {
            return Err(RegistryError::DuplicateProtocol(P::NAME));
        }
        let protocol = Arc::new(P::build()?);
        if let Some(start) = protocol.start_message() {
            if self.by_start_message.contains_key(start) {
                return Err(RegistryError::DuplicateStartMessage(start.clone()));
            }
            self.by_start_message
                .insert(start.clone(), Arc::clone(&protocol));
        }
        self.by_type.insert(type_id, Arc::clone(&protocol));
        tracing::debug!(protocol = P::NAME, "protocol registered");
        Ok(protocol)
    }

    /// The built-in base protocol.
    pub fn base(&self) -> &Arc<Protocol> {
        &self.base
    }

    /// The registered instance of `P`.
    pub fn get<P: ProtocolDefinition>(&self) -> Option<&Arc<Protocol>> {
        self.by_type.get(&TypeId::of::<P>())
    }

    /// The protocol whose start message is `id`.
    pub fn by_start_message(&self, id: &Identifier) -> Option<&Arc<Protocol>> {
        self.by_start_message.get(id)
    }

    /// Number of protocols, base included.
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
