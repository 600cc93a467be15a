//! # Chipper
//!
//! Binary client/server messaging for games.
//!
//! Peers exchange typed messages over a TCP stream, plus an optional UDP
//! channel for traffic that may be lost. Message types are named by
//! [`Identifier`](chipper_protocol::Identifier) and compressed to small
//! per-connection short IDs after their first use. Connections end with a
//! goodbye handshake that tells the other side why.
//!
//! This crate ties the layers together:
//!
//! - [`drive`] runs one connection's I/O loop on a tokio task;
//! - [`ChipperServer`] and [`ChipperClient`] open connections and spawn
//!   their drivers;
//! - [`logging::init`] sets up log output.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chipper::prelude::*;
//!
//! # async fn run() -> Result<(), ChipperError> {
//! chipper::logging::init();
//! let registry = Arc::new(ProtocolRegistry::new());
//! let server = ChipperServer::builder()
//!     .bind("0.0.0.0:25565")
//!     .registry(registry)
//!     .build()
//!     .await?;
//! let (tx, mut sessions) = tokio::sync::mpsc::unbounded_channel();
//! tokio::spawn(server.run(tx));
//! while let Some(session) = sessions.recv().await {
//!     session.connection.goodbye(Identifier::new("game", "maintenance"), vec![]);
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod driver;
mod error;
pub mod logging;
mod server;

use chipper_connection::{Connection, Inbox};
use chipper_protocol::Side;
use tokio::task::JoinHandle;

pub use client::{ChipperClient, ChipperClientBuilder};
pub use driver::drive;
pub use error::ChipperError;
pub use server::{ChipperServer, ChipperServerBuilder};

pub use chipper_connection;
pub use chipper_protocol;
pub use chipper_transport;

/// An open connection whose driver is already running.
pub struct Session<S: Side> {
    /// Handle for sending, goodbye and inspection. Cheap to clone.
    pub connection: Connection,
    /// Inbound messages, for the task that owns game state.
    pub inbox: Inbox<S>,
    /// The I/O task. Finishes once the connection closes.
    pub driver: JoinHandle<Result<(), ChipperError>>,
}

impl<S: Side> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection)
            .field("inbox", &self.inbox)
            .finish_non_exhaustive()
    }
}

/// Common imports for applications.
pub mod prelude {
    pub use crate::{
        ChipperClient, ChipperClientBuilder, ChipperError, ChipperServer, ChipperServerBuilder,
        Session, drive,
    };
    pub use chipper_connection::{
        Connection, ConnectionConfig, ConnectionIo, ConnectionStats, Inbox, LossSimulation,
    };
    pub use chipper_protocol::{
        ClientContext, ClientSide, Clientbound, CodecError, Direction, Identifier, Marshaller,
        Message, MessageType, Peer, ProtocolBuilder, ProtocolDefinition, ProtocolError,
        ProtocolRegistry, RegistryError, SendMode, ServerContext, ServerSide, Serverbound,
        Unmarshaller,
    };
    pub use chipper_transport::{TcpLink, TcpTransport, TransportError, UdpLink};
}
