//! `ChipperClient` builder: dials a server and spawns the driver.

use std::sync::Arc;

use chipper_connection::{Connection, ConnectionConfig};
use chipper_protocol::{ClientSide, ProtocolRegistry};
use chipper_transport::{Link, TcpLink, UdpLink};

use crate::{ChipperError, Session, drive};

/// Builder for a client connection.
///
/// ```rust,no_run
/// # async fn run() -> Result<(), chipper::ChipperError> {
/// use chipper::prelude::*;
///
/// let mut session = ChipperClient::builder()
///     .connect_to("127.0.0.1:25565")
///     .connect()
///     .await?;
/// while let Some(_message) = session.inbox.recv().await {}
/// # Ok(())
/// # }
/// ```
pub struct ChipperClientBuilder {
    addr: String,
    config: ConnectionConfig,
    registry: Option<Arc<ProtocolRegistry>>,
    datagram: Option<UdpLink>,
}

impl ChipperClientBuilder {
    pub fn new() -> Self {
        Self {
            addr: "127.0.0.1:25565".to_string(),
            config: ConnectionConfig::default(),
            registry: None,
            datagram: None,
        }
    }

    /// Sets the server address.
    pub fn connect_to(mut self, addr: &str) -> Self {
        self.addr = addr.to_string();
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the protocols this client may speak. Defaults to the base
    /// protocol only.
    pub fn registry(mut self, registry: Arc<ProtocolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Adds an unreliable datagram channel next to the stream.
    pub fn datagram(mut self, link: UdpLink) -> Self {
        self.datagram = Some(link);
        self
    }

    /// Dials the server and starts the driver.
    pub async fn connect(self) -> Result<Session<ClientSide>, ChipperError> {
        let link = TcpLink::connect(&self.addr).await?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ProtocolRegistry::new()));
        let (connection, io, inbox) = Connection::open::<ClientSide>(
            link.id(),
            link.peer_addr(),
            registry,
            self.config,
        );
        tracing::info!(conn = %connection.describe(), "connected");
        let driver = tokio::spawn(drive(link, self.datagram, io));
        Ok(Session {
            connection,
            inbox,
            driver,
        })
    }
}

impl Default for ChipperClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point for client connections.
#[derive(Debug, Clone, Copy)]
pub struct ChipperClient;

impl ChipperClient {
    pub fn builder() -> ChipperClientBuilder {
        ChipperClientBuilder::new()
    }
}
