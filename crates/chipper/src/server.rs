//! `ChipperServer` builder and accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use chipper_connection::{Connection, ConnectionConfig};
use chipper_protocol::{ProtocolRegistry, ServerSide};
use chipper_transport::{Link, TcpTransport, Transport, UdpLink};
use tokio::sync::mpsc;

use crate::{ChipperError, Session, drive};

/// Builder for configuring and starting a Chipper server.
///
/// # Example
///
/// ```rust,no_run
/// # async fn run() -> Result<(), chipper::ChipperError> {
/// use std::sync::Arc;
/// use chipper::prelude::*;
///
/// let registry = Arc::new(ProtocolRegistry::new());
/// let mut server = ChipperServer::builder()
///     .bind("0.0.0.0:25565")
///     .registry(registry)
///     .build()
///     .await?;
/// let session = server.accept().await?;
/// session.connection.goodbye(Identifier::new("game", "full"), vec![]);
/// # Ok(())
/// # }
/// ```
pub struct ChipperServerBuilder {
    bind_addr: String,
    config: ConnectionConfig,
    registry: Option<Arc<ProtocolRegistry>>,
}

impl ChipperServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:25565".to_string(),
            config: ConnectionConfig::default(),
            registry: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the configuration every accepted connection uses.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the protocols connections may speak. Defaults to the base
    /// protocol only.
    pub fn registry(mut self, registry: Arc<ProtocolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Binds the listener.
    pub async fn build(self) -> Result<ChipperServer, ChipperError> {
        let transport = TcpTransport::bind(&self.bind_addr).await?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ProtocolRegistry::new()));
        Ok(ChipperServer {
            transport,
            registry,
            config: self.config.validated(),
        })
    }
}

impl Default for ChipperServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Chipper server.
pub struct ChipperServer {
    transport: TcpTransport,
    registry: Arc<ProtocolRegistry>,
    config: ConnectionConfig,
}

impl ChipperServer {
    /// Creates a new builder.
    pub fn builder() -> ChipperServerBuilder {
        ChipperServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    /// Accepts one connection and spawns its driver.
    pub async fn accept(&mut self) -> Result<Session<ServerSide>, ChipperError> {
        let link = self.transport.accept().await?;
        let (connection, io, inbox) = Connection::open::<ServerSide>(
            link.id(),
            link.peer_addr(),
            Arc::clone(&self.registry),
            self.config.clone(),
        );
        tracing::info!(conn = %connection.describe(), "accepted connection");
        let driver = tokio::spawn(drive(link, None::<UdpLink>, io));
        Ok(Session {
            connection,
            inbox,
            driver,
        })
    }

    /// Runs the accept loop, handing every new session to `sessions`.
    ///
    /// Returns once the receiving end of `sessions` is dropped. Accept
    /// failures are logged and the loop keeps going.
    pub async fn run(mut self, sessions: mpsc::UnboundedSender<Session<ServerSide>>) {
        tracing::info!(addr = ?self.local_addr().ok(), "chipper server running");
        loop {
            tokio::select! {
                accepted = self.accept() => match accepted {
                    Ok(session) => {
                        if let Err(mpsc::error::SendError(session)) = sessions.send(session) {
                            session.connection.disconnect();
                            break;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
                _ = sessions.closed() => break,
            }
        }
        if let Err(e) = self.transport.shutdown().await {
            tracing::debug!(error = %e, "shutdown failed");
        }
        tracing::info!("chipper server stopped");
    }
}
