//! UDP datagram channel.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::{DatagramLink, TransportError};

/// Largest payload a UDP datagram over IPv4 can hold.
const MAX_DATAGRAM: usize = 65_507;

/// A UDP socket connected to exactly one peer.
///
/// Datagrams from any other address are filtered by the OS.
pub struct UdpLink {
    socket: UdpSocket,
    peer_addr: SocketAddr,
}

impl UdpLink {
    /// Binds `local` and connects the socket to `peer`.
    pub async fn bind(local: &str, peer: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(TransportError::AcceptFailed)?;
        Self::from_socket(socket, peer).await
    }

    /// Connects an already bound socket to `peer`.
    pub async fn from_socket(socket: UdpSocket, peer: SocketAddr) -> Result<Self, TransportError> {
        socket
            .connect(peer)
            .await
            .map_err(TransportError::ConnectFailed)?;
        tracing::debug!(%peer, "UDP link connected");
        Ok(Self {
            socket,
            peer_addr: peer,
        })
    }

    /// Returns the local address of the socket.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl DatagramLink for UdpLink {
    type Error = TransportError;

    async fn send_datagram(&self, data: &[u8]) -> Result<(), Self::Error> {
        let sent = self
            .socket
            .send(data)
            .await
            .map_err(TransportError::SendFailed)?;
        if sent != data.len() {
            return Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("datagram truncated: {sent} of {} bytes", data.len()),
            )));
        }
        Ok(())
    }

    async fn recv_datagram(&self) -> Result<Vec<u8>, Self::Error> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = self
            .socket
            .recv(&mut buf)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        buf.truncate(n);
        Ok(buf)
    }
}
