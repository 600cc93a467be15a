//! The per-connection I/O loop.
//!
//! [`drive`] owns a [`ConnectionIo`] and the links it rides on. Each pass
//! through the loop flushes one batch of outbound messages, then waits for
//! whichever comes first:
//!
//!   - a wake-up from the [`Connection`] handle (new message, goodbye, close)
//!   - bytes on the stream
//!   - a datagram
//!   - the goodbye grace deadline
//!
//! The loop ends when the connection closes, the peer closes the stream, or
//! a transport error occurs. Whatever is still queued at that point is
//! discarded.

use chipper_connection::{Connection, ConnectionError, ConnectionIo};
use chipper_protocol::Side;
use chipper_transport::{DatagramLink, Link, TransportError};
use tokio::time::Instant;

use crate::ChipperError;

/// Runs the I/O loop for one connection until it closes.
///
/// `datagram` is the optional unreliable channel. Without one, unreliable
/// messages fall back to the stream.
///
/// # Errors
/// The transport or protocol error that ended the connection. By the time
/// this returns, the connection is closed either way.
pub async fn drive<S, L, D>(
    link: L,
    datagram: Option<D>,
    mut io: ConnectionIo<S>,
) -> Result<(), ChipperError>
where
    S: Side,
    L: Link<Error = TransportError>,
    D: DatagramLink<Error = TransportError>,
{
    let conn = io.connection().clone();
    io.set_datagram_channel(datagram.is_some());
    tracing::debug!(conn = %conn.describe(), datagrams = datagram.is_some(), "driver started");

    let result = pump(&conn, &link, datagram.as_ref(), &mut io).await;

    conn.disconnect();
    io.discard_outbound();
    if let Err(e) = link.close().await {
        tracing::trace!(conn = %conn.describe(), error = %e, "close after disconnect");
    }
    match &result {
        Ok(()) => tracing::debug!(conn = %conn.describe(), "driver finished"),
        Err(e) => tracing::debug!(conn = %conn.describe(), error = %e, "driver finished with error"),
    }
    result
}

async fn pump<S, L, D>(
    conn: &Connection,
    link: &L,
    datagram: Option<&D>,
    io: &mut ConnectionIo<S>,
) -> Result<(), ChipperError>
where
    S: Side,
    L: Link<Error = TransportError>,
    D: DatagramLink<Error = TransportError>,
{
    loop {
        if conn.is_closed() {
            return Ok(());
        }
        write_batch(link, datagram, io).await?;

        tokio::select! {
            _ = conn.notified() => {}

            bytes = link.recv() => match bytes? {
                Some(bytes) => {
                    if !accept_fed(io.feed_stream_bytes(&bytes))? {
                        return Ok(());
                    }
                }
                None => {
                    tracing::info!(conn = %conn.describe(), "peer closed the stream");
                    return Ok(());
                }
            },

            packet = next_datagram(datagram) => {
                if !accept_fed(io.feed_datagram(&packet?))? {
                    return Ok(());
                }
            }

            _ = grace_expired(conn.goodbye_deadline()) => {
                tracing::info!(conn = %conn.describe(), "no goodbye reply in time, dropping");
                return Ok(());
            }
        }
    }
}

/// Writes one flush worth of outbound messages.
async fn write_batch<S, L, D>(
    link: &L,
    datagram: Option<&D>,
    io: &mut ConnectionIo<S>,
) -> Result<(), TransportError>
where
    S: Side,
    L: Link<Error = TransportError>,
    D: DatagramLink<Error = TransportError>,
{
    let flush = io.flush_outbound();
    if !flush.stream.is_empty() {
        link.send(&flush.stream).await?;
    }
    if let Some(datagram) = datagram {
        for packet in &flush.datagrams {
            datagram.send_datagram(packet).await?;
        }
    }
    if io.has_pending_outbound() {
        // More than one batch was waiting; come straight back.
        io.connection().wake();
    }
    Ok(())
}

/// `Ok(false)` means the connection closed while feeding.
fn accept_fed<T>(fed: Result<T, ConnectionError>) -> Result<bool, ChipperError> {
    match fed {
        Ok(_) => Ok(true),
        Err(ConnectionError::Closed) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn next_datagram<D: DatagramLink>(datagram: Option<&D>) -> Result<Vec<u8>, D::Error> {
    match datagram {
        Some(link) => link.recv_datagram().await,
        None => std::future::pending().await,
    }
}

async fn grace_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
