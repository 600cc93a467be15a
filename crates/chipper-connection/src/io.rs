//! The I/O half of a connection.
//!
//! [`ConnectionIo`] owns everything that must only ever be touched by the
//! task driving the socket: the receive buffer, the short-ID table, and the
//! current protocol. It is neither `Clone` nor shared; the only ways in and
//! out are the two message queues.
//!
//! The driver calls three methods per I/O cycle:
//!
//! - [`feed_stream_bytes`](ConnectionIo::feed_stream_bytes) with whatever
//!   the stream produced (any split, any size);
//! - [`feed_datagram`](ConnectionIo::feed_datagram) with each datagram;
//! - [`flush_outbound`](ConnectionIo::flush_outbound) to get bytes to send.
//!
//! A feed error means the peer broke the protocol. The connection is
//! already closed by the time the error is returned.

use std::marker::PhantomData;
use std::sync::Arc;

use chipper_protocol::{
    Goodbye, Identifier, Marshaller, Message, MessageType, Packet, PacketId, Protocol,
    ProtocolError, ProtocolRegistry, SendMode, Side, Unmarshaller, split_stream_frame,
};
use tokio::sync::mpsc;

use crate::stats::Counters;
use crate::{Connection, ConnectionError, ShortIdTable};

/// Which channel a packet arrived on or leaves by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stream,
    Datagram,
}

/// Bytes produced by one call to [`ConnectionIo::flush_outbound`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Flush {
    /// Length-prefixed frames, concatenated, for the stream.
    pub stream: Vec<u8>,
    /// One entry per datagram.
    pub datagrams: Vec<Vec<u8>>,
    /// Messages taken off the outbound queue, including dropped ones.
    pub taken: usize,
}

impl Flush {
    pub fn is_empty(&self) -> bool {
        self.stream.is_empty() && self.datagrams.is_empty()
    }
}

/// Network-side owner of a connection's wire state.
pub struct ConnectionIo<S: Side> {
    conn: Connection,
    registry: Arc<ProtocolRegistry>,
    protocol: Arc<Protocol>,
    short_ids: ShortIdTable,
    read_buf: Vec<u8>,
    datagram_channel: bool,
    outbound: mpsc::UnboundedReceiver<Box<dyn Message>>,
    inbound: mpsc::UnboundedSender<Box<S::Inbound>>,
    _side: PhantomData<S>,
}

impl<S: Side> ConnectionIo<S> {
    pub(crate) fn new(
        conn: Connection,
        registry: Arc<ProtocolRegistry>,
        outbound: mpsc::UnboundedReceiver<Box<dyn Message>>,
        inbound: mpsc::UnboundedSender<Box<S::Inbound>>,
    ) -> Self {
        let protocol = Arc::clone(registry.base());
        let read_buf = Vec::with_capacity(conn.config().initial_buffer_capacity);
        Self {
            conn,
            registry,
            protocol,
            short_ids: ShortIdTable::new(),
            read_buf,
            datagram_channel: false,
            outbound,
            inbound,
            _side: PhantomData,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// The protocol inbound messages are currently decoded with.
    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    /// Switches to `protocol` for all following inbound packets.
    pub fn switch_protocol(&mut self, protocol: Arc<Protocol>) {
        tracing::debug!(
            conn = %self.conn.describe(),
            from = self.protocol.name(),
            to = protocol.name(),
            "switching protocol"
        );
        self.protocol = protocol;
    }

    /// Declares whether a datagram channel exists.
    ///
    /// Without one, `Unreliable` messages fall back to the stream and
    /// `Unimportant` messages are dropped.
    pub fn set_datagram_channel(&mut self, available: bool) {
        self.datagram_channel = available;
    }

    pub fn has_datagram_channel(&self) -> bool {
        self.datagram_channel
    }

    /// Bytes received but not yet forming a complete frame.
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    pub fn short_ids(&self) -> &ShortIdTable {
        &self.short_ids
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Appends stream bytes and decodes every complete frame.
    ///
    /// Returns the number of messages queued for processing. A partial
    /// frame stays buffered until more bytes arrive.
    pub fn feed_stream_bytes(&mut self, bytes: &[u8]) -> Result<usize, ConnectionError> {
        if self.conn.is_closed() {
            self.read_buf.clear();
            return Err(ConnectionError::Closed);
        }
        Counters::bump(&self.conn.shared.counters.bytes_in, bytes.len() as u64);
        self.append(bytes);

        let max_frame_len = self.conn.config().max_frame_len;
        let mut consumed = 0;
        let mut queued = 0;
        let result = loop {
            let split = split_stream_frame(&self.read_buf[consumed..], max_frame_len);
            let (body, used) = match split {
                Ok(Some(frame)) => frame,
                Ok(None) => break Ok(queued),
                Err(e) => break Err(e),
            };
            let packet = match decode_frame(body) {
                Ok(packet) => packet,
                Err(e) => break Err(e),
            };
            consumed += used;
            match self.handle_packet(packet, Channel::Stream) {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(e) => break Err(e),
            }
            if self.conn.is_closed() {
                break Ok(queued);
            }
        };

        match result {
            Ok(queued) => {
                self.read_buf.drain(..consumed);
                Ok(queued)
            }
            Err(e) => Err(self.violation(e)),
        }
    }

    /// Decodes one datagram, which must hold exactly one packet.
    ///
    /// Returns `true` if a message was queued for processing.
    pub fn feed_datagram(&mut self, datagram: &[u8]) -> Result<bool, ConnectionError> {
        if self.conn.is_closed() {
            return Err(ConnectionError::Closed);
        }
        Counters::bump(&self.conn.shared.counters.bytes_in, datagram.len() as u64);
        Packet::from_datagram(datagram)
            .and_then(|packet| self.handle_packet(packet, Channel::Datagram))
            .map_err(|e| self.violation(e))
    }

    /// Grows the receive buffer by half again whenever `bytes` would not fit.
    fn append(&mut self, bytes: &[u8]) {
        let needed = self.read_buf.len() + bytes.len();
        let mut capacity = self.read_buf.capacity().max(16);
        if needed > capacity {
            while capacity < needed {
                capacity += capacity / 2;
            }
            self.read_buf.reserve_exact(capacity - self.read_buf.len());
        }
        self.read_buf.extend_from_slice(bytes);
    }

    fn handle_packet(&mut self, packet: Packet, channel: Channel) -> Result<bool, ProtocolError> {
        Counters::bump(&self.conn.shared.counters.packets_in, 1);
        let id = match packet.id {
            PacketId::Short(short_id) => self.short_ids.resolve(short_id)?.clone(),
            PacketId::Long { short_id, id } => {
                if short_id != 0 {
                    self.short_ids.learn(short_id, &id)?;
                }
                id
            }
        };
        self.maybe_switch_for(&id);

        let mut input = Unmarshaller::new(&packet.payload);
        let message = S::decode(&self.protocol, &id, &mut input)?;
        if !input.is_empty() {
            return Err(ProtocolError::InvalidMessage(format!(
                "{} trailing bytes after {id} payload",
                input.remaining()
            )));
        }

        if self.conn.has_said_goodbye() && id != Goodbye::ID {
            Counters::bump(&self.conn.shared.counters.dropped_after_goodbye, 1);
            tracing::trace!(conn = %self.conn.describe(), %id, "inbound after goodbye discarded");
            return Ok(false);
        }

        tracing::trace!(%id, ?channel, "message received");
        // Count before sending so the inbox can never pop first.
        let gauge = &self.conn.shared.inbound_depth;
        let level = gauge.push();
        if self.inbound.send(message).is_err() {
            gauge.pop(1);
            return Ok(false);
        }
        if let Some(level) = level {
            self.conn.report_backlog("inbound", level, gauge.depth());
        }
        Ok(true)
    }

    /// Switches protocol when `id` is foreign to the current one but starts
    /// a registered protocol.
    fn maybe_switch_for(&mut self, id: &Identifier) {
        if self.protocol.accepts(S::ROLE, id) {
            return;
        }
        if let Some(next) = self.registry.by_start_message(id) {
            let next = Arc::clone(next);
            self.switch_protocol(next);
        }
    }

    fn violation(&mut self, error: ProtocolError) -> ConnectionError {
        tracing::warn!(conn = %self.conn.describe(), %error, "protocol violation");
        self.read_buf.clear();
        self.conn.disconnect();
        ConnectionError::Protocol(error)
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Encodes up to `flush_batch` queued messages.
    ///
    /// Once the connection is closed, everything queued is discarded.
    pub fn flush_outbound(&mut self) -> Flush {
        let mut flush = Flush::default();
        if self.conn.is_closed() {
            self.discard_outbound();
            return flush;
        }

        let batch = self.conn.config().flush_batch;
        while flush.taken < batch {
            let Ok(message) = self.outbound.try_recv() else {
                break;
            };
            flush.taken += 1;
            self.conn.shared.outbound_depth.pop(1);

            let Some(channel) = self.channel_for(message.send_mode()) else {
                Counters::bump(&self.conn.shared.counters.dropped_no_channel, 1);
                tracing::trace!(id = %message.id(), "no datagram channel, unimportant message dropped");
                continue;
            };
            self.encode(message.as_ref(), channel, &mut flush);
        }

        let counters = &self.conn.shared.counters;
        Counters::bump(&counters.bytes_out, flush.stream.len() as u64);
        for datagram in &flush.datagrams {
            Counters::bump(&counters.bytes_out, datagram.len() as u64);
        }
        flush
    }

    /// `true` if messages are still waiting after a flush.
    pub fn has_pending_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn channel_for(&self, mode: SendMode) -> Option<Channel> {
        match (mode, self.datagram_channel) {
            (SendMode::Reliable, _) => Some(Channel::Stream),
            (SendMode::Unreliable | SendMode::Unimportant, true) => Some(Channel::Datagram),
            (SendMode::Unreliable, false) => Some(Channel::Stream),
            (SendMode::Unimportant, false) => None,
        }
    }

    fn encode(&mut self, message: &dyn Message, channel: Channel, flush: &mut Flush) {
        let id = message.id();
        let mut payload = Marshaller::new();
        message.marshal(&mut payload);

        let packet_id = match channel {
            Channel::Stream => match self.short_ids.outgoing(&id) {
                Some(short_id) => PacketId::Short(short_id),
                None => PacketId::Long {
                    short_id: self.short_ids.mint(&id).unwrap_or(0),
                    id,
                },
            },
            Channel::Datagram => PacketId::Long { short_id: 0, id },
        };
        let packet = Packet {
            id: packet_id,
            payload: payload.finish(),
        };

        match channel {
            Channel::Stream => flush.stream.extend_from_slice(&packet.to_stream_frame()),
            Channel::Datagram => flush.datagrams.push(packet.to_datagram()),
        }
        Counters::bump(&self.conn.shared.counters.packets_out, 1);
    }

    /// Drops everything still queued for sending.
    pub fn discard_outbound(&mut self) {
        let mut dropped = 0;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(conn = %self.conn.describe(), dropped, "discarded unsent messages");
        }
        self.conn.shared.outbound_depth.reset();
    }
}

/// Decodes the packet inside one stream frame. The frame is complete, so
/// running short here is corruption, not a partial read.
fn decode_frame(body: &[u8]) -> Result<Packet, ProtocolError> {
    let mut input = Unmarshaller::new(body);
    let packet = Packet::decode(&mut input)?;
    if !input.is_empty() {
        return Err(ProtocolError::InvalidMessage(format!(
            "{} trailing bytes in stream frame",
            input.remaining()
        )));
    }
    Ok(packet)
}

impl<S: Side> std::fmt::Debug for ConnectionIo<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionIo")
            .field("conn", &self.conn.id())
            .field("role", &S::ROLE)
            .field("protocol", &self.protocol.name())
            .field("buffered", &self.read_buf.len())
            .finish()
    }
}
