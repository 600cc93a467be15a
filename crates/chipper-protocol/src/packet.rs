//! The wire frame that carries one message.
//!
//! ```text
//! varint   idField      >0: short id; <=0: negated short id, long id follows
//! [string  namespace]   only if idField <= 0
//! [string  path]        only if idField <= 0
//! varint   payloadLen
//! bytes    payload[payloadLen]
//! ```
//!
//! On a TCP stream every packet is additionally wrapped in an outer
//! `varint frameLen` so the reader can tell a partial read from a complete
//! one. A UDP datagram carries exactly one packet and no outer prefix.

use crate::{CodecError, Identifier, Marshaller, ProtocolError, Unmarshaller};

/// How a packet names its message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketId {
    /// A short ID the receiver already learned. Always positive.
    Short(i32),
    /// The full Identifier, optionally binding a freshly minted short ID.
    Long {
        /// Short ID being introduced, or 0 when none is bound.
        short_id: i32,
        /// The message type.
        id: Identifier,
    },
}

/// One encoded message. Lives for a single encode or decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: PacketId,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Writes the packet without any outer frame.
    pub fn encode(&self, out: &mut Marshaller) {
        match &self.id {
            PacketId::Short(short_id) => {
                debug_assert!(*short_id > 0, "short ids are positive");
                out.write_ivar32(*short_id);
            }
            PacketId::Long { short_id, id } => {
                debug_assert!(*short_id >= 0);
                out.write_ivar32(-short_id);
                out.write_identifier(id);
            }
        }
        out.write_bytes(&self.payload);
    }

    /// Encodes the packet as a standalone datagram.
    pub fn to_datagram(&self) -> Vec<u8> {
        let mut out = Marshaller::with_capacity(self.payload.len() + 16);
        self.encode(&mut out);
        out.finish()
    }

    /// Encodes the packet with the outer stream length prefix.
    pub fn to_stream_frame(&self) -> Vec<u8> {
        let body = self.to_datagram();
        let mut out = Marshaller::with_capacity(body.len() + 5);
        out.write_bytes(&body);
        out.finish()
    }

    /// Reads one packet.
    ///
    /// # Errors
    /// [`ProtocolError::Codec`] wrapping an underflow when the input is
    /// truncated, [`ProtocolError::InvalidShortId`] when the leading varint
    /// is `i32::MIN`.
    pub fn decode(input: &mut Unmarshaller<'_>) -> Result<Self, ProtocolError> {
        let id_field = input.read_ivar32()?;
        let id = if id_field > 0 {
            PacketId::Short(id_field)
        } else {
            let short_id = id_field
                .checked_neg()
                .ok_or(ProtocolError::InvalidShortId(id_field))?;
            PacketId::Long {
                short_id,
                id: input.read_identifier()?,
            }
        };
        let payload = input.read_bytes()?;
        Ok(Self { id, payload })
    }

    /// Decodes a datagram, which must hold exactly one packet.
    ///
    /// Truncation is fatal here: a datagram never continues in the next one.
    pub fn from_datagram(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let mut input = Unmarshaller::new(datagram);
        let packet = Self::decode(&mut input)?;
        if !input.is_empty() {
            return Err(ProtocolError::InvalidMessage(format!(
                "{} trailing bytes after datagram packet",
                input.remaining()
            )));
        }
        Ok(packet)
    }
}

/// Splits the next complete frame off the front of a stream buffer.
///
/// Returns `Ok(None)` when the buffer does not yet hold a whole frame, and
/// `Ok(Some((body, consumed)))` otherwise. A negative or oversized frame
/// length is a protocol violation.
pub fn split_stream_frame(
    buf: &[u8],
    max_frame_len: usize,
) -> Result<Option<(&[u8], usize)>, ProtocolError> {
    let mut input = Unmarshaller::new(buf);
    let len = match input.read_ivar32() {
        Ok(len) => len,
        Err(e) if e.is_underflow() => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len < 0 || len as usize > max_frame_len {
        return Err(ProtocolError::FrameTooLarge {
            length: i64::from(len),
            max: max_frame_len,
        });
    }
    let header = input.position();
    match input.read_raw(len as usize) {
        Ok(body) => Ok(Some((body, header + len as usize))),
        Err(CodecError::Underflow { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
