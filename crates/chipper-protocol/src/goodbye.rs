//! The built-in farewell message.
//!
//! Either side may say goodbye with a reason and free-form extras. The
//! handshake:
//!
//! ```text
//!   A                                   B
//!   │── goodbye(game:kicked, extras) ──▶│  B records the reason (remote),
//!   │                                   │  runs on_remote_goodbye, replies
//!   │◀──── goodbye(chipper:ack) ────────│
//!   │  A already said goodbye:          │
//!   │  handshake complete, disconnect   │
//! ```
//!
//! A side that never hears back closes the socket itself once its grace
//! timer expires.

use crate::{
    ClientContext, Clientbound, CodecError, Direction, Identifier, Marshaller, Message,
    MessageType, Peer, ServerContext, Serverbound, Unmarshaller,
};

/// Reason used when replying to a peer's goodbye.
pub const ACKNOWLEDGED: Identifier = Identifier::from_static("chipper", "acknowledged");

/// Announces that the sender is closing the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goodbye {
    pub reason: Identifier,
    pub extras: Vec<String>,
}

impl Goodbye {
    pub fn new(reason: Identifier, extras: Vec<String>) -> Self {
        Self { reason, extras }
    }

    /// Applies the goodbye to `peer`.
    ///
    /// Returns `true` when the peer spoke first, in which case the caller
    /// should notify its context before the reply goes out.
    fn record(&self, peer: &dyn Peer) -> bool {
        let first = peer.record_remote_goodbye(self.reason.clone(), self.extras.clone());
        tracing::info!(
            conn = %peer.describe(),
            reason = %self.reason,
            extras = ?self.extras,
            "peer said goodbye"
        );
        first
    }

    fn finish(peer: &dyn Peer) {
        if peer.has_said_goodbye() {
            tracing::debug!(conn = %peer.describe(), "goodbye handshake complete");
            peer.disconnect();
        } else {
            peer.goodbye(ACKNOWLEDGED, Vec::new());
        }
    }
}

impl Message for Goodbye {
    fn id(&self) -> Identifier {
        Self::ID
    }

    fn marshal(&self, out: &mut Marshaller) {
        out.write_identifier(&self.reason);
        out.write_ivar32(self.extras.len() as i32);
        for extra in &self.extras {
            out.write_str(extra);
        }
    }
}

impl MessageType for Goodbye {
    const ID: Identifier = Identifier::from_static("chipper", "goodbye");
    const DIRECTION: Direction = Direction::Bidirectional;

    fn unmarshal(input: &mut Unmarshaller<'_>) -> Result<Self, CodecError> {
        let reason = input.read_identifier()?;
        let count = input.read_ivar32()?;
        if count < 0 {
            return Err(CodecError::NegativeLength(count));
        }
        // Each string costs at least one byte, which bounds the allocation.
        let mut extras = Vec::with_capacity((count as usize).min(input.remaining()));
        for _ in 0..count {
            extras.push(input.read_string()?);
        }
        Ok(Self { reason, extras })
    }
}

impl Serverbound for Goodbye {
    fn process_server(self: Box<Self>, ctx: &mut dyn ServerContext) {
        if self.record(ctx.peer()) {
            ctx.on_remote_goodbye();
        }
        Self::finish(ctx.peer());
    }
}

impl Clientbound for Goodbye {
    fn process_client(self: Box<Self>, ctx: &mut dyn ClientContext) {
        if self.record(ctx.peer()) {
            ctx.on_remote_goodbye();
        }
        Self::finish(ctx.peer());
    }
}
