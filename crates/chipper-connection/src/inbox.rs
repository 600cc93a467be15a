//! The logic-side consumer of inbound messages.

use chipper_protocol::Side;
use tokio::sync::mpsc;

use crate::Connection;

/// Inbound messages waiting to be processed.
///
/// There is exactly one `Inbox` per connection; it is not `Clone`. The game
/// loop (or whichever task owns game state) drains it.
pub struct Inbox<S: Side> {
    conn: Connection,
    rx: mpsc::UnboundedReceiver<Box<S::Inbound>>,
}

impl<S: Side> Inbox<S> {
    pub(crate) fn new(conn: Connection, rx: mpsc::UnboundedReceiver<Box<S::Inbound>>) -> Self {
        Self { conn, rx }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Number of messages waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Processes up to `limit` waiting messages against `ctx`.
    ///
    /// Stops early if a message closes the connection; whatever is left is
    /// discarded. Returns how many messages were processed.
    pub fn process_pending(&mut self, ctx: &mut S::Context, limit: usize) -> usize {
        let mut processed = 0;
        while processed < limit {
            if self.conn.is_closed() {
                self.discard();
                break;
            }
            let Ok(message) = self.rx.try_recv() else {
                break;
            };
            self.conn.shared.inbound_depth.pop(1);
            S::process(message, ctx);
            processed += 1;
        }
        processed
    }

    /// Takes the next waiting message without processing it.
    pub fn try_next(&mut self) -> Option<Box<S::Inbound>> {
        if self.conn.is_closed() {
            self.discard();
            return None;
        }
        let message = self.rx.try_recv().ok()?;
        self.conn.shared.inbound_depth.pop(1);
        Some(message)
    }

    /// Waits for the next message.
    ///
    /// Returns `None` once the connection is closed or its I/O side is gone.
    pub async fn recv(&mut self) -> Option<Box<S::Inbound>> {
        loop {
            if self.conn.is_closed() {
                self.discard();
                return None;
            }
            tokio::select! {
                message = self.rx.recv() => {
                    let message = message?;
                    if self.conn.is_closed() {
                        continue;
                    }
                    self.conn.shared.inbound_depth.pop(1);
                    return Some(message);
                }
                _ = self.conn.closed() => {}
            }
        }
    }

    fn discard(&mut self) {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(conn = %self.conn.describe(), dropped, "discarded unprocessed messages");
        }
        self.conn.shared.inbound_depth.reset();
    }
}

impl<S: Side> std::fmt::Debug for Inbox<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox")
            .field("conn", &self.conn.id())
            .field("pending", &self.rx.len())
            .finish()
    }
}
