//! The shareable connection handle.
//!
//! [`Connection`] is what game code holds: any thread can clone it, queue
//! messages, say goodbye, read the disconnect record, or close the socket.
//! It never touches wire state; that belongs to
//! [`ConnectionIo`](crate::ConnectionIo) on the I/O task and
//! [`Inbox`](crate::Inbox) on the logic task.
//!
//! # Lifecycle
//!
//! ```text
//!            goodbye()                    grace expires / ack received
//! Active ──────────────→ LocalGoodbyeSent ─────────────────────────────→ Closed
//!   │                                                                      ▲
//!   └── peer goodbye → RemoteGoodbyeReceived ── reply, peer closes ───────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chipper_protocol::{Goodbye, Identifier, Message, Peer, ProtocolRegistry, SendMode, Side};
use chipper_transport::ConnectionId;
use rand::Rng;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use crate::stats::{Backlog, Counters, DepthGauge};
use crate::{ConnectionConfig, ConnectionIo, ConnectionStats, Inbox};

/// Flag set once the local side has sent its goodbye.
pub const GOODBYE_SENT: Identifier = Identifier::from_static("chipper", "goodbye_sent");

/// Builds a log label for a connection, or declines with `None`.
pub type Describer = Arc<dyn Fn(&Connection) -> Option<String> + Send + Sync>;

/// Why a connection ended, and who ended it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectRecord {
    pub reason: Identifier,
    pub extras: Vec<String>,
    /// `true` if the peer said goodbye first.
    pub remote: bool,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Shared {
    pub(crate) id: ConnectionId,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) config: ConnectionConfig,
    pub(crate) outbound: mpsc::UnboundedSender<Box<dyn Message>>,
    pub(crate) outbound_depth: DepthGauge,
    pub(crate) inbound_depth: DepthGauge,
    pub(crate) counters: Counters,
    flags: Mutex<HashMap<Identifier, bool>>,
    record: Mutex<Option<DisconnectRecord>>,
    goodbye_deadline: Mutex<Option<Instant>>,
    describers: RwLock<Vec<Describer>>,
    closed: AtomicBool,
    wake: Notify,
    on_close: Notify,
}

/// A cheap, cloneable handle to one peer.
#[derive(Clone)]
pub struct Connection {
    pub(crate) shared: Arc<Shared>,
}

impl Connection {
    /// Opens a connection and splits it into its three owners.
    ///
    /// - the [`Connection`] handle, for anyone;
    /// - the [`ConnectionIo`], for the task that owns the socket;
    /// - the [`Inbox`], for the task that processes inbound messages.
    pub fn open<S: Side>(
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
        registry: Arc<ProtocolRegistry>,
        config: ConnectionConfig,
    ) -> (Connection, ConnectionIo<S>, Inbox<S>) {
        let config = config.validated();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            id,
            remote_addr,
            outbound: outbound_tx,
            outbound_depth: DepthGauge::new(config.warn_queue_depth, config.critical_queue_depth),
            inbound_depth: DepthGauge::new(config.warn_queue_depth, config.critical_queue_depth),
            counters: Counters::default(),
            flags: Mutex::new(HashMap::new()),
            record: Mutex::new(None),
            goodbye_deadline: Mutex::new(None),
            describers: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            wake: Notify::new(),
            on_close: Notify::new(),
            config,
        });
        let conn = Connection { shared };
        tracing::debug!(%id, role = %S::ROLE, "connection opened");

        let io = ConnectionIo::new(conn.clone(), registry, outbound_rx, inbound_tx);
        let inbox = Inbox::new(conn.clone(), inbound_rx);
        (conn, io, inbox)
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.remote_addr
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Queues `message` for the I/O task.
    ///
    /// Silently dropped once the connection is closed or the local side has
    /// said goodbye. With loss simulation enabled, non-reliable messages are
    /// dropped at random.
    pub fn send_message<M: Message>(&self, message: M) {
        self.send_boxed_message(Box::new(message));
    }

    fn send_boxed_message(&self, message: Box<dyn Message>) {
        if self.is_closed() {
            tracing::trace!(conn = %self.describe(), id = %message.id(), "send on closed connection");
            return;
        }
        if self.has_said_goodbye() {
            Counters::bump(&self.shared.counters.dropped_after_goodbye, 1);
            tracing::debug!(conn = %self.describe(), id = %message.id(), "send after goodbye dropped");
            return;
        }
        if let Some(loss) = self.shared.config.loss {
            if message.send_mode() != SendMode::Reliable
                && rand::rng().random_bool(loss.drop_chance)
            {
                Counters::bump(&self.shared.counters.dropped_by_loss, 1);
                tracing::trace!(id = %message.id(), "simulated loss");
                return;
            }
        }
        self.enqueue(message);
    }

    fn enqueue(&self, message: Box<dyn Message>) {
        // Count before sending so the I/O side can never pop first.
        let gauge = &self.shared.outbound_depth;
        let level = gauge.push();
        if self.shared.outbound.send(message).is_err() {
            // The I/O side is gone; nothing will ever flush this.
            gauge.pop(1);
            return;
        }
        if let Some(level) = level {
            self.report_backlog("outbound", level, gauge.depth());
        }
        self.shared.wake.notify_one();
    }

    pub(crate) fn report_backlog(&self, queue: &'static str, level: Backlog, depth: usize) {
        match level {
            Backlog::Normal => {}
            Backlog::Behind => tracing::warn!(
                conn = %self.describe(),
                queue,
                depth,
                "connection falling behind"
            ),
            Backlog::MajorlyBehind => tracing::error!(
                conn = %self.describe(),
                queue,
                depth,
                "connection majorly behind, possible flood or stall"
            ),
        }
    }

    // -----------------------------------------------------------------------
    // Goodbye and disconnect
    // -----------------------------------------------------------------------

    /// Says goodbye to the peer. Only the first call has any effect.
    ///
    /// Records `reason` as the local disconnect reason (unless the peer
    /// already said goodbye), sends the goodbye message, and arms a timer
    /// that force-closes the connection after the grace period.
    pub fn goodbye(&self, reason: Identifier, extras: Vec<String>) {
        if self.is_closed() {
            return;
        }
        {
            let mut flags = lock(&self.shared.flags);
            if flags.get(&GOODBYE_SENT).copied().unwrap_or(false) {
                return;
            }
            flags.insert(GOODBYE_SENT, true);
        }
        self.set_record(reason.clone(), extras.clone(), false);
        tracing::info!(conn = %self.describe(), %reason, "saying goodbye");

        self.enqueue(Box::new(Goodbye::new(reason, extras)));
        *lock(&self.shared.goodbye_deadline) = Some(Instant::now() + self.shared.config.goodbye_grace());
        self.shared.wake.notify_one();
    }

    /// Closes the connection now.
    ///
    /// Anything still queued in either direction is discarded, not sent.
    pub fn disconnect(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.outbound_depth.reset();
        tracing::info!(conn = %self.describe(), "disconnected");
        self.shared.wake.notify_one();
        self.shared.on_close.notify_waiters();
    }

    /// `false` once closed, or once the goodbye grace period has run out.
    pub fn is_connected(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        match *lock(&self.shared.goodbye_deadline) {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn has_said_goodbye(&self) -> bool {
        self.flag(&GOODBYE_SENT)
    }

    /// When the connection will be force-closed, if goodbye was said.
    pub fn goodbye_deadline(&self) -> Option<Instant> {
        *lock(&self.shared.goodbye_deadline)
    }

    fn set_record(&self, reason: Identifier, extras: Vec<String>, remote: bool) -> bool {
        let mut record = lock(&self.shared.record);
        if record.is_some() {
            return false;
        }
        *record = Some(DisconnectRecord {
            reason,
            extras,
            remote,
        });
        true
    }

    /// Why the connection is ending, if anyone said goodbye.
    pub fn disconnect_record(&self) -> Option<DisconnectRecord> {
        lock(&self.shared.record).clone()
    }

    pub fn disconnect_reason(&self) -> Option<Identifier> {
        lock(&self.shared.record).as_ref().map(|r| r.reason.clone())
    }

    pub fn disconnect_extras(&self) -> Vec<String> {
        lock(&self.shared.record)
            .as_ref()
            .map(|r| r.extras.clone())
            .unwrap_or_default()
    }

    /// `true` if the peer said goodbye first.
    pub fn did_remote_disconnect(&self) -> bool {
        lock(&self.shared.record)
            .as_ref()
            .is_some_and(|r| r.remote)
    }

    // -----------------------------------------------------------------------
    // Flags
    // -----------------------------------------------------------------------

    /// Reads an ad hoc session flag. Unset flags are `false`.
    pub fn flag(&self, flag: &Identifier) -> bool {
        lock(&self.shared.flags).get(flag).copied().unwrap_or(false)
    }

    pub fn set_flag(&self, flag: Identifier, value: bool) {
        lock(&self.shared.flags).insert(flag, value);
    }

    // -----------------------------------------------------------------------
    // Describe
    // -----------------------------------------------------------------------

    /// Adds a describer. The most recently added one is asked first.
    pub fn add_describer<F>(&self, describer: F)
    where
        F: Fn(&Connection) -> Option<String> + Send + Sync + 'static,
    {
        self.shared
            .describers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(describer));
    }

    /// Human-readable label for logs.
    ///
    /// Asks each describer, newest first, and falls back to the remote
    /// address and then the connection ID.
    pub fn describe(&self) -> String {
        let describers: Vec<Describer> = self
            .shared
            .describers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        describers
            .iter()
            .rev()
            .find_map(|describe| describe(self))
            .or_else(|| self.shared.remote_addr.map(|addr| addr.to_string()))
            .unwrap_or_else(|| self.shared.id.to_string())
    }

    // -----------------------------------------------------------------------
    // Driver hooks
    // -----------------------------------------------------------------------

    /// Completes when something needs the I/O task's attention: a queued
    /// message, a goodbye, or a disconnect.
    pub async fn notified(&self) {
        self.shared.wake.notified().await;
    }

    /// Completes once the connection is closed.
    pub async fn closed(&self) {
        let notified = self.shared.on_close.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Wakes the I/O task.
    pub fn wake(&self) {
        self.shared.wake.notify_one();
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared
            .counters
            .snapshot(&self.shared.inbound_depth, &self.shared.outbound_depth)
    }
}

impl Peer for Connection {
    fn send_boxed(&self, message: Box<dyn Message>) {
        self.send_boxed_message(message);
    }

    fn goodbye(&self, reason: Identifier, extras: Vec<String>) {
        Connection::goodbye(self, reason, extras);
    }

    fn disconnect(&self) {
        Connection::disconnect(self);
    }

    fn is_connected(&self) -> bool {
        Connection::is_connected(self)
    }

    fn describe(&self) -> String {
        Connection::describe(self)
    }

    fn has_said_goodbye(&self) -> bool {
        Connection::has_said_goodbye(self)
    }

    fn record_remote_goodbye(&self, reason: Identifier, extras: Vec<String>) -> bool {
        self.set_record(reason, extras, true)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("remote_addr", &self.shared.remote_addr)
            .field("closed", &self.is_closed())
            .field("said_goodbye", &self.has_said_goodbye())
            .finish()
    }
}
