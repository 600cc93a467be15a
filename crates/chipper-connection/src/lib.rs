//! Per-peer connection state for Chipper.
//!
//! One connection is split three ways, so that each piece of state has
//! exactly one owner:
//!
//! ```text
//!                    ┌──────────── Connection (Clone, any task) ───────────┐
//!                    │ send_message · goodbye · disconnect · describe      │
//!                    │ flags · disconnect record · stats                   │
//!                    └──────┬─────────────────────────────────────▲────────┘
//!                outbound   │                                     │ inbound
//!                  queue    ▼                                     │  queue
//!  socket ◀── ConnectionIo (I/O task only) ──── decoded ────▶ Inbox (logic task)
//!             read buffer · short-ID table                       process_pending
//!             current protocol
//! ```
//!
//! [`Connection::open`] hands out all three. The two queues are the only
//! synchronisation points between the I/O task and game logic; the wire
//! state cannot be reached from any other task because [`ConnectionIo`] is
//! not `Clone` and is never shared.

mod config;
mod connection;
mod error;
mod inbox;
mod io;
mod short_id;
mod stats;

pub use config::{ConnectionConfig, LossSimulation};
pub use connection::{Connection, Describer, DisconnectRecord, GOODBYE_SENT};
pub use error::ConnectionError;
pub use inbox::Inbox;
pub use io::{Channel, ConnectionIo, Flush};
pub use short_id::ShortIdTable;
pub use stats::{Backlog, ConnectionStats};
