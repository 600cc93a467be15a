//! Connection tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConnectionError;

// ---------------------------------------------------------------------------
// LossSimulation
// ---------------------------------------------------------------------------

/// Artificially drops unreliable traffic, to test how a game copes with a
/// bad network.
///
/// Only messages whose send mode is not `Reliable` are affected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossSimulation {
    /// Probability in `0.0..=1.0` that a message is dropped.
    pub drop_chance: f64,
}

// ---------------------------------------------------------------------------
// ConnectionConfig
// ---------------------------------------------------------------------------

/// Per-connection settings.
///
/// Can be loaded from JSON; missing fields take their defaults:
///
/// ```rust
/// use chipper_connection::ConnectionConfig;
///
/// let config = ConnectionConfig::from_json(r#"{ "flush_batch": 50 }"#).unwrap();
/// assert_eq!(config.flush_batch, 50);
/// assert_eq!(config.goodbye_grace_ms, 5_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Most outbound messages encoded per flush, so one busy peer cannot
    /// starve the others sharing an I/O task.
    pub flush_batch: usize,

    /// How long after saying goodbye the connection is force-closed if the
    /// peer never answers.
    pub goodbye_grace_ms: u64,

    /// Queue depth above which a "falling behind" warning is logged.
    pub warn_queue_depth: usize,

    /// Queue depth above which a "majorly behind" error is logged.
    pub critical_queue_depth: usize,

    /// Starting size of the stream receive buffer.
    pub initial_buffer_capacity: usize,

    /// Largest stream frame accepted from the peer, in bytes.
    pub max_frame_len: usize,

    /// Simulated packet loss. `None` in production.
    pub loss: Option<LossSimulation>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            flush_batch: 20,
            goodbye_grace_ms: 5_000,
            warn_queue_depth: 10,
            critical_queue_depth: 100,
            initial_buffer_capacity: 4 * 1024,
            max_frame_len: 16 * 1024 * 1024,
            loss: None,
        }
    }
}

impl ConnectionConfig {
    /// Frame lengths travel as a signed 32-bit varint.
    pub const MAX_FRAME_LEN: usize = i32::MAX as usize;

    /// Parses a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConnectionError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConnectionError::Config(e.to_string()))?;
        Ok(config.validated())
    }

    /// The goodbye grace period as a [`Duration`].
    pub fn goodbye_grace(&self) -> Duration {
        Duration::from_millis(self.goodbye_grace_ms)
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Rules:
    /// - `flush_batch` of 0 becomes 1.
    /// - `critical_queue_depth` is raised to at least `warn_queue_depth`.
    /// - `max_frame_len` capped to [`Self::MAX_FRAME_LEN`]; 0 restores the default.
    /// - `drop_chance` clamped to `0.0..=1.0`; NaN disables loss.
    pub fn validated(mut self) -> Self {
        if self.flush_batch == 0 {
            tracing::warn!("flush_batch of 0 would never send; using 1");
            self.flush_batch = 1;
        }
        if self.critical_queue_depth < self.warn_queue_depth {
            self.critical_queue_depth = self.warn_queue_depth;
        }
        if self.max_frame_len == 0 {
            self.max_frame_len = Self::default().max_frame_len;
        }
        if self.max_frame_len > Self::MAX_FRAME_LEN {
            tracing::warn!(
                max_frame_len = self.max_frame_len,
                max = Self::MAX_FRAME_LEN,
                "max_frame_len exceeds varint range; clamping"
            );
            self.max_frame_len = Self::MAX_FRAME_LEN;
        }
        if let Some(loss) = &mut self.loss {
            loss.drop_chance = if loss.drop_chance.is_nan() {
                0.0
            } else {
                loss.drop_chance.clamp(0.0, 1.0)
            };
        }
        self
    }
}
