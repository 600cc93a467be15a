//! Counters and queue-depth monitoring.

use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

/// Point-in-time copy of a connection's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub packets_in: u64,
    pub packets_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Unreliable messages dropped by loss simulation.
    pub dropped_by_loss: u64,
    /// Messages discarded because the local side already said goodbye.
    pub dropped_after_goodbye: u64,
    /// `Unimportant` messages dropped for lack of a datagram channel.
    pub dropped_no_channel: u64,
    /// Messages waiting to be processed.
    pub inbound_depth: usize,
    /// Messages waiting to be sent.
    pub outbound_depth: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) packets_in: AtomicU64,
    pub(crate) packets_out: AtomicU64,
    pub(crate) bytes_in: AtomicU64,
    pub(crate) bytes_out: AtomicU64,
    pub(crate) dropped_by_loss: AtomicU64,
    pub(crate) dropped_after_goodbye: AtomicU64,
    pub(crate) dropped_no_channel: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, inbound: &DepthGauge, outbound: &DepthGauge) -> ConnectionStats {
        ConnectionStats {
            packets_in: self.packets_in.load(Ordering::Relaxed),
            packets_out: self.packets_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            dropped_by_loss: self.dropped_by_loss.load(Ordering::Relaxed),
            dropped_after_goodbye: self.dropped_after_goodbye.load(Ordering::Relaxed),
            dropped_no_channel: self.dropped_no_channel.load(Ordering::Relaxed),
            inbound_depth: inbound.depth(),
            outbound_depth: outbound.depth(),
        }
    }
}

// ---------------------------------------------------------------------------
// DepthGauge
// ---------------------------------------------------------------------------

/// How far a queue has backed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Backlog {
    Normal = 0,
    /// Above the warn depth.
    Behind = 1,
    /// Above the critical depth.
    MajorlyBehind = 2,
}

impl Backlog {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Normal,
            1 => Self::Behind,
            _ => Self::MajorlyBehind,
        }
    }
}

/// Tracks the length of one queue and reports threshold crossings.
///
/// Reporting is edge-triggered: a level is reported once when first
/// crossed, and re-armed only after the queue drains back to the warn
/// depth.
#[derive(Debug)]
pub(crate) struct DepthGauge {
    depth: AtomicUsize,
    reported: AtomicU8,
    warn: usize,
    critical: usize,
}

impl DepthGauge {
    pub(crate) fn new(warn: usize, critical: usize) -> Self {
        Self {
            depth: AtomicUsize::new(0),
            reported: AtomicU8::new(Backlog::Normal as u8),
            warn,
            critical,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Counts one enqueued message. Returns the backlog level if this push
    /// crossed into it for the first time.
    pub(crate) fn push(&self) -> Option<Backlog> {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        let level = if depth > self.critical {
            Backlog::MajorlyBehind
        } else if depth > self.warn {
            Backlog::Behind
        } else {
            return None;
        };
        let previous = self.reported.fetch_max(level as u8, Ordering::Relaxed);
        (Backlog::from_u8(previous) < level).then_some(level)
    }

    /// Counts `n` dequeued messages.
    pub(crate) fn pop(&self, n: usize) {
        let before = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(n))
            })
            .unwrap_or(0);
        if before.saturating_sub(n) <= self.warn {
            self.reported.store(Backlog::Normal as u8, Ordering::Relaxed);
        }
    }

    /// Forgets everything queued.
    pub(crate) fn reset(&self) {
        self.depth.store(0, Ordering::Relaxed);
        self.reported.store(Backlog::Normal as u8, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_reported_once_on_crossing() {
        let gauge = DepthGauge::new(2, 4);
        assert_eq!(gauge.push(), None);
        assert_eq!(gauge.push(), None);
        assert_eq!(gauge.push(), Some(Backlog::Behind));
        assert_eq!(gauge.push(), None);
        assert_eq!(gauge.push(), Some(Backlog::MajorlyBehind));
        assert_eq!(gauge.push(), None);
        assert_eq!(gauge.depth(), 6);
    }

    #[test]
    fn test_draining_rearms_the_warning() {
        let gauge = DepthGauge::new(2, 4);
        for _ in 0..3 {
            gauge.push();
        }
        gauge.pop(1);
        assert_eq!(gauge.depth(), 2);
        assert_eq!(gauge.push(), Some(Backlog::Behind));
    }

    #[test]
    fn test_pop_never_underflows() {
        let gauge = DepthGauge::new(2, 4);
        gauge.push();
        gauge.pop(5);
        assert_eq!(gauge.depth(), 0);
        gauge.push();
        gauge.reset();
        assert_eq!(gauge.depth(), 0);
    }

    #[test]
    fn test_snapshot_reads_all_counters() {
        let counters = Counters::default();
        Counters::bump(&counters.packets_in, 2);
        Counters::bump(&counters.bytes_out, 40);
        let inbound = DepthGauge::new(10, 100);
        inbound.push();
        let stats = counters.snapshot(&inbound, &DepthGauge::new(10, 100));
        assert_eq!(stats.packets_in, 2);
        assert_eq!(stats.bytes_out, 40);
        assert_eq!(stats.inbound_depth, 1);
        assert_eq!(stats.outbound_depth, 0);
    }
}
