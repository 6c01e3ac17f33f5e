//! Correlation of in-flight echo requests with their replies.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// When an echo request was sent and to whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRecord {
    pub target: IpAddr,
    pub sent_at: Instant,
}

/// In-flight probes keyed by ICMP sequence number.
///
/// Reads take the shared lock; every mutation takes the exclusive lock.
#[derive(Debug, Default)]
pub struct CorrelationState {
    sequence: AtomicU16,
    pings: RwLock<HashMap<u16, PingRecord>>,
}

impl CorrelationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current sequence number and advances it, wrapping from
    /// 65535 back to 0.
    pub fn next_sequence(&self) -> u16 {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        if seq == u16::MAX {
            log::debug!("Resetting sequence number");
        }
        seq
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<u16, PingRecord>> {
        self.pings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u16, PingRecord>> {
        self.pings.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a sent probe, replacing any earlier record for `seq`.
    pub fn record(&self, seq: u16, target: IpAddr, sent_at: Instant) {
        if let Some(previous) = self.write().insert(seq, PingRecord { target, sent_at }) {
            log::debug!(
                "Sequence {} reused while {} was still in flight",
                seq,
                previous.target
            );
        }
    }

    #[cfg(test)]
    /// Round-trip time of `seq` if it is still in flight.
    pub fn resolve(&self, seq: u16, received_at: Instant) -> Option<Duration> {
        match self.read().get(&seq) {
            Some(record) => Some(received_at.saturating_duration_since(record.sent_at)),
            None => {
                log::debug!("Ping {} not found", seq);
                None
            }
        }
    }

    pub fn remove(&self, seq: u16) {
        self.write().remove(&seq);
    }

    /// Resolves and removes `seq` in one critical section, so that a reply
    /// racing a sweep is reported by exactly one of them.
    pub fn claim(&self, seq: u16, received_at: Instant) -> Option<(IpAddr, Duration)> {
        self.write()
            .remove(&seq)
            .map(|record| (record.target, received_at.saturating_duration_since(record.sent_at)))
    }

    /// Removes every probe sent more than `timeout` before `now` and returns
    /// their targets.
    pub fn sweep(&self, timeout: Duration, now: Instant) -> Vec<IpAddr> {
        let mut pings = self.write();
        let mut expired = Vec::new();
        pings.retain(|seq, record| {
            let alive = record.sent_at + timeout >= now;
            if !alive {
                log::debug!("Removing ping (seq {}) for {}", seq, record.target);
                expired.push(record.target);
            }
            alive
        });
        expired
    }

    /// Discards every in-flight probe without reporting it.
    pub fn clear(&self) -> usize {
        let mut pings = self.write();
        let dropped = pings.len();
        pings.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, seq: u16) -> bool {
        self.read().contains_key(&seq)
    }
}
