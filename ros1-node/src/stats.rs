//! Per-connection traffic counters, surfaced through `getBusStats` /
//! `getBusInfo`

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A point-in-time snapshot of a connection's counters.
///
/// `dropped_estimate` is `-1` when the connection does not track drops at
/// all: inbound (`SubscriberConnection`) sides never drop, so they always
/// report the sentinel; outbound (`PublisherConnection`) sides start at
/// `0` and count up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub dropped_estimate: i64,
}

/// Atomic-backed counters updated from the I/O tasks and read from the
/// follower RPC surface without locking.
#[derive(Debug)]
pub struct StatsCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    dropped_estimate: AtomicU64,
    track_dropped: AtomicBool,
}

impl StatsCounters {
    /// `track_dropped` distinguishes publisher connections (which can drop
    /// messages on a full outbound queue) from subscriber connections
    /// (which never drop, since rejecting a slow reader would stall every
    /// other subscriber fed by the same publication).
    pub fn new(track_dropped: bool) -> Self {
        Self {
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            dropped_estimate: AtomicU64::new(0),
            track_dropped: AtomicBool::new(track_dropped),
        }
    }

    pub fn record_sent_bytes(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_received_bytes(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        if self.track_dropped.load(Ordering::Relaxed) {
            self.dropped_estimate.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> Stats {
        let dropped_estimate = if self.track_dropped.load(Ordering::Relaxed) {
            self.dropped_estimate.load(Ordering::Relaxed) as i64
        } else {
            -1
        };
        Stats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            dropped_estimate,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_activity() {
        let counters = StatsCounters::new(true);
        counters.record_sent_bytes(10);
        counters.record_sent_bytes(5);
        counters.record_message_sent();
        counters.record_received_bytes(7);
        counters.record_message_received();
        counters.record_dropped();

        let snap = counters.snapshot();
        assert_eq!(snap.bytes_sent, 15);
        assert_eq!(snap.bytes_received, 7);
        assert_eq!(snap.messages_sent, 1);
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.dropped_estimate, 1);
    }

    #[test]
    fn dropped_is_reported_as_sentinel_when_disabled() {
        let counters = StatsCounters::new(false);
        counters.record_dropped();
        assert_eq!(counters.snapshot().dropped_estimate, -1);
    }
}
