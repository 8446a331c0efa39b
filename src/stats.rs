use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Packet counters of a connection. Counting happens concurrently from the send and receive
///  paths, but reading and resetting deltas is done by a single reporting call.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_sent_reported: AtomicU64,
    packets_received_reported: AtomicU64,
    /// NB: signed so that an out-of-order remove before the corresponding add does not wrap
    unacked_bytes: AtomicI64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsReport {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// bytes of reliable packets that are currently waiting for an ACK
    pub unacked_bytes: u64,
}

impl ConnectionStats {
    pub fn on_packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_unacked_bytes(&self, byte_count: usize) {
        self.unacked_bytes.fetch_add(byte_count as i64, Ordering::Relaxed);
    }

    pub fn remove_unacked_bytes(&self, byte_count: usize) {
        self.unacked_bytes.fetch_sub(byte_count as i64, Ordering::Relaxed);
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn unacked_bytes(&self) -> u64 {
        self.unacked_bytes.load(Ordering::Relaxed).max(0) as u64
    }

    /// Returns the number of packets sent and received since the previous report, and the
    ///  current number of unacknowledged bytes
    pub fn report(&self) -> StatsReport {
        let sent = self.packets_sent();
        let received = self.packets_received();

        StatsReport {
            packets_sent: sent - self.packets_sent_reported.swap(sent, Ordering::Relaxed),
            packets_received: received - self.packets_received_reported.swap(received, Ordering::Relaxed),
            unacked_bytes: self.unacked_bytes(),
        }
    }
}
