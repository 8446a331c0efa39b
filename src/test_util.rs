use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::runtime::{Builder, Runtime};
use crate::category::{ThrottleCategory, CATEGORY_COUNT};
use crate::queue_empty::QueueEmptyHandler;
use crate::transport::{OutgoingPacket, PacketSink};

/// A single-threaded runtime with paused time, so token buckets replenish only when a test
///  advances the clock explicitly
pub fn paused_runtime() -> Runtime {
    Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-6, "{} is not close to {}", actual, expected);
}

/// Polls `condition` until it holds, for state that is changed on tokio's blocking pool
pub fn wait_until(condition: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !condition() {
        assert!(std::time::Instant::now() < deadline, "condition did not become true in time");
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}

/// A sink that keeps every transmitted packet, in transmission order
#[derive(Default)]
pub struct RecordingSink {
    pub packets: Mutex<Vec<OutgoingPacket>>,
}

impl RecordingSink {
    pub fn transmitted(&self) -> Vec<OutgoingPacket> {
        self.packets.lock().unwrap().clone()
    }

    pub fn transmitted_count(&self) -> usize {
        self.packets.lock().unwrap().len()
    }
}

impl PacketSink for RecordingSink {
    fn transmit(&self, packet: OutgoingPacket) {
        self.packets.lock().unwrap().push(packet);
    }
}

/// A queue-empty handler that records how many notifications ran concurrently per category
#[derive(Default)]
pub struct InFlightCounter {
    current: [AtomicUsize; CATEGORY_COUNT],
    max: [AtomicUsize; CATEGORY_COUNT],
    calls: AtomicUsize,
}

impl InFlightCounter {
    pub fn max_in_flight(&self, category: ThrottleCategory) -> usize {
        self.max[category.index()].load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl QueueEmptyHandler for InFlightCounter {
    fn on_queue_empty(&self, category: ThrottleCategory) -> anyhow::Result<()> {
        let idx = category.index();
        let current = self.current[idx].fetch_add(1, Ordering::SeqCst) + 1;
        self.max[idx].fetch_max(current, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_micros(200));
        self.current[idx].fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
