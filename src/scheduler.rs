//! Per-category outgoing queues of a connection and the non-blocking scheduling pass that moves
//!  packets from the queues to the transport as tokens become available.
//!
//! Each category has a FIFO queue and a 'held' slot for a packet that was dequeued but could not
//!  be sent for lack of tokens. The held packet is retried before anything else is dequeued,
//!  which preserves order within a category across throttling stalls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use crossbeam::queue::SegQueue;
use tracing::trace;
use crate::category::{ThrottleCategory, CATEGORY_COUNT};
use crate::connection_throttle::ThrottleGuard;
use crate::queue_empty::QueueEmptyNotifier;
use crate::transport::{OutgoingPacket, PacketSink, WorkSignal};

/// The result of a single scheduling pass over all categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub packets_sent: usize,
    /// The minimum number of milliseconds before any category can make progress, `Some(0)` if
    ///  a packet was sent. `None` if nothing is waiting for tokens.
    pub min_wait_ms: Option<u64>,
}

impl TickOutcome {
    fn record_wait(&mut self, wait_ms: u64) {
        self.min_wait_ms = Some(match self.min_wait_ms {
            Some(prev) => prev.min(wait_ms),
            None => wait_ms,
        });
    }

    fn record_sent(&mut self) {
        self.packets_sent += 1;
        self.record_wait(0);
    }
}

pub struct OutgoingScheduler {
    /// NB: producers push concurrently with the driver popping, so these are lock-free
    queues: [SegQueue<OutgoingPacket>; CATEGORY_COUNT],
    /// The driver holds a category's lock for the duration of its scheduling step. Enqueue
    ///  takes it only to decide whether a packet may bypass the queue.
    held: [Mutex<Option<OutgoingPacket>>; CATEGORY_COUNT],
    queue_empty: Arc<QueueEmptyNotifier>,
}

impl OutgoingScheduler {
    pub fn new(queue_empty: Arc<QueueEmptyNotifier>) -> OutgoingScheduler {
        OutgoingScheduler {
            queues: Default::default(),
            held: Default::default(),
            queue_empty,
        }
    }

    pub fn queue_empty_notifier(&self) -> &Arc<QueueEmptyNotifier> {
        &self.queue_empty
    }

    /// Returns `false` if the packet was sent right away, bypassing the queue. That happens
    ///  only if nothing of the same category is queued or held, so a packet never overtakes
    ///  an earlier one. Otherwise the packet is queued, the driver is woken up, and `true` is
    ///  returned.
    pub fn enqueue(&self, packet: OutgoingPacket, throttle: &ThrottleGuard, sink: &dyn PacketSink, work_signal: &dyn WorkSignal) -> bool {
        let category = packet.category;
        let idx = category.index();

        {
            let held = self.held_slot(idx);
            if held.is_none() && self.queues[idx].is_empty() && throttle.bucket(category).try_consume(packet.token_cost()) {
                drop(held);
                trace!("sending {} bytes of {:?} without queueing", packet.len(), category);
                sink.transmit(packet);
                return false;
            }
            self.queues[idx].push(packet);
        }

        work_signal.notify_work_pending();
        true
    }

    /// A single scheduling pass: at most one packet per category is sent. This never blocks
    ///  on token availability, it reports how long to wait instead.
    pub fn dequeue_tick(&self, throttle: &ThrottleGuard, sink: &dyn PacketSink) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        for category in ThrottleCategory::ALL {
            self.tick_category(category, throttle, sink, &mut outcome);
        }
        outcome
    }

    fn tick_category(&self, category: ThrottleCategory, throttle: &ThrottleGuard, sink: &dyn PacketSink, outcome: &mut TickOutcome) {
        let idx = category.index();
        let bucket = throttle.bucket(category);
        let mut held = self.held_slot(idx);

        let packet = match held.take() {
            Some(packet) => packet,
            None => match self.queues[idx].pop() {
                Some(packet) => {
                    if self.queues[idx].is_empty() {
                        self.queue_empty.begin_fire(category);
                    }
                    packet
                }
                None => {
                    self.queue_empty.begin_fire(category);
                    return;
                }
            },
        };

        if bucket.try_consume(packet.token_cost()) {
            sink.transmit(packet);
            outcome.record_sent();
        }
        else {
            let wait_ms = bucket.millis_until_available(packet.token_cost());
            trace!("holding {} bytes of {:?} for {}ms", packet.len(), category, wait_ms);
            outcome.record_wait(wait_ms);
            *held = Some(packet);
        }
    }

    /// NB: a sink that panics while a category's slot is locked poisons it. The slot's content
    ///  is still consistent at that point (the packet was already taken), so poisoning is ignored.
    fn held_slot(&self, idx: usize) -> MutexGuard<'_, Option<OutgoingPacket>> {
        self.held[idx].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether any category has queued or held packets
    pub fn has_pending(&self) -> bool {
        ThrottleCategory::ALL.iter().any(|c| self.pending_count(*c) > 0)
    }

    pub fn pending_count(&self, category: ThrottleCategory) -> usize {
        let idx = category.index();
        let held = usize::from(self.held_slot(idx).is_some());
        held + self.queues[idx].len()
    }

    /// Discards all queued and held packets, returning the number of discarded packets
    pub fn clear(&self) -> usize {
        let mut discarded = 0;
        for idx in 0..CATEGORY_COUNT {
            let mut held = self.held_slot(idx);
            if held.take().is_some() {
                discarded += 1;
            }
            while self.queues[idx].pop().is_some() {
                discarded += 1;
            }
        }
        discarded
    }
}
