//! A token bucket that can be chained to a parent bucket, forming a hierarchical token bucket
//!  (HTB): A child can only withdraw tokens if all its ancestors can withdraw the same amount,
//!  so the sum of all children's throughput is bounded by each ancestor's rate.
//!
//! Replenishment is evaluated lazily whenever a bucket is asked for tokens, so there is no
//!  timer per bucket.

use std::sync::{Arc, Mutex, Weak};
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct BucketState {
    /// bytes added to the bucket per millisecond
    drip_rate_per_ms: f64,
    /// capacity in bytes, 0 meaning 'no limit'
    max_burst: u32,
    /// NB: This can become negative, see [BucketState::can_withdraw]
    content: f64,
    last_drip: Instant,
}

impl BucketState {
    fn drip(&mut self, now: Instant) {
        if self.drip_rate_per_ms <= 0.0 {
            // no rate limit
            self.content = self.max_burst as f64;
            self.last_drip = now;
            return;
        }

        let elapsed_ms = now.saturating_duration_since(self.last_drip).as_secs_f64() * 1000.0;
        if elapsed_ms > 0.0 {
            self.content = (self.content + self.drip_rate_per_ms * elapsed_ms)
                .min(self.max_burst as f64);
            self.last_drip = now;
        }
    }

    fn is_unlimited(&self) -> bool {
        self.max_burst == 0
    }

    /// A full bucket allows withdrawing more than its capacity, leaving it in debt. Otherwise a
    ///  packet bigger than the burst size would be stuck forever.
    fn can_withdraw(&self, byte_count: u32) -> bool {
        if self.is_unlimited() {
            return true;
        }

        let byte_count = byte_count as f64;
        let max_burst = self.max_burst as f64;
        self.content >= byte_count || (byte_count > max_burst && self.content >= max_burst)
    }

    fn withdraw(&mut self, byte_count: u32) {
        if !self.is_unlimited() {
            self.content -= byte_count as f64;
        }
    }
}

#[derive(Debug)]
pub struct RateBucket {
    /// The parent is owned by a broader scope (e.g. a region), so a bucket does not keep it
    ///  alive. Once the parent is gone, the bucket is no longer bounded by it.
    parent: Option<Weak<RateBucket>>,
    state: Mutex<BucketState>,
}

impl RateBucket {
    /// Creates an empty bucket
    pub fn new(parent: Option<&Arc<RateBucket>>, drip_rate_per_ms: f64, max_burst: u32) -> RateBucket {
        RateBucket {
            parent: parent.map(Arc::downgrade),
            state: Mutex::new(BucketState {
                drip_rate_per_ms,
                max_burst,
                content: 0.0,
                last_drip: Instant::now(),
            }),
        }
    }

    /// A bucket without parent and without a limit, e.g. as the root for connections that are
    ///  not bounded by a shared scope
    pub fn unlimited() -> RateBucket {
        RateBucket::new(None, 0.0, 0)
    }

    fn parent(&self) -> Option<Arc<RateBucket>> {
        self.parent.as_ref()
            .and_then(|p| p.upgrade())
    }

    /// Withdraws `byte_count` tokens from this bucket and all its ancestors if all of them have
    ///  sufficient content. Otherwise nothing is withdrawn anywhere in the chain.
    ///
    /// NB: Locks are acquired from child to parent, and the parent graph is acyclic by
    ///      construction, so concurrent withdrawals from siblings can not deadlock.
    pub fn try_consume(&self, byte_count: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        state.drip(Instant::now());

        if !state.can_withdraw(byte_count) {
            trace!("insufficient tokens: {} requested, {} available", byte_count, state.content);
            return false;
        }

        if let Some(parent) = self.parent() {
            if !parent.try_consume(byte_count) {
                trace!("insufficient tokens in parent bucket for {} bytes", byte_count);
                return false;
            }
        }

        state.withdraw(byte_count);
        true
    }

    /// Replaces drip rate and burst size, clamping the current content to the new burst size
    pub fn set_rate(&self, drip_rate_per_ms: f64, max_burst: u32) {
        let mut state = self.state.lock().unwrap();
        state.drip(Instant::now());

        state.drip_rate_per_ms = drip_rate_per_ms;
        state.max_burst = max_burst;
        if state.content > max_burst as f64 {
            state.content = max_burst as f64;
        }
    }

    pub fn drip_rate_per_ms(&self) -> f64 {
        self.state.lock().unwrap().drip_rate_per_ms
    }

    pub fn drip_rate_per_second(&self) -> f64 {
        self.drip_rate_per_ms() * 1000.0
    }

    pub fn max_burst(&self) -> u32 {
        self.state.lock().unwrap().max_burst
    }

    /// The content as of the last replenishment, i.e. without accounting for time that passed
    ///  since
    pub fn content(&self) -> f64 {
        self.state.lock().unwrap().content
    }

    /// The number of milliseconds until this bucket has accumulated enough tokens to send
    ///  `byte_count` bytes, based on its content at the last replenishment. This is advisory:
    ///  ancestors may still be short of tokens at that point.
    pub fn millis_until_available(&self, byte_count: u32) -> u64 {
        let state = self.state.lock().unwrap();
        if state.is_unlimited() || state.drip_rate_per_ms <= 0.0 {
            return 1;
        }

        let needed = byte_count.min(state.max_burst) as f64;
        let deficit = (needed - state.content).max(0.0);
        (deficit / state.drip_rate_per_ms).ceil() as u64 + 1
    }
}
