//! Per-circuit send scheduling for a UDP based virtual world protocol: throttling of outgoing
//!  traffic per category, outgoing queues that are drained by a non-blocking scheduling pass,
//!  and round trip time estimation for retransmission timeouts.
//!
//! ## Design
//!
//! * Outgoing traffic is split into categories (resends, terrain, wind, clouds, object updates,
//!   textures, assets, avatar / prim state), each with its own bandwidth allocation and its own
//!   FIFO queue
//!   * a client requests its allocation in bits per second for seven categories; the `State`
//!     category is carved out of `Task` and never appears on the wire
//!   * every category's rate and burst is at least the MTU so that no packet can get stuck
//! * Throttling uses a hierarchy of token buckets:
//!
//! ```ascii
//!   region bucket (shared by all connections, owned elsewhere)
//!     +- connection root bucket (sum of the category rates)
//!          +- category bucket (x8)
//! ```
//!
//!   * a withdrawal succeeds only if it succeeds on every level, and is then applied on every
//!     level
//!   * buckets are replenished lazily when they are asked for tokens, there are no timers
//! * Scheduling never blocks: a scheduling pass sends what it can and reports how long to wait
//!   before the next pass can make progress
//!   * a packet that was dequeued but could not be sent is 'held' and retried before anything
//!     else in its category, preserving order within a category
//!   * a single driver runs the scheduling passes of all connections, see [driver::TickDriver]
//!   * producers enqueue concurrently to the driver. A packet is sent right away if its category
//!     has nothing queued and tokens are available
//! * When a category's queue runs empty, the producer is notified so it can refill the queue
//!   before the next pass. There is at most one notification in flight per category.
//! * Retransmission timeouts follow RFC 2988 with a lower bound of two seconds

pub mod category;
pub mod config;
pub mod connection;
pub mod connection_throttle;
pub mod driver;
pub mod error;
pub mod queue_empty;
pub mod rate_bucket;
pub mod rate_table;
pub mod rtt;
pub mod scheduler;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod test_util;
