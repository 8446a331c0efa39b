//! The seams to the transport layer: packets handed in for throttled sending, the sink that
//!  writes them to the socket, and the signal that wakes up the scheduling driver.

#[cfg(test)] use mockall::automock;
use bytes::Bytes;
use tokio::sync::Notify;
use crate::category::ThrottleCategory;

/// A framed datagram that is waiting to be sent. The payload is immutable and cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPacket {
    pub category: ThrottleCategory,
    pub payload: Bytes,
}

impl OutgoingPacket {
    pub fn new(category: ThrottleCategory, payload: impl Into<Bytes>) -> OutgoingPacket {
        OutgoingPacket {
            category,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The number of tokens this packet needs from its bucket
    pub fn token_cost(&self) -> u32 {
        u32::try_from(self.payload.len()).unwrap_or(u32::MAX)
    }
}

/// This is the final step for a packet that passed throttling: writing it to the socket. It must
///  not block, and failures are the sink's business.
#[cfg_attr(test, automock)]
pub trait PacketSink: Send + Sync + 'static {
    fn transmit(&self, packet: OutgoingPacket);
}

/// Wakes up the driver that runs scheduling passes when a connection that may have been idle
///  gets new work
#[cfg_attr(test, automock)]
pub trait WorkSignal: Send + Sync + 'static {
    fn notify_work_pending(&self);
}

impl WorkSignal for Notify {
    fn notify_work_pending(&self) {
        self.notify_one();
    }
}
