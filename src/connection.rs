use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;
use crate::category::ThrottleCategory;
use crate::config::ThrottleConfig;
use crate::connection_throttle::{ConnectionThrottle, ThrottleSnapshot};
use crate::error::ThrottleError;
use crate::queue_empty::{QueueEmptyHandler, QueueEmptyNotifier};
use crate::rate_bucket::RateBucket;
use crate::rate_table::CategoryRateTable;
use crate::rtt::RttEstimator;
use crate::scheduler::{OutgoingScheduler, TickOutcome};
use crate::stats::{ConnectionStats, StatsReport};
use crate::transport::{OutgoingPacket, PacketSink, WorkSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CircuitIdentity {
    pub circuit_code: u32,
    pub agent_id: Uuid,
    pub remote_addr: SocketAddr,
}

/// The send side of a single circuit: throttling, outgoing queues, RTT estimation and
///  counters. The reliability / session layer owns a connection and feeds it; the tick driver
///  runs its scheduling passes.
pub struct Connection {
    config: Arc<ThrottleConfig>,
    identity: CircuitIdentity,

    throttle: ConnectionThrottle,
    scheduler: OutgoingScheduler,
    rtt: Mutex<RttEstimator>,
    stats: ConnectionStats,

    connected: AtomicBool,
    paused: AtomicBool,
    last_received: Mutex<Instant>,

    sink: Arc<dyn PacketSink>,
    work_signal: Arc<dyn WorkSignal>,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection{{{}@{}}}", self.identity.circuit_code, self.identity.remote_addr)
    }
}

impl Connection {
    /// Creates a connection with the configured default rates. Its root bucket is chained to
    ///  `region_bucket` which bounds the aggregate throughput of all connections sharing it.
    pub fn new(
        config: Arc<ThrottleConfig>,
        identity: CircuitIdentity,
        region_bucket: &Arc<RateBucket>,
        sink: Arc<dyn PacketSink>,
        work_signal: Arc<dyn WorkSignal>,
        runtime: Handle,
    ) -> Connection {
        let throttle = ConnectionThrottle::new(region_bucket, &CategoryRateTable::defaults(&config));
        let scheduler = OutgoingScheduler::new(Arc::new(QueueEmptyNotifier::new(runtime)));
        let rtt = Mutex::new(RttEstimator::new(&config));

        Connection {
            config,
            identity,
            throttle,
            scheduler,
            rtt,
            stats: Default::default(),
            connected: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            last_received: Mutex::new(Instant::now()),
            sink,
            work_signal,
        }
    }

    pub fn identity(&self) -> &CircuitIdentity {
        &self.identity
    }

    pub fn circuit_code(&self) -> u32 {
        self.identity.circuit_code
    }

    /// Applies a client's throttle settings. On failure, the previous rates remain in effect.
    pub fn set_throttles(&self, wire_bytes: &[u8]) -> Result<(), ThrottleError> {
        let table = CategoryRateTable::decode(wire_bytes, &self.config)?;
        debug!("circuit {}: client requested throttles", self.identity.circuit_code);
        self.throttle.apply_rates(&table);
        Ok(())
    }

    /// The current rates in the client throttle wire format
    pub fn throttles_packed(&self) -> Bytes {
        self.throttle.current_table().encode()
    }

    pub fn throttle_snapshot(&self) -> ThrottleSnapshot {
        self.throttle.snapshot_rates()
    }

    /// Returns `Ok(false)` if the packet was handed to the transport right away, and `Ok(true)`
    ///  if it was queued for a later scheduling pass.
    pub fn enqueue(&self, packet: OutgoingPacket) -> Result<bool, ThrottleError> {
        if !self.is_connected() {
            trace!("circuit {}: dropping packet for closed connection", self.identity.circuit_code);
            return Err(ThrottleError::ConnectionClosed);
        }

        let queued = self.scheduler.enqueue(packet, &self.throttle.read(), self.sink.as_ref(), self.work_signal.as_ref());
        if !queued {
            self.stats.on_packet_sent();
        }
        else if !self.is_connected() {
            // shutdown ran concurrently and may have cleared the queues before the push
            self.scheduler.clear();
            return Err(ThrottleError::ConnectionClosed);
        }
        Ok(queued)
    }

    /// Enqueues a packet for a category index as it is used by packet producers. A packet with
    ///  an invalid category is dropped.
    pub fn enqueue_raw(&self, raw_category: i32, payload: Bytes) -> Result<bool, ThrottleError> {
        let category = ThrottleCategory::from_raw(raw_category)
            .map_err(|e| {
                warn!("circuit {}: dropping packet of {} bytes: {}", self.identity.circuit_code, payload.len(), e);
                e
            })?;
        self.enqueue(OutgoingPacket::new(category, payload))
    }

    /// A single non-blocking scheduling pass over all categories. A closed connection does
    ///  nothing.
    pub fn dequeue_tick(&self) -> TickOutcome {
        if !self.is_connected() {
            return TickOutcome::default();
        }

        let outcome = self.scheduler.dequeue_tick(&self.throttle.read(), self.sink.as_ref());
        for _ in 0..outcome.packets_sent {
            self.stats.on_packet_sent();
        }
        outcome
    }

    pub fn has_pending(&self) -> bool {
        self.scheduler.has_pending()
    }

    pub fn set_queue_empty_handler(&self, handler: Arc<dyn QueueEmptyHandler>) {
        self.scheduler.queue_empty_notifier().set_handler(Some(handler));
    }

    /// Called by the reliability layer when an ACK is matched to a reliable packet's send time
    pub fn update_round_trip(&self, sample_ms: f64) {
        self.rtt.lock().unwrap().update_round_trip(sample_ms);
    }

    pub fn retransmit_timeout(&self) -> Duration {
        self.rtt.lock().unwrap().retransmit_timeout()
    }

    pub fn smoothed_rtt_ms(&self) -> Option<f64> {
        self.rtt.lock().unwrap().smoothed_rtt_ms()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Packets sent and received since the previous call, and the current unacked bytes
    pub fn report_stats(&self) -> StatsReport {
        self.stats.report()
    }

    pub fn record_packet_received(&self) {
        self.stats.on_packet_received();
        *self.last_received.lock().unwrap() = Instant::now();
    }

    /// Time since the last packet was received from the client, or since the connection was
    ///  created
    pub fn idle_for(&self) -> Duration {
        self.last_received.lock().unwrap().elapsed()
    }

    /// A paused connection keeps its queues, but the tick driver skips it
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            self.work_signal.notify_work_pending();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Discards all pending packets and detaches the queue-empty handler. Notifications that
    ///  are in flight complete without calling a handler. Calling this more than once is a
    ///  no-op.
    pub fn shutdown(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        self.scheduler.queue_empty_notifier().set_handler(None);
        let discarded = self.scheduler.clear();
        debug!("circuit {}: shut down, discarded {} pending packets", self.identity.circuit_code, discarded);
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};
    use tokio::sync::Notify;
    use tokio::time;
    use super::*;
    use crate::queue_empty::MockQueueEmptyHandler;
    use crate::rate_table::THROTTLE_WIRE_LEN;
    use crate::test_util::{assert_close, paused_runtime, RecordingSink};
    use crate::transport::MockWorkSignal;

    fn identity() -> CircuitIdentity {
        CircuitIdentity {
            circuit_code: 17,
            agent_id: Uuid::new_v4(),
            remote_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
        }
    }

    fn connection(sink: Arc<RecordingSink>) -> (Connection, Arc<RateBucket>) {
        let region = Arc::new(RateBucket::unlimited());
        let connection = Connection::new(
            Arc::new(ThrottleConfig::default()),
            identity(),
            &region,
            sink,
            Arc::new(Notify::new()),
            Handle::current(),
        );
        (connection, region)
    }

    fn wire(bits_per_second: [f32; 7]) -> Bytes {
        let mut buf = BytesMut::new();
        for v in bits_per_second {
            buf.put_f32_le(v);
        }
        buf.freeze()
    }

    #[test]
    fn test_defaults_before_client_throttles() {
        paused_runtime().block_on(async {
            let (connection, _region) = connection(Default::default());

            let config = ThrottleConfig::default();
            assert_eq!(connection.throttles_packed(), CategoryRateTable::defaults(&config).encode());
            assert_close(connection.throttle_snapshot().rate(ThrottleCategory::Resend), 12500.0);
            assert_eq!(connection.retransmit_timeout(), Duration::from_millis(3000));
            assert_eq!(connection.smoothed_rtt_ms(), None);
        });
    }

    #[test]
    fn test_set_throttles() {
        paused_runtime().block_on(async {
            let (connection, _region) = connection(Default::default());

            let requested = wire([100_000.0; 7]);
            connection.set_throttles(&requested).unwrap();

            let snapshot = connection.throttle_snapshot();
            assert_close(snapshot.rate(ThrottleCategory::Texture), 12500.0);
            assert_close(snapshot.rate(ThrottleCategory::State), 10000.0);
            assert_close(snapshot.rate(ThrottleCategory::Task), 2500.0);
            assert_close(snapshot.combined_task(), 12500.0);
            assert_eq!(connection.throttles_packed(), requested);
        });
    }

    #[test]
    fn test_malformed_throttles_keep_rates() {
        paused_runtime().block_on(async {
            let (connection, _region) = connection(Default::default());
            connection.set_throttles(&wire([100_000.0; 7])).unwrap();
            let before = connection.throttles_packed();

            let truncated = wire([200_000.0; 7]).slice(..10);
            assert_eq!(connection.set_throttles(&truncated), Err(ThrottleError::MalformedThrottleData { expected: THROTTLE_WIRE_LEN, actual: 10 }));
            assert_eq!(connection.throttles_packed(), before);
        });
    }

    #[test]
    fn test_negative_throttle_is_floored_to_mtu() {
        paused_runtime().block_on(async {
            let (connection, _region) = connection(Default::default());

            let mut requested = [100_000.0; 7];
            requested[2] = -8000.0;
            connection.set_throttles(&wire(requested)).unwrap();

            assert_close(connection.throttle_snapshot().rate(ThrottleCategory::Wind), 1400.0);
            assert_close(connection.throttle_snapshot().rate(ThrottleCategory::Land), 12500.0);
        });
    }

    #[test]
    fn test_send_paths_are_counted() {
        paused_runtime().block_on(async {
            let sink = Arc::new(RecordingSink::default());
            let (connection, _region) = connection(sink.clone());
            time::advance(Duration::from_secs(1)).await;

            // Land defaults to 1500 bytes/s, and its bucket is full now
            assert_eq!(connection.enqueue(OutgoingPacket::new(ThrottleCategory::Land, vec![0u8; 1000])), Ok(false));
            assert_eq!(connection.enqueue(OutgoingPacket::new(ThrottleCategory::Land, vec![1u8; 1000])), Ok(true));
            assert_eq!(sink.transmitted_count(), 1);

            time::advance(Duration::from_secs(1)).await;
            let tick = connection.dequeue_tick();
            assert_eq!(tick.packets_sent, 1);
            assert_eq!(sink.transmitted_count(), 2);

            connection.record_packet_received();
            connection.stats().add_unacked_bytes(1000);
            assert_eq!(connection.report_stats(), StatsReport { packets_sent: 2, packets_received: 1, unacked_bytes: 1000 });
        });
    }

    #[test]
    fn test_enqueue_raw_invalid_category() {
        paused_runtime().block_on(async {
            let sink = Arc::new(RecordingSink::default());
            let (connection, _region) = connection(sink.clone());

            assert_eq!(connection.enqueue_raw(-1, Bytes::from_static(b"abc")), Err(ThrottleError::InvalidCategory(-1)));
            assert_eq!(connection.enqueue_raw(8, Bytes::from_static(b"abc")), Err(ThrottleError::InvalidCategory(8)));
            assert!(!connection.has_pending());

            assert_eq!(connection.enqueue_raw(5, Bytes::from_static(b"abc")), Ok(true));
            assert_eq!(connection.scheduler.pending_count(ThrottleCategory::Texture), 1);
        });
    }

    #[test]
    fn test_shutdown() {
        paused_runtime().block_on(async {
            let sink = Arc::new(RecordingSink::default());
            let (connection, _region) = connection(sink.clone());

            let mut handler = MockQueueEmptyHandler::new();
            handler.expect_on_queue_empty().never();
            connection.set_queue_empty_handler(Arc::new(handler));

            connection.enqueue(OutgoingPacket::new(ThrottleCategory::Asset, vec![0u8; 500])).unwrap();
            assert!(connection.has_pending());

            connection.shutdown();
            assert!(!connection.is_connected());
            assert!(!connection.has_pending());
            assert_eq!(connection.enqueue(OutgoingPacket::new(ThrottleCategory::Asset, vec![0u8; 10])), Err(ThrottleError::ConnectionClosed));

            time::advance(Duration::from_secs(10)).await;
            assert_eq!(connection.dequeue_tick(), TickOutcome::default());
            assert_eq!(sink.transmitted_count(), 0);

            connection.shutdown();
        });
    }

    #[test]
    fn test_shutdown_during_enqueue_leaves_nothing_pending() {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let _guard = rt.enter();

        for _ in 0..50 {
            let (connection, _region) = connection(Default::default());
            let connection = Arc::new(connection);

            let producer = {
                let connection = connection.clone();
                std::thread::spawn(move || {
                    while connection.enqueue(OutgoingPacket::new(ThrottleCategory::Asset, vec![0u8; 100])).is_ok() {}
                })
            };
            std::thread::sleep(Duration::from_millis(1));
            connection.shutdown();
            producer.join().unwrap();

            assert!(!connection.has_pending());
        }
    }

    #[test]
    fn test_round_trip() {
        paused_runtime().block_on(async {
            let (connection, _region) = connection(Default::default());
            connection.update_round_trip(1000.0);
            assert_eq!(connection.smoothed_rtt_ms(), Some(1000.0));
            assert_eq!(connection.retransmit_timeout(), Duration::from_millis(3000));
        });
    }

    #[test]
    fn test_idle_for() {
        paused_runtime().block_on(async {
            let (connection, _region) = connection(Default::default());
            time::advance(Duration::from_secs(5)).await;
            assert_eq!(connection.idle_for(), Duration::from_secs(5));

            connection.record_packet_received();
            assert_eq!(connection.idle_for(), Duration::ZERO);
        });
    }

    #[test]
    fn test_resume_signals_work() {
        paused_runtime().block_on(async {
            let mut signal = MockWorkSignal::new();
            signal.expect_notify_work_pending().once().return_const(());

            let region = Arc::new(RateBucket::unlimited());
            let connection = Connection::new(
                Arc::new(ThrottleConfig::default()),
                identity(),
                &region,
                Arc::new(RecordingSink::default()),
                Arc::new(signal),
                Handle::current(),
            );

            connection.resume();
            connection.pause();
            assert!(connection.is_paused());
            connection.resume();
            assert!(!connection.is_paused());
        });
    }
}
