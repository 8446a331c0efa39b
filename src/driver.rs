use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use rustc_hash::FxHashMap;
use tokio::select;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, info};
use crate::config::ThrottleConfig;
use crate::connection::Connection;
use crate::transport::WorkSignal;

/// Runs the scheduling passes of all registered connections from a single loop, so a
///  connection's scheduler is never entered concurrently.
pub struct TickDriver {
    config: Arc<ThrottleConfig>,
    connections: RwLock<FxHashMap<u32, Arc<Connection>>>,
    work_pending: Arc<Notify>,
    is_shut_down: AtomicBool,
}

impl TickDriver {
    pub fn new(config: Arc<ThrottleConfig>) -> anyhow::Result<TickDriver> {
        config.validate()?;

        Ok(TickDriver {
            config,
            connections: Default::default(),
            work_pending: Arc::new(Notify::new()),
            is_shut_down: AtomicBool::new(false),
        })
    }

    /// The signal to pass to connections that are registered with this driver
    pub fn work_signal(&self) -> Arc<dyn WorkSignal> {
        self.work_pending.clone()
    }

    /// A connection registered for a circuit code that is already in use replaces the previous
    ///  connection, which is shut down
    pub fn register(&self, connection: Arc<Connection>) {
        let circuit_code = connection.circuit_code();
        info!("registering connection for circuit {} ({:?})", circuit_code, connection.identity().agent_id);

        let prev = self.connections.write().unwrap()
            .insert(circuit_code, connection);
        if let Some(prev) = prev {
            info!("circuit {} was already registered - shutting down the previous connection", circuit_code);
            prev.shutdown();
        }
        self.work_pending.notify_work_pending();
    }

    /// Removes a connection and shuts it down
    pub fn unregister(&self, circuit_code: u32) -> Option<Arc<Connection>> {
        let removed = self.connections.write().unwrap()
            .remove(&circuit_code);
        if let Some(connection) = &removed {
            info!("unregistering connection for circuit {}", circuit_code);
            connection.shutdown();
        }
        removed
    }

    pub fn get(&self, circuit_code: u32) -> Option<Arc<Connection>> {
        self.connections.read().unwrap()
            .get(&circuit_code)
            .cloned()
    }

    pub fn num_connections(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    /// Runs a scheduling pass for every connected connection that is not paused, returning the
    ///  minimum wait across them. A connection whose pass panics is shut down and unregistered,
    ///  the other connections are not affected.
    pub fn tick_all(&self) -> Option<u64> {
        let connections = self.connections.read().unwrap()
            .values()
            .cloned()
            .collect::<Vec<_>>();

        connections.iter()
            .filter(|c| c.is_connected() && !c.is_paused())
            .filter_map(|c| match catch_unwind(AssertUnwindSafe(|| c.dequeue_tick())) {
                Ok(outcome) => outcome.min_wait_ms,
                Err(_) => {
                    self.drop_failed(c);
                    None
                }
            })
            .min()
    }

    fn drop_failed(&self, connection: &Arc<Connection>) {
        let circuit_code = connection.circuit_code();
        error!("circuit {}: scheduling pass panicked - shutting down the connection", circuit_code);
        connection.shutdown();

        let mut connections = self.connections.write().unwrap();
        // NB: the circuit code may have been re-registered for a new connection in the meantime
        if connections.get(&circuit_code).is_some_and(|c| Arc::ptr_eq(c, connection)) {
            connections.remove(&circuit_code);
        }
    }

    /// Runs scheduling passes until [TickDriver::shut_down] is called. Between passes, this
    ///  sleeps for the advised wait, or for the configured idle interval if nothing is waiting
    ///  for tokens, unless work is signalled earlier.
    pub async fn run(&self) {
        info!("starting tick driver");

        while !self.is_shut_down.load(Ordering::Acquire) {
            let delay = match self.tick_all() {
                Some(0) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Some(wait_ms) => Duration::from_millis(wait_ms),
                None => self.config.driver_idle_interval,
            };

            select! {
                _ = sleep(delay) => {}
                _ = self.work_pending.notified() => {
                    debug!("woken up by pending work");
                }
            }
        }

        info!("tick driver shut down");
    }

    /// Stops the loop in [TickDriver::run] and shuts down all registered connections
    pub fn shut_down(&self) {
        self.is_shut_down.store(true, Ordering::Release);
        self.work_pending.notify_one();

        let connections = std::mem::take(&mut *self.connections.write().unwrap());
        for connection in connections.values() {
            connection.shutdown();
        }
    }
}
