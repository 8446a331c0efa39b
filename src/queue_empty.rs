//! Notifications that a category's outgoing queue ran empty, giving the producer a chance to
//!  refill it before the next scheduling pass.
//!
//! Notifications are dispatched fire-and-forget to tokio's blocking pool. There is at most one
//!  notification in flight per category: a flag is set when a notification is dispatched and
//!  cleared when the handler returns (or fails, or panics), and no further notification is
//!  dispatched for that category while the flag is set.

#[cfg(test)] use mockall::automock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::runtime::Handle;
use tracing::{error, trace};
use crate::category::{ThrottleCategory, CATEGORY_COUNT};

#[cfg_attr(test, automock)]
pub trait QueueEmptyHandler: Send + Sync + 'static {
    fn on_queue_empty(&self, category: ThrottleCategory) -> anyhow::Result<()>;
}

pub struct QueueEmptyNotifier {
    running: [AtomicBool; CATEGORY_COUNT],
    handler: RwLock<Option<Arc<dyn QueueEmptyHandler>>>,
    runtime: Handle,
}

impl QueueEmptyNotifier {
    pub fn new(runtime: Handle) -> QueueEmptyNotifier {
        QueueEmptyNotifier {
            running: Default::default(),
            handler: RwLock::new(None),
            runtime,
        }
    }

    /// Replaces the handler. Notifications that are already in flight and have not yet called
    ///  the previous handler will call the new one, or none if it is `None`.
    pub fn set_handler(&self, handler: Option<Arc<dyn QueueEmptyHandler>>) {
        *self.handler.write().unwrap() = handler;
    }

    pub fn is_running(&self, category: ThrottleCategory) -> bool {
        self.running[category.index()].load(Ordering::Acquire)
    }

    /// Dispatches a notification for `category` unless one is already in flight. This returns
    ///  immediately, the handler runs on a separate thread.
    pub fn begin_fire(self: &Arc<Self>, category: ThrottleCategory) {
        if !category.emits_queue_empty() {
            return;
        }

        if self.running[category.index()].compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            trace!("queue empty notification for {:?} is still running", category);
            return;
        }

        // the guard is moved into the task, so the flag is cleared even if the task never runs
        let guard = RunningGuard {
            notifier: self.clone(),
            category,
        };
        let _ = self.runtime.spawn_blocking(move || guard.fire());
    }
}

struct RunningGuard {
    notifier: Arc<QueueEmptyNotifier>,
    category: ThrottleCategory,
}

impl RunningGuard {
    fn fire(self) {
        let handler = self.notifier.handler.read().unwrap().clone();
        let Some(handler) = handler else {
            trace!("no queue empty handler for {:?}", self.category);
            return;
        };

        match catch_unwind(AssertUnwindSafe(|| handler.on_queue_empty(self.category))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("queue empty handler for {:?} failed: {}", self.category, e),
            Err(_) => error!("queue empty handler for {:?} panicked", self.category),
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.notifier.running[self.category.index()].store(false, Ordering::Release);
    }
}
