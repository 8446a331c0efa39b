use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::debug;
use crate::category::{ThrottleCategory, CATEGORY_COUNT};
use crate::rate_bucket::RateBucket;
use crate::rate_table::{CategoryRate, CategoryRateTable};

fn per_ms(bytes_per_second: u32) -> f64 {
    bytes_per_second as f64 / 1000.0
}

/// The token buckets of a single connection: a root bucket that is a child of a shared parent
///  (e.g. for a region), and a bucket per category that is a child of the root.
pub struct ConnectionThrottle {
    root: Arc<RateBucket>,
    categories: [RateBucket; CATEGORY_COUNT],
    /// Reconfiguration takes the write lock, scheduling takes the read lock, so that no
    ///  scheduling pass sees a partially updated set of rates
    update_lock: RwLock<()>,
}

impl ConnectionThrottle {
    pub fn new(parent: &Arc<RateBucket>, initial: &CategoryRateTable) -> ConnectionThrottle {
        let root = Arc::new(RateBucket::new(Some(parent), per_ms(initial.total_rate()), initial.total_burst()));
        let categories = ThrottleCategory::ALL.map(|category| {
            let rate = initial.get(category);
            RateBucket::new(Some(&root), per_ms(rate.rate), rate.burst)
        });

        ConnectionThrottle {
            root,
            categories,
            update_lock: RwLock::new(()),
        }
    }

    /// Replaces the rates of all buckets as a single update: The root's rate and burst become the
    ///  sums over all categories.
    pub fn apply_rates(&self, table: &CategoryRateTable) {
        let _guard = self.update_lock.write().unwrap();

        self.root.set_rate(per_ms(table.total_rate()), table.total_burst());
        for category in ThrottleCategory::ALL {
            let rate = table.get(category);
            self.categories[category.index()].set_rate(per_ms(rate.rate), rate.burst);
        }

        debug!("applied throttles: {:?} - total {} bytes/s", table, table.total_rate());
    }

    /// Access to the buckets that is consistent with respect to [ConnectionThrottle::apply_rates]
    pub fn read(&self) -> ThrottleGuard<'_> {
        ThrottleGuard {
            throttle: self,
            _guard: self.update_lock.read().unwrap(),
        }
    }

    pub fn root(&self) -> &Arc<RateBucket> {
        &self.root
    }

    /// The currently configured rates, read from the buckets
    pub fn current_table(&self) -> CategoryRateTable {
        let guard = self.read();
        CategoryRateTable::from_category_rates(ThrottleCategory::ALL.map(|category| {
            let bucket = guard.bucket(category);
            CategoryRate {
                rate: bucket.drip_rate_per_second().round() as u32,
                burst: bucket.max_burst(),
            }
        }))
    }

    pub fn snapshot_rates(&self) -> ThrottleSnapshot {
        let guard = self.read();
        ThrottleSnapshot {
            bytes_per_second: ThrottleCategory::ALL.map(|category| guard.bucket(category).drip_rate_per_second()),
        }
    }
}

pub struct ThrottleGuard<'a> {
    throttle: &'a ConnectionThrottle,
    _guard: RwLockReadGuard<'a, ()>,
}

impl ThrottleGuard<'_> {
    pub fn bucket(&self, category: ThrottleCategory) -> &RateBucket {
        &self.throttle.categories[category.index()]
    }
}

/// Diagnostic view of a connection's drip rates
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleSnapshot {
    bytes_per_second: [f64; CATEGORY_COUNT],
}

impl ThrottleSnapshot {
    pub fn rate(&self, category: ThrottleCategory) -> f64 {
        self.bytes_per_second[category.index()]
    }

    /// `Task` as it is presented externally, i.e. including `State`
    pub fn combined_task(&self) -> f64 {
        self.rate(ThrottleCategory::Task) + self.rate(ThrottleCategory::State)
    }

    pub fn total(&self) -> f64 {
        self.bytes_per_second.iter().sum()
    }
}
