//! Per-category rates and burst sizes, and their wire representation.
//!
//! Clients send their desired throttles as 7 little-endian f32 values in bits per second, in
//!  the category order Resend, Land, Wind, Cloud, Task, Texture, Asset. `State` has no value of
//!  its own on the wire: It is carved out of `Task` at a configured percentage, and it is
//!  folded back into `Task` when the throttles are serialized.
//!
//! ```ascii
//!  0: resend  (f32 LE, bits/s)
//!  4: land    (f32 LE, bits/s)
//!  8: wind    (f32 LE, bits/s)
//! 12: cloud   (f32 LE, bits/s)
//! 16: task    (f32 LE, bits/s) - task + state
//! 20: texture (f32 LE, bits/s)
//! 24: asset   (f32 LE, bits/s)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::category::{ThrottleCategory, CATEGORY_COUNT};
use crate::config::ThrottleConfig;
use crate::error::ThrottleError;

pub const THROTTLE_WIRE_LEN: usize = (CATEGORY_COUNT - 1) * std::mem::size_of::<f32>();

/// Upper bound for a single category's rate and burst, so that the sum over all categories
///  (the connection's root bucket) fits into a `u32`
pub const MAX_CATEGORY_RATE: u32 = u32::MAX / CATEGORY_COUNT as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryRate {
    /// bytes per second
    pub rate: u32,
    /// bytes
    pub burst: u32,
}

impl CategoryRate {
    /// Rate and burst are the same, and both are at least the MTU
    fn floored(rate: u32, mtu: u32) -> CategoryRate {
        let rate = rate.max(mtu).min(MAX_CATEGORY_RATE);
        CategoryRate { rate, burst: rate, }
    }

    fn capped(self) -> CategoryRate {
        CategoryRate {
            rate: self.rate.min(MAX_CATEGORY_RATE),
            burst: self.burst.min(MAX_CATEGORY_RATE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRateTable {
    rates: [CategoryRate; CATEGORY_COUNT],
}

impl CategoryRateTable {
    /// Builds a table from per-category rates in bytes per second in wire order, i.e. with
    ///  `State` still included in `Task`
    pub fn from_wire_order_rates(rates: [u32; CATEGORY_COUNT - 1], config: &ThrottleConfig) -> CategoryRateTable {
        let mut by_category = [0u32; CATEGORY_COUNT];
        for (category, rate) in ThrottleCategory::WIRE_ORDER.iter().zip(rates) {
            by_category[category.index()] = rate;
        }

        let task = by_category[ThrottleCategory::Task.index()];
        let state = (task as f64 * config.state_task_percentage as f64) as u32;
        by_category[ThrottleCategory::Task.index()] = task - state;
        by_category[ThrottleCategory::State.index()] = state;

        CategoryRateTable {
            rates: by_category.map(|rate| CategoryRate::floored(rate, config.mtu)),
        }
    }

    /// Builds a table from explicit per-category values, e.g. as they are currently configured
    ///  in a connection's buckets. No carving or flooring is applied, values are only capped at
    ///  [MAX_CATEGORY_RATE].
    pub fn from_category_rates(rates: [CategoryRate; CATEGORY_COUNT]) -> CategoryRateTable {
        CategoryRateTable {
            rates: rates.map(CategoryRate::capped),
        }
    }

    pub fn defaults(config: &ThrottleConfig) -> CategoryRateTable {
        Self::from_wire_order_rates(
            ThrottleCategory::WIRE_ORDER.map(|category| config.default_rate(category)),
            config,
        )
    }

    /// Parses a client's throttle settings. Trailing bytes beyond the fixed layout are ignored.
    ///
    /// NB: Negative and NaN values end up as 0 and are floored to the MTU like any other value
    ///      that is too small. Truncated input is the only failure.
    pub fn decode(mut buf: &[u8], config: &ThrottleConfig) -> Result<CategoryRateTable, ThrottleError> {
        if buf.len() < THROTTLE_WIRE_LEN {
            return Err(ThrottleError::MalformedThrottleData {
                expected: THROTTLE_WIRE_LEN,
                actual: buf.len(),
            });
        }

        let mut rates = [0u32; CATEGORY_COUNT - 1];
        for rate in rates.iter_mut() {
            // float to int conversion saturates, and maps NaN to 0
            *rate = (buf.get_f32_le() as f64 * 0.125) as u32;
        }

        Ok(Self::from_wire_order_rates(rates, config))
    }

    /// Serializes the rates in the same layout that [CategoryRateTable::decode] parses, folding
    ///  `State` back into `Task`
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(THROTTLE_WIRE_LEN);
        for category in ThrottleCategory::WIRE_ORDER {
            let mut bytes_per_second = self.get(category).rate as f64;
            if category == ThrottleCategory::Task {
                bytes_per_second += self.get(ThrottleCategory::State).rate as f64;
            }
            buf.put_f32_le((bytes_per_second * 8.0) as f32);
        }
        buf.freeze()
    }

    pub fn get(&self, category: ThrottleCategory) -> CategoryRate {
        self.rates[category.index()]
    }

    /// NB: This can not overflow because every category is capped at [MAX_CATEGORY_RATE]
    pub fn total_rate(&self) -> u32 {
        self.rates.iter()
            .map(|r| r.rate)
            .sum()
    }

    pub fn total_burst(&self) -> u32 {
        self.rates.iter()
            .map(|r| r.burst)
            .sum()
    }
}
