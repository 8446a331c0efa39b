use std::time::Duration;
use anyhow::bail;
use crate::category::{ThrottleCategory, CATEGORY_COUNT};

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// The maximum size of a single packet in bytes. Every category's rate and burst is floored
    ///  to this value: A bucket whose burst is smaller than the largest packet could never fill
    ///  up far enough to send that packet, clogging the category for good.
    pub mtu: u32,

    /// Share of the `Task` allocation that is carved out for the `State` category (avatar and
    ///  prim state updates). Must be between 0.0 and 1.0.
    pub state_task_percentage: f32,

    /// Bytes per second per category, used until the client sends its own throttle settings.
    ///  The `State` entry is ignored: `State` is always carved out of `Task`, the same way as
    ///  for throttle settings received from a client.
    pub default_rates: [u32; CATEGORY_COUNT],

    /// Lower bound for the retransmission timeout
    pub min_rto: Duration,
    /// Retransmission timeout before the first round trip was measured
    pub initial_rto: Duration,
    /// Granularity of the platform's timer in milliseconds. This is a lower bound for the
    ///  variance part of the retransmission timeout.
    pub clock_resolution_ms: f64,

    /// The tick driver re-polls its connections at this interval when none of them has
    ///  anything to send and nobody signalled pending work
    pub driver_idle_interval: Duration,
}

impl ThrottleConfig {
    pub const DEFAULT_MTU: u32 = 1400;

    pub fn new() -> ThrottleConfig {
        let mut default_rates = [1500; CATEGORY_COUNT];
        default_rates[ThrottleCategory::Resend.index()] = 12500;

        ThrottleConfig {
            mtu: Self::DEFAULT_MTU,
            state_task_percentage: 0.8,
            default_rates,
            min_rto: Duration::from_millis(2000),
            initial_rto: Duration::from_millis(3000),
            clock_resolution_ms: 1.0,
            driver_idle_interval: Duration::from_millis(100),
        }
    }

    pub fn default_rate(&self, category: ThrottleCategory) -> u32 {
        self.default_rates[category.index()]
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mtu == 0 {
            bail!("MTU must be positive");
        }
        if !(0.0..=1.0).contains(&self.state_task_percentage) {
            bail!("state task percentage must be between 0.0 and 1.0, was {}", self.state_task_percentage);
        }
        if !(self.clock_resolution_ms > 0.0) {
            bail!("clock resolution must be positive, was {}", self.clock_resolution_ms);
        }
        if self.initial_rto < self.min_rto {
            bail!("initial RTO {:?} is below the minimum RTO {:?}", self.initial_rto, self.min_rto);
        }
        Ok(())
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::new()
    }
}
