//! Round-trip time estimation and retransmission timeout calculation following RFC 2988
//!  (see https://www.rfc-editor.org/rfc/rfc2988), with a configurable floor for the timeout.

use std::time::Duration;
use tracing::trace;
use crate::config::ThrottleConfig;

const ALPHA: f64 = 0.125;
const BETA: f64 = 0.25;
const K: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// milliseconds, `None` before the first sample
    smoothed_rtt: Option<f64>,
    /// milliseconds
    rtt_variance: f64,
    /// whole milliseconds
    retransmit_timeout: u64,

    min_rto_ms: u64,
    clock_resolution_ms: f64,
}

impl RttEstimator {
    pub fn new(config: &ThrottleConfig) -> RttEstimator {
        RttEstimator {
            smoothed_rtt: None,
            rtt_variance: 0.0,
            retransmit_timeout: config.initial_rto.as_millis() as u64,
            min_rto_ms: config.min_rto.as_millis() as u64,
            clock_resolution_ms: config.clock_resolution_ms,
        }
    }

    /// Incorporates the round trip time of a single reliable packet and its acknowledgement.
    ///  There is no outlier rejection, every non-negative sample is taken at face value.
    pub fn update_round_trip(&mut self, sample_ms: f64) {
        let sample_ms = sample_ms.max(0.0);

        let smoothed_rtt = match self.smoothed_rtt {
            None => {
                self.rtt_variance = sample_ms * 0.5;
                sample_ms
            }
            Some(smoothed_rtt) => {
                self.rtt_variance = (1.0 - BETA) * self.rtt_variance + BETA * (smoothed_rtt - sample_ms).abs();
                (1.0 - ALPHA) * smoothed_rtt + ALPHA * sample_ms
            }
        };
        self.smoothed_rtt = Some(smoothed_rtt);

        let rto = (smoothed_rtt + self.clock_resolution_ms.max(K * self.rtt_variance)).round() as u64;
        self.retransmit_timeout = rto.max(self.min_rto_ms);

        trace!("RTT sample {}ms -> SRTT {}ms, RTTVAR {}ms, RTO {}ms", sample_ms, smoothed_rtt, self.rtt_variance, self.retransmit_timeout);
    }

    pub fn smoothed_rtt_ms(&self) -> Option<f64> {
        self.smoothed_rtt
    }

    pub fn rtt_variance_ms(&self) -> f64 {
        self.rtt_variance
    }

    pub fn retransmit_timeout_ms(&self) -> u64 {
        self.retransmit_timeout
    }

    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout)
    }
}
