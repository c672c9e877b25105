#[cfg(test)]
use mockall::automock;

/// Trait for throughput estimation strategies.
///
/// Lets the selector and scheduler be tested against a mock estimator.
#[cfg_attr(test, automock)]
pub trait Estimator {
    /// Record one completed download, in bits per second.
    fn push(&mut self, bits_per_second: u64);

    /// Collapse the long-run average to the recent ring average. Called
    /// after a buffering stall so the next selection reacts to the stall
    /// instead of the (stale, optimistic) long-run history.
    fn on_underrun(&mut self);

    /// Long-run estimate in bits per second, `None` before the first sample.
    fn average(&self) -> Option<u64>;
}

/// Rolling throughput statistics for one track.
///
/// Two views of the same samples:
/// - an all-time weighted average with asymmetric gain: a sample above the
///   running average pulls it up quickly, a sample below drags it down
///   slowly, so one slow chunk does not trigger a downgrade;
/// - a fixed ring of the last [`Self::RING_SLOTS`] samples, used to re-seed
///   the average after an underrun.
#[derive(Clone, Debug, Default)]
pub struct BandwidthEstimator {
    average: Option<u64>,
    ring: [u64; Self::RING_SLOTS],
    ring_len: usize,
    ring_next: usize,
}

impl BandwidthEstimator {
    const RING_SLOTS: usize = 3;

    /// Gain divisors: `avg += (sample - avg) / divisor`.
    const RISE_DIVISOR: i64 = 2;
    const FALL_DIVISOR: i64 = 8;

    pub fn new() -> Self {
        Self::default()
    }

    /// Average of the recent sample ring, `None` while empty.
    fn ring_average(&self) -> Option<u64> {
        if self.ring_len == 0 {
            return None;
        }
        let sum: u64 = self.ring[..self.ring_len].iter().sum();
        Some(sum / self.ring_len as u64)
    }
}

impl Estimator for BandwidthEstimator {
    fn push(&mut self, bits_per_second: u64) {
        self.ring[self.ring_next] = bits_per_second;
        self.ring_next = (self.ring_next + 1) % Self::RING_SLOTS;
        self.ring_len = (self.ring_len + 1).min(Self::RING_SLOTS);

        self.average = Some(match self.average {
            None => bits_per_second,
            Some(avg) => {
                let delta = bits_per_second as i64 - avg as i64;
                let divisor = if delta > 0 {
                    Self::RISE_DIVISOR
                } else {
                    Self::FALL_DIVISOR
                };
                (avg as i64 + delta / divisor).max(0) as u64
            }
        });
    }

    fn on_underrun(&mut self) {
        if let Some(recent) = self.ring_average() {
            self.average = Some(recent);
        }
    }

    fn average(&self) -> Option<u64> {
        self.average
    }
}
