use std::time::Duration;

use crate::types::{Level, SelectorOptions};

/// Why a selection decision came out the way it did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SelectionReason {
    SingleLevel,
    NoEstimate,
    /// Current level still has non-negative validation; kept unconditionally.
    Hold,
    /// Current level fully qualified and no better level is eligible.
    Qualified,
    UpSwitch,
    DownSwitch,
}

/// Outcome of one scheduling decision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Selection {
    pub level: Level,
    pub reason: SelectionReason,
    pub changed: bool,
}

/// Hysteresis-based quality selection for one track.
///
/// Each level carries a signed validation accumulator, clamped to
/// `[-probe_length, +probe_length]`. Every decision moves the accumulator of
/// an affordable level (`bitrate <= estimate`) toward the positive
/// "qualified" bound by the elapsed chunk duration, and an unaffordable
/// level toward the negative bound. The current level is kept while its
/// accumulator is non-negative; a fully qualified current level may upgrade
/// to the highest affordable level with non-negative validation; a negative
/// accumulator falls back to the lowest level, then scans upward for the
/// highest affordable level validated at least as well as the fallback.
///
/// The two-pass, signed-accumulator design makes a single bandwidth spike
/// or dip unable to flip the selection: any switch needs evidence
/// accumulated over a probe window.
#[derive(Clone, Debug)]
pub struct QualitySelector {
    /// Sorted ascending by bitrate.
    levels: Vec<Level>,
    /// Validation accumulators in microseconds, same order as `levels`.
    validation: Vec<i64>,
    /// Position of the current selection in `levels`.
    current: usize,
    probe_us: i64,
}

impl QualitySelector {
    /// `levels` may arrive in manifest order; they are sorted by bitrate.
    /// Selection starts at the lowest bitrate.
    pub fn new(mut levels: Vec<Level>, opts: &SelectorOptions) -> Self {
        levels.sort_by_key(|l| l.bitrate_bps);
        let n = levels.len();
        Self {
            levels,
            validation: vec![0; n],
            current: 0,
            probe_us: opts.probe_length.as_micros().min(i64::MAX as u128) as i64,
        }
    }

    pub fn current(&self) -> Level {
        self.levels[self.current]
    }

    /// Run one scheduling decision. `elapsed` is the media duration of the
    /// chunk whose download prompted the decision.
    pub fn decide(&mut self, estimate: Option<u64>, elapsed: Duration) -> Selection {
        let cur = self.levels[self.current];

        if self.levels.len() <= 1 {
            return Selection {
                level: cur,
                reason: SelectionReason::SingleLevel,
                changed: false,
            };
        }
        let Some(estimate) = estimate else {
            return Selection {
                level: cur,
                reason: SelectionReason::NoEstimate,
                changed: false,
            };
        };

        let dt = elapsed.as_micros().min(i64::MAX as u128) as i64;
        for (level, v) in self.levels.iter().zip(self.validation.iter_mut()) {
            if level.bitrate_bps <= estimate {
                *v = (*v + dt).min(self.probe_us);
            } else {
                *v = (*v - dt).max(-self.probe_us);
            }
        }

        let (target, reason) = if self.validation[self.current] >= self.probe_us {
            // Fully qualified: eligible to try the highest affordable level
            // that is not carrying disqualifying evidence.
            let best = self.scan_down(estimate, 0);
            match best {
                Some(idx) if idx != self.current => (idx, SelectionReason::UpSwitch),
                _ => (self.current, SelectionReason::Qualified),
            }
        } else if self.validation[self.current] >= 0 {
            (self.current, SelectionReason::Hold)
        } else {
            // Disqualified: fall back to the lowest level, then take the
            // highest affordable level validated at least as well.
            let floor = self.validation[0];
            let target = self.scan_down(estimate, floor).unwrap_or(0);
            let reason = if self.levels[target].bitrate_bps < cur.bitrate_bps {
                SelectionReason::DownSwitch
            } else {
                SelectionReason::UpSwitch
            };
            (target, reason)
        };

        let changed = target != self.current;
        if changed {
            tracing::debug!(
                from = cur.index,
                to = self.levels[target].index,
                estimate,
                ?reason,
                "quality switch"
            );
        }
        self.current = target;

        Selection {
            level: self.levels[target],
            reason,
            changed,
        }
    }

    /// Highest-bitrate level that is affordable and validated at least to
    /// `floor`.
    fn scan_down(&self, estimate: u64, floor: i64) -> Option<usize> {
        (0..self.levels.len())
            .rev()
            .find(|&i| self.levels[i].bitrate_bps <= estimate && self.validation[i] >= floor)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    fn levels(bitrates: &[u64]) -> Vec<Level> {
        bitrates
            .iter()
            .enumerate()
            .map(|(index, &bitrate_bps)| Level { index, bitrate_bps })
            .collect()
    }

    fn selector(bitrates: &[u64]) -> QualitySelector {
        QualitySelector::new(
            levels(bitrates),
            &SelectorOptions {
                probe_length: Duration::from_secs(4),
            },
        )
    }

    #[test]
    fn single_level_is_a_no_op() {
        let mut s = selector(&[640_000]);
        let d = s.decide(Some(100), SEC);
        assert_eq!(d.reason, SelectionReason::SingleLevel);
        assert!(!d.changed);
        assert_eq!(d.level.bitrate_bps, 640_000);
    }

    #[test]
    fn no_estimate_keeps_current() {
        let mut s = selector(&[200_000, 800_000]);
        let d = s.decide(None, SEC);
        assert_eq!(d.reason, SelectionReason::NoEstimate);
        assert_eq!(d.level.bitrate_bps, 200_000);
    }

    #[test]
    fn steady_estimate_converges_to_highest_affordable_and_stays() {
        // Two levels, steady 500 kbps: must converge to 200 kbps (the
        // highest affordable) and stay there across 5+ decisions.
        let mut s = selector(&[200_000, 800_000]);
        let mut selected = Vec::new();
        for _ in 0..10 {
            selected.push(s.decide(Some(500_000), SEC).level.bitrate_bps);
        }
        assert!(selected.iter().all(|&b| b == 200_000));
    }

    #[test]
    fn sustained_headroom_upgrades_once() {
        let mut s = selector(&[200_000, 800_000]);
        let mut switches = 0;
        for _ in 0..12 {
            if s.decide(Some(2_000_000), SEC).changed {
                switches += 1;
            }
        }
        assert_eq!(switches, 1);
        assert_eq!(s.current().bitrate_bps, 800_000);
    }

    #[test]
    fn upgrade_needs_a_full_probe_window() {
        let mut s = selector(&[200_000, 800_000]);
        // probe_length = 4s, so 3 good seconds must not be enough.
        for _ in 0..3 {
            let d = s.decide(Some(2_000_000), SEC);
            assert!(!d.changed);
        }
        let d = s.decide(Some(2_000_000), SEC);
        assert!(d.changed);
        assert_eq!(d.reason, SelectionReason::UpSwitch);
    }

    #[test]
    fn single_dip_does_not_downgrade() {
        let mut s = selector(&[200_000, 800_000]);
        for _ in 0..8 {
            s.decide(Some(2_000_000), SEC);
        }
        assert_eq!(s.current().bitrate_bps, 800_000);

        let d = s.decide(Some(300_000), SEC);
        assert!(!d.changed, "one slow chunk must not flip the selection");
        assert_eq!(d.reason, SelectionReason::Hold);
    }

    #[test]
    fn sustained_shortfall_falls_back() {
        let mut s = selector(&[200_000, 800_000, 3_000_000]);
        for _ in 0..8 {
            s.decide(Some(5_000_000), SEC);
        }
        assert_eq!(s.current().bitrate_bps, 3_000_000);

        // Estimate collapses: the current level must bleed its validation
        // and then fall back to the highest still-affordable level.
        let mut landed = s.current().bitrate_bps;
        for _ in 0..12 {
            landed = s.decide(Some(600_000), SEC).level.bitrate_bps;
        }
        assert_eq!(landed, 200_000);
    }

    #[rstest]
    #[case::stable_mid(500_000, 200_000)]
    #[case::stable_high(900_000, 800_000)]
    #[case::stable_low(100_000, 200_000)]
    fn stable_input_switches_at_most_once_per_window(
        #[case] estimate: u64,
        #[case] expected: u64,
    ) {
        let mut s = selector(&[200_000, 800_000]);
        // Two probe windows of stable input: at most one switch per window.
        for window in 0..2 {
            let mut switches = 0;
            for _ in 0..4 {
                if s.decide(Some(estimate), SEC).changed {
                    switches += 1;
                }
            }
            assert!(switches <= 1, "window {window}: {switches} switches");
        }
        assert_eq!(s.current().bitrate_bps, expected);
    }
}
