use log::{debug, warn};
use std::time::{Duration, Instant};

pub const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterFamily {
    Disk,
    Network,
}

/// Two cumulative byte counters read together: disk (read, written) or
/// network (sent, received).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterPair(pub u64, pub u64);

#[derive(Debug, Clone, Copy)]
pub struct CounterBaseline {
    pub counters: CounterPair,
    pub observed_at: Instant,
}

/// Rates for both counters of a pair, MiB/s. `reset` is set when either
/// counter went backwards since the baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterDelta {
    pub rates: (f64, f64),
    pub reset: bool,
}

/// `(current - previous) / elapsed` in MiB/s, or `None` if the counter went
/// backwards.
pub fn delta(previous: u64, current: u64, elapsed: Duration) -> Option<f64> {
    if current < previous {
        return None;
    }
    if elapsed.is_zero() {
        return Some(0.0);
    }
    Some((current - previous) as f64 / MIB / elapsed.as_secs_f64())
}

/// Turns cumulative OS counters into rates. Holds one baseline per family and
/// is only ever touched by the sampling task.
#[derive(Debug, Default)]
pub struct CounterDeltaTracker {
    disk: Option<CounterBaseline>,
    network: Option<CounterBaseline>,
}

impl CounterDeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, family: CounterFamily) -> &mut Option<CounterBaseline> {
        match family {
            CounterFamily::Disk => &mut self.disk,
            CounterFamily::Network => &mut self.network,
        }
    }

    pub fn baseline(&self, family: CounterFamily) -> Option<&CounterBaseline> {
        match family {
            CounterFamily::Disk => self.disk.as_ref(),
            CounterFamily::Network => self.network.as_ref(),
        }
    }

    pub fn update(&mut self, family: CounterFamily, current: CounterPair, now: Instant) {
        *self.slot(family) = Some(CounterBaseline {
            counters: current,
            observed_at: now,
        });
    }

    pub fn observe<E>(
        &mut self,
        family: CounterFamily,
        reading: Result<CounterPair, E>,
    ) -> Result<CounterDelta, E> {
        self.observe_at(family, reading, Instant::now())
    }

    /// Computes the rate against the baseline and replaces it. A failed read
    /// drops the baseline, so the next good read starts over instead of
    /// spanning the gap.
    pub fn observe_at<E>(
        &mut self,
        family: CounterFamily,
        reading: Result<CounterPair, E>,
        now: Instant,
    ) -> Result<CounterDelta, E> {
        let current = match reading {
            Ok(current) => current,
            Err(e) => {
                *self.slot(family) = None;
                return Err(e);
            }
        };

        let result = match self.baseline(family) {
            None => {
                debug!("{:?} counters: first observation, no rate yet", family);
                CounterDelta::default()
            }
            Some(baseline) => {
                let elapsed = now.saturating_duration_since(baseline.observed_at);
                let first = delta(baseline.counters.0, current.0, elapsed);
                let second = delta(baseline.counters.1, current.1, elapsed);
                let reset = first.is_none() || second.is_none();
                if reset {
                    warn!(
                        "{:?} counters went backwards ({:?} -> {:?}), treating as reset",
                        family, baseline.counters, current
                    );
                }
                CounterDelta {
                    rates: (first.unwrap_or(0.0), second.unwrap_or(0.0)),
                    reset,
                }
            }
        };

        self.update(family, current, now);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB_U: u64 = 1024 * 1024;

    #[test]
    fn test_delta_is_rate_per_second() {
        assert_eq!(delta(0, 10 * MIB_U, Duration::from_secs(2)), Some(5.0));
        assert_eq!(delta(7, 7, Duration::from_secs(1)), Some(0.0));
        assert_eq!(delta(1, 2, Duration::ZERO), Some(0.0));
    }

    #[test]
    fn test_delta_non_negative_for_non_decreasing_readings() {
        let readings = [0u64, 0, 512, 4 * MIB_U, 4 * MIB_U, 9 * MIB_U + 3];
        for pair in readings.windows(2) {
            let rate = delta(pair[0], pair[1], Duration::from_millis(500)).unwrap();
            assert!(rate >= 0.0);
            let expected = (pair[1] - pair[0]) as f64 / MIB / 0.5;
            assert!((rate - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_decrease_is_a_reset() {
        assert_eq!(delta(10, 5, Duration::from_secs(1)), None);
    }

    #[test]
    fn test_disk_scenario() {
        let mut tracker = CounterDeltaTracker::new();
        let t0 = Instant::now();
        let first = tracker
            .observe_at::<()>(
                CounterFamily::Disk,
                Ok(CounterPair(1000 * MIB_U, 2000 * MIB_U)),
                t0,
            )
            .unwrap();
        assert_eq!(first, CounterDelta::default());

        let second = tracker
            .observe_at::<()>(
                CounterFamily::Disk,
                Ok(CounterPair(1500 * MIB_U, 2100 * MIB_U)),
                t0 + Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(second.rates, (500.0, 100.0));
        assert!(!second.reset);
    }

    #[test]
    fn test_reset_yields_zero_and_flag() {
        let mut tracker = CounterDeltaTracker::new();
        let t0 = Instant::now();
        tracker
            .observe_at::<()>(CounterFamily::Network, Ok(CounterPair(5000, 100)), t0)
            .unwrap();
        let d = tracker
            .observe_at::<()>(
                CounterFamily::Network,
                Ok(CounterPair(10, 100 + MIB_U)),
                t0 + Duration::from_secs(1),
            )
            .unwrap();
        assert!(d.reset);
        assert_eq!(d.rates, (0.0, 1.0));
        assert_eq!(
            tracker.baseline(CounterFamily::Network).unwrap().counters,
            CounterPair(10, 100 + MIB_U)
        );
    }

    #[test]
    fn test_failed_read_drops_baseline() {
        let mut tracker = CounterDeltaTracker::new();
        let t0 = Instant::now();
        tracker
            .observe_at::<&str>(CounterFamily::Disk, Ok(CounterPair(0, 0)), t0)
            .unwrap();
        let err = tracker.observe_at(
            CounterFamily::Disk,
            Err("permission denied"),
            t0 + Duration::from_secs(1),
        );
        assert!(err.is_err());
        assert!(tracker.baseline(CounterFamily::Disk).is_none());

        // No delta spans the skipped tick.
        let d = tracker
            .observe_at::<&str>(
                CounterFamily::Disk,
                Ok(CounterPair(2 * MIB_U, 2 * MIB_U)),
                t0 + Duration::from_secs(2),
            )
            .unwrap();
        assert_eq!(d, CounterDelta::default());
    }

    #[test]
    fn test_families_are_independent() {
        let mut tracker = CounterDeltaTracker::new();
        let t0 = Instant::now();
        tracker
            .observe_at::<()>(CounterFamily::Disk, Ok(CounterPair(1, 1)), t0)
            .unwrap();
        assert!(tracker.baseline(CounterFamily::Network).is_none());
    }
}
