//! Time/scheduler hook (§4.9): a single `time_check` entry point the owner
//! of the event loop calls to find out when it next needs to call back in,
//! folding together extra-repeat timers, the transport's own wakeup, and
//! the relay cache's periodic eviction sweep.

use crate::horizon::HorizonEngine;
use crate::model::FragmentKey;

/// Optional relay cache maintenance hook (§4.9 step 3); absent when this
/// engine instance isn't fronting a cache.
pub struct CacheCheck {
    pub last_check: u64,
    pub cache_duration_max: u64,
}

impl CacheCheck {
    fn next_time(&self) -> u64 {
        self.last_check + self.cache_duration_max / 2
    }
}

/// Drives [`HorizonEngine::handle_extra_repeat`] across every stream that
/// has one, and folds in the transport's own wakeup and the optional cache
/// sweep, to produce a single next-wakeup time (§4.9).
pub struct Scheduler {
    pub cache_check: Option<CacheCheck>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self { cache_check: None }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one `time_check` pass. `horizons` is every stream's ack engine;
    /// `quic_time` is the transport's own next-wakeup estimate. For each
    /// stream, every extra-repeat record whose time has come is handed to
    /// `on_extra_repeat(horizon, key)` so the caller can look up the
    /// record's data and call [`HorizonEngine::repeat`] on it (§4.9 step 1).
    /// `on_cache_check` is invoked (and `last_check` advanced) if the cache
    /// sweep is due. Returns the minimum of all contributions (§4.9).
    pub fn time_check<'a>(
        &mut self,
        now: u64,
        horizons: impl Iterator<Item = &'a mut HorizonEngine>,
        quic_time: Option<u64>,
        mut on_extra_repeat: impl FnMut(&mut HorizonEngine, FragmentKey),
        mut on_cache_check: impl FnMut(),
    ) -> Option<u64> {
        let mut next: Option<u64> = quic_time;

        for horizon in horizons {
            let (due, next_extra): (Vec<FragmentKey>, Option<u64>) = horizon.handle_extra_repeat(now);
            for key in due {
                on_extra_repeat(&mut *horizon, key);
            }
            next = min_opt(next, next_extra);
        }

        if let Some(cache_check) = &mut self.cache_check {
            let next_cache_time = cache_check.next_time();
            if next_cache_time <= now {
                on_cache_check();
                cache_check.last_check = now;
            } else {
                next = min_opt(next, Some(next_cache_time));
            }
        }

        next
    }
}

fn min_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_check_folds_quic_time_with_no_other_timers() {
        let mut scheduler = Scheduler::new();
        let mut horizons: Vec<HorizonEngine> = Vec::new();
        let next = scheduler.time_check(1_000, horizons.iter_mut(), Some(1_500), |_, _| {}, || {});
        assert_eq!(next, Some(1_500));
    }

    #[test]
    fn time_check_picks_earliest_extra_repeat() {
        let mut scheduler = Scheduler::new();
        let mut horizon = HorizonEngine::new();
        horizon.ack_init(0, 0, 0, 10, 10, 25, true, 50, 1_000);
        let mut horizons = vec![horizon];
        let next = scheduler.time_check(1_000, horizons.iter_mut(), Some(10_000), |_, _| {}, || {});
        assert_eq!(next, Some(1_050));
    }

    #[test]
    fn time_check_repeats_due_extra_repeat_records() {
        let mut scheduler = Scheduler::new();
        let mut horizon = HorizonEngine::new();
        horizon.ack_init(0, 0, 0, 10, 10, 25, true, 50, 1_000);
        let mut horizons = vec![horizon];
        let mut repeated = Vec::new();
        scheduler.time_check(1_050, horizons.iter_mut(), None, |_, key| repeated.push(key), || {});
        assert_eq!(repeated, vec![FragmentKey::new(0, 0, 0)]);
    }

    #[test]
    fn time_check_runs_cache_sweep_when_due() {
        let mut scheduler = Scheduler::new();
        scheduler.cache_check = Some(CacheCheck {
            last_check: 0,
            cache_duration_max: 1_000,
        });
        let mut ran = false;
        let mut horizons: Vec<HorizonEngine> = Vec::new();
        let next = scheduler.time_check(600, horizons.iter_mut(), None, |_, _| {}, || ran = true);
        assert!(ran);
        assert!(next.is_none());
    }

    #[test]
    fn time_check_reports_future_cache_sweep() {
        let mut scheduler = Scheduler::new();
        scheduler.cache_check = Some(CacheCheck {
            last_check: 0,
            cache_duration_max: 1_000,
        });
        let mut horizons: Vec<HorizonEngine> = Vec::new();
        let next = scheduler.time_check(100, horizons.iter_mut(), None, |_, _| {}, || panic!("should not run yet"));
        assert_eq!(next, Some(500));
    }
}
