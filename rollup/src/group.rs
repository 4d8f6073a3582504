// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant, SystemTime},
};

use metrique_timesource::TimeSource;
use rollup_event::{Map, Value};

/// Per-group accumulation state. Actions read and write it freely while they
/// hold a group; it is discarded when the group concludes.
pub type GroupState = Map<String, Value>;

/// State guarded by a group's mutation lock.
#[derive(Debug, Default)]
pub(crate) struct GroupCell {
    pub(crate) state: GroupState,
    pub(crate) concluded: bool,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    started_at: SystemTime,
}

impl Window {
    fn now(time_source: &TimeSource) -> Self {
        Self {
            started: time_source.instant().as_std(),
            started_at: time_source.system_time().as_std(),
        }
    }
}

/// One aggregation window for one [`GroupKey`](crate::GroupKey).
///
/// Groups are created by the [`GroupRegistry`](crate::GroupRegistry) and
/// coordinated by the [`ActionSynchronizer`](crate::ActionSynchronizer), which
/// is the only code that takes the group's locks. Once concluded, a group is
/// never used again: the next event for the same key gets a new group.
pub struct Group {
    conclude_lock: Mutex<()>,
    mutation_lock: Mutex<GroupCell>,
    window: Mutex<Window>,
}

impl Group {
    pub(crate) fn new(time_source: &TimeSource) -> Self {
        Self {
            conclude_lock: Mutex::new(()),
            mutation_lock: Mutex::new(GroupCell::default()),
            window: Mutex::new(Window::now(time_source)),
        }
    }

    /// Monotonic start of the current window, used for expiry.
    pub fn window_start(&self) -> Instant {
        lock(&self.window).started
    }

    /// Wall-clock start of the current window, used in emitted events.
    pub fn window_started_at(&self) -> SystemTime {
        lock(&self.window).started_at
    }

    /// How long the current window has been open at `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window_start())
    }

    /// Returns `true` once the window has been open for at least `window`.
    pub fn is_expired(&self, window: Duration, now: Instant) -> bool {
        self.age(now) >= window
    }

    pub(crate) fn reset_window(&self, time_source: &TimeSource) {
        *lock(&self.window) = Window::now(time_source);
    }

    pub(crate) fn conclude_lock(&self) -> &Mutex<()> {
        &self.conclude_lock
    }

    pub(crate) fn mutation_lock(&self) -> &Mutex<GroupCell> {
        &self.mutation_lock
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never block on the group's locks from a Debug impl
        f.debug_struct("Group")
            .field("window", &*lock(&self.window))
            .finish_non_exhaustive()
    }
}

/// Lock `mutex`, ignoring poisoning.
///
/// Action panics are caught before they unwind through a guard, so a poisoned
/// lock still holds consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use assert2::check;
    use metrique_timesource::{TimeSource, fakes::ManuallyAdvancedTimeSource};

    use super::Group;

    #[test]
    fn expiry_is_measured_from_window_start() {
        let clock = ManuallyAdvancedTimeSource::at_time(UNIX_EPOCH);
        let ts = TimeSource::custom(clock.clone());
        let group = Group::new(&ts);
        let window = Duration::from_secs(60);

        check!(!group.is_expired(window, ts.instant().as_std()));
        clock.update_instant(Duration::from_secs(59));
        check!(!group.is_expired(window, ts.instant().as_std()));
        clock.update_instant(Duration::from_secs(1));
        check!(group.is_expired(window, ts.instant().as_std()));
    }

    #[test]
    fn reset_moves_both_clocks() {
        let clock = ManuallyAdvancedTimeSource::at_time(UNIX_EPOCH);
        let ts = TimeSource::custom(clock.clone());
        let group = Group::new(&ts);
        check!(group.window_started_at() == UNIX_EPOCH);

        clock.update_instant(Duration::from_secs(90));
        clock.update_time(UNIX_EPOCH + Duration::from_secs(90));
        group.reset_window(&ts);

        check!(group.window_started_at() == UNIX_EPOCH + Duration::from_secs(90));
        check!(group.age(ts.instant().as_std()) == Duration::ZERO);
    }

    #[test]
    fn age_never_underflows() {
        let clock = ManuallyAdvancedTimeSource::at_time(UNIX_EPOCH);
        let ts = TimeSource::custom(clock.clone());
        let before = ts.instant().as_std();
        clock.update_instant(Duration::from_secs(5));
        let group = Group::new(&ts);
        check!(group.age(before) == Duration::ZERO);
    }
}
