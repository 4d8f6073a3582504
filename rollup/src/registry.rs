// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use metrique_timesource::TimeSource;

use crate::{Group, GroupKey};

/// Concurrent map from [`GroupKey`] to its live [`Group`].
///
/// Lookups and inserts only lock the shard that holds the key, so work on
/// unrelated keys proceeds in parallel. Enumeration works on a snapshot and
/// never holds a shard lock while calling back into user code.
#[derive(Debug)]
pub struct GroupRegistry {
    groups: DashMap<GroupKey, Arc<Group>>,
    time_source: TimeSource,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new(TimeSource::System)
    }
}

impl GroupRegistry {
    /// Create an empty registry. New groups take their window start from `time_source`.
    pub fn new(time_source: TimeSource) -> Self {
        Self {
            groups: DashMap::new(),
            time_source,
        }
    }

    /// The time source groups are stamped with.
    pub fn time_source(&self) -> &TimeSource {
        &self.time_source
    }

    /// The current monotonic time according to [`Self::time_source`].
    pub fn now(&self) -> Instant {
        self.time_source.instant().as_std()
    }

    /// The live group for `key`, if there is one.
    pub fn get(&self, key: &GroupKey) -> Option<Arc<Group>> {
        self.groups.get(key).map(|group| Arc::clone(group.value()))
    }

    /// The live group for `key`, creating an empty one if there is none.
    ///
    /// Concurrent callers racing on an unseen key all get the same group.
    pub fn get_or_create(&self, key: &GroupKey) -> Arc<Group> {
        if let Some(group) = self.groups.get(key) {
            return Arc::clone(group.value());
        }
        let group = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Group::new(&self.time_source)));
        Arc::clone(group.value())
    }

    /// Make `group` the live group for `key`.
    pub fn put(&self, key: GroupKey, group: Arc<Group>) {
        self.groups.insert(key, group);
    }

    /// Remove `key` only if its live group is still `group`.
    ///
    /// Returns `true` if the entry was removed. A newer group that already
    /// replaced `group` is left alone.
    pub fn remove(&self, key: &GroupKey, group: &Arc<Group>) -> bool {
        self.groups
            .remove_if(key, |_, current| Arc::ptr_eq(current, group))
            .is_some()
    }

    /// Call `f` for every group whose window has been open for at least `window` at `now`.
    ///
    /// Groups created or removed while this runs may or may not be visited.
    pub fn for_each_expired(
        &self,
        window: Duration,
        now: Instant,
        mut f: impl FnMut(&GroupKey, &Arc<Group>),
    ) {
        for (key, group) in self.snapshot() {
            if group.is_expired(window, now) {
                f(&key, &group);
            }
        }
    }

    /// Call `f` for every live group.
    pub fn for_each(&self, mut f: impl FnMut(&GroupKey, &Arc<Group>)) {
        for (key, group) in self.snapshot() {
            f(&key, &group);
        }
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns `true` if there are no live groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn snapshot(&self) -> Vec<(GroupKey, Arc<Group>)> {
        self.groups
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }
}
