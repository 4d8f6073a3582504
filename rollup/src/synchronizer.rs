// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Coordination of event handling and conclusion on shared groups.
//!
//! Every group carries two locks. The *conclude lock* says "a conclusion is in
//! flight": [`ActionSynchronizer::conclude`] only ever try-locks it, so a sweep
//! skips a group that another sweep is already concluding instead of queueing
//! behind it. The *mutation lock* guards the state itself and is held only
//! while the action runs. Event handling takes both, in the same order, so it
//! waits for an in-flight conclusion to finish and never observes a
//! half-concluded group.
//!
//! This module is the only code that takes either lock.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, TryLockError,
        atomic::{AtomicU64, Ordering},
    },
};

use rollup_event::Event;
use tracing::{trace, warn};

use crate::{
    Action, ActionError, ActionInput, ActionResponse, ConcludeInput, Group, GroupKey,
    GroupRegistry, group::lock,
};

/// Errors contained by an [`ActionSynchronizer`] since it was created.
///
/// Process-lifetime totals. Per-batch counts are reported through the
/// processor's metrics entry.
#[derive(Debug, Default)]
pub struct SynchronizerStats {
    handle_errors: AtomicU64,
    conclude_errors: AtomicU64,
}

impl SynchronizerStats {
    /// Number of failed [`Action::handle_event`] calls.
    pub fn handle_errors(&self) -> u64 {
        self.handle_errors.load(Ordering::Relaxed)
    }

    /// Number of failed [`Action::conclude_group`] calls.
    pub fn conclude_errors(&self) -> u64 {
        self.conclude_errors.load(Ordering::Relaxed)
    }
}

/// Outcome of [`ActionSynchronizer::handle`].
#[derive(Debug)]
pub(crate) struct Handled {
    pub(crate) response: ActionResponse,
    pub(crate) failed: bool,
}

/// Outcome of [`ActionSynchronizer::try_conclude`].
#[derive(Debug)]
pub(crate) enum Conclusion {
    /// Another thread is concluding the group or already did.
    Skipped,
    /// The group was concluded by this call.
    Concluded(Option<Event>),
    /// The group was concluded by this call, but the action failed.
    Failed,
}

/// Runs an [`Action`] against groups shared between threads.
///
/// Guarantees, per group:
///
/// - at most one thread concludes it, and it is concluded at most once;
/// - the action never sees its state while another call is mutating it;
/// - once concluded it is never handed another event, later events go to a
///   fresh group for the same key.
///
/// Failures of the action (errors and panics) never escape: a failed
/// `handle_event` lets the original event through, a failed `conclude_group`
/// discards the window's result.
pub struct ActionSynchronizer {
    action: Arc<dyn Action>,
    registry: Arc<GroupRegistry>,
    stats: SynchronizerStats,
}

impl std::fmt::Debug for ActionSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSynchronizer")
            .field("registry", &self.registry)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ActionSynchronizer {
    /// Create a synchronizer running `action` on groups of `registry`.
    pub fn new(action: Arc<dyn Action>, registry: Arc<GroupRegistry>) -> Self {
        Self {
            action,
            registry,
            stats: SynchronizerStats::default(),
        }
    }

    /// The registry this synchronizer concludes groups of.
    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Error counters.
    pub fn stats(&self) -> &SynchronizerStats {
        &self.stats
    }

    /// Let the action handle `event`, which belongs to `group` under `key`.
    ///
    /// Blocks while the group is being mutated or concluded. If the group was
    /// concluded in the meantime the event is handled by the live group for
    /// `key` instead, creating it if needed.
    pub fn handle_event(&self, event: &Event, key: &GroupKey, group: Arc<Group>) -> ActionResponse {
        self.handle(event, key, group).response
    }

    pub(crate) fn handle(&self, event: &Event, key: &GroupKey, group: Arc<Group>) -> Handled {
        let mut group = group;
        loop {
            let concluding = lock(group.conclude_lock());
            let mut cell = lock(group.mutation_lock());
            if cell.concluded {
                drop(cell);
                drop(concluding);
                trace!(
                    key = key.fingerprint(),
                    "group concluded while waiting, retrying"
                );
                group = self.registry.get_or_create(key);
                continue;
            }

            let window_start = group.window_started_at();
            let elapsed = group.age(self.registry.now());
            let result = catch_unwind(AssertUnwindSafe(|| {
                let mut input = ActionInput::new(key, &mut cell.state, window_start)
                    .with_window_elapsed(elapsed);
                self.action.handle_event(event, &mut input)
            }));
            self.registry.put(key.clone(), Arc::clone(&group));
            drop(cell);
            drop(concluding);

            return match settle(result) {
                Ok(response) => Handled {
                    response,
                    failed: false,
                },
                Err(err) => {
                    self.stats.handle_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        key = key.fingerprint(),
                        ?err,
                        "aggregate action failed to handle event, passing it through"
                    );
                    Handled {
                        response: ActionResponse::PassThrough,
                        failed: true,
                    }
                }
            };
        }
    }

    /// Conclude `group`, returning the action's result event if there is one.
    ///
    /// Returns `None` without doing anything if another thread is concluding
    /// the group right now or already concluded it. Otherwise the group is
    /// concluded, its state cleared and it is removed from the registry, even
    /// when the action fails.
    pub fn conclude(&self, key: &GroupKey, group: &Arc<Group>) -> Option<Event> {
        match self.try_conclude(key, group) {
            Conclusion::Concluded(event) => event,
            Conclusion::Skipped | Conclusion::Failed => None,
        }
    }

    pub(crate) fn try_conclude(&self, key: &GroupKey, group: &Arc<Group>) -> Conclusion {
        let concluding = match group.conclude_lock().try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                trace!(key = key.fingerprint(), "group is already being concluded");
                return Conclusion::Skipped;
            }
        };

        let result = {
            let mut cell = lock(group.mutation_lock());
            if cell.concluded {
                return Conclusion::Skipped;
            }
            let window_start = group.window_started_at();
            let concluded_at = self.registry.time_source().system_time().as_std();
            let result = catch_unwind(AssertUnwindSafe(|| {
                let input = ConcludeInput::new(key, &cell.state, window_start, concluded_at);
                self.action.conclude_group(&input)
            }));
            cell.concluded = true;
            cell.state.clear();
            result
        };
        group.reset_window(self.registry.time_source());
        self.registry.remove(key, group);
        drop(concluding);

        match settle(result) {
            Ok(event) => Conclusion::Concluded(event),
            Err(err) => {
                self.stats.conclude_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = key.fingerprint(),
                    ?err,
                    "aggregate action failed to conclude group, dropping its result"
                );
                Conclusion::Failed
            }
        }
    }
}

fn settle<T>(result: std::thread::Result<Result<T, ActionError>>) -> Result<T, ActionError> {
    result.unwrap_or_else(|payload| Err(ActionError::panicked(payload)))
}
