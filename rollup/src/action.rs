// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The [`Action`] contract and the built-in actions.
//!
//! An action decides what an aggregation does: it sees every event of a
//! group while holding exclusive access to the group's state, and it is asked
//! once per window to turn that state into an optional result event.

use std::time::{Duration, SystemTime};

use rollup_event::Event;

use crate::{ActionError, GroupKey, GroupState};

mod append;
mod count;
mod histogram;
mod percent_sampler;
mod put_all;
mod rate_limiter;
pub mod registry;
mod remove_duplicates;

pub use append::{Append, AppendConfig};
pub use count::{Count, CountConfig};
pub use histogram::{Histogram, HistogramConfig};
pub use percent_sampler::{PercentSampler, PercentSamplerConfig};
pub use put_all::PutAll;
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterMode};
pub use remove_duplicates::RemoveDuplicates;

/// A pluggable aggregation behavior.
///
/// Implementations must be cheap and non-blocking: the group's mutation lock
/// is held for the whole call, so a slow action stalls every other event of the
/// same group. Errors and panics are contained by the
/// [`ActionSynchronizer`](crate::ActionSynchronizer) and never reach the caller.
pub trait Action: Send + Sync {
    /// Handle one event of a group.
    ///
    /// The action has exclusive access to the group's state for the duration of
    /// the call and must not keep references to the event or the state.
    fn handle_event(
        &self,
        event: &Event,
        input: &mut ActionInput<'_>,
    ) -> Result<ActionResponse, ActionError>;

    /// Produce the result of a group whose window has ended.
    ///
    /// Called at most once per group. The state is discarded right after.
    fn conclude_group(&self, input: &ConcludeInput<'_>) -> Result<Option<Event>, ActionError> {
        let _ = input;
        Ok(None)
    }
}

/// What happens to an event after an [`Action`] handled it.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResponse {
    /// The event was absorbed into the group and is not emitted.
    Absorb,
    /// The original event is emitted unchanged.
    PassThrough,
    /// A different event is emitted in place of the original.
    Replace(Event),
}

impl ActionResponse {
    /// The event to emit for `original`, if any.
    pub fn resolve(self, original: Event) -> Option<Event> {
        match self {
            ActionResponse::Absorb => None,
            ActionResponse::PassThrough => Some(original),
            ActionResponse::Replace(event) => Some(event),
        }
    }

    /// Returns `true` if no event is emitted.
    pub fn is_absorbed(&self) -> bool {
        matches!(self, ActionResponse::Absorb)
    }
}

/// A group as seen by [`Action::handle_event`].
#[derive(Debug)]
pub struct ActionInput<'a> {
    key: &'a GroupKey,
    state: &'a mut GroupState,
    window_start: SystemTime,
    window_elapsed: Duration,
}

impl<'a> ActionInput<'a> {
    /// Wrap a group's key and state. The window is taken to have just opened.
    pub fn new(key: &'a GroupKey, state: &'a mut GroupState, window_start: SystemTime) -> Self {
        Self {
            key,
            state,
            window_start,
            window_elapsed: Duration::ZERO,
        }
    }

    /// Set how long the group's window has been open, on the engine's monotonic clock.
    pub fn with_window_elapsed(mut self, elapsed: Duration) -> Self {
        self.window_elapsed = elapsed;
        self
    }

    /// The key of the group.
    pub fn key(&self) -> &GroupKey {
        self.key
    }

    /// The group's state.
    pub fn state(&self) -> &GroupState {
        &*self.state
    }

    /// Mutable access to the group's state.
    pub fn state_mut(&mut self) -> &mut GroupState {
        &mut *self.state
    }

    /// When the group's window started.
    pub fn window_start(&self) -> SystemTime {
        self.window_start
    }

    /// How long the group's window has been open.
    ///
    /// Measured on the monotonic clock, so it never goes backwards within a
    /// window. Use it for rates; use [`Self::window_start`] for output.
    pub fn window_elapsed(&self) -> Duration {
        self.window_elapsed
    }
}

/// A group as seen by [`Action::conclude_group`].
#[derive(Debug)]
pub struct ConcludeInput<'a> {
    key: &'a GroupKey,
    state: &'a GroupState,
    window_start: SystemTime,
    concluded_at: SystemTime,
}

impl<'a> ConcludeInput<'a> {
    /// Wrap a concluding group's key and state.
    pub fn new(
        key: &'a GroupKey,
        state: &'a GroupState,
        window_start: SystemTime,
        concluded_at: SystemTime,
    ) -> Self {
        Self {
            key,
            state,
            window_start,
            concluded_at,
        }
    }

    /// The key of the group.
    pub fn key(&self) -> &GroupKey {
        self.key
    }

    /// The group's final state.
    pub fn state(&self) -> &GroupState {
        self.state
    }

    /// When the group's window started.
    pub fn window_start(&self) -> SystemTime {
        self.window_start
    }

    /// When the group was concluded.
    pub fn concluded_at(&self) -> SystemTime {
        self.concluded_at
    }
}

/// Render `time` as RFC 3339 text, the format aggregated events use for timestamps.
pub(crate) fn rfc3339(time: SystemTime) -> Result<String, ActionError> {
    jiff::Timestamp::try_from(time)
        .map(|timestamp| timestamp.to_string())
        .map_err(|err| ActionError::with_source("timestamp is out of range", err))
}
