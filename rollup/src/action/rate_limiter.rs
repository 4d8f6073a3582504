// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use rollup_event::{Event, Value};
use serde::Deserialize;

use crate::{Action, ActionError, ActionInput, ActionResponse, ConfigError};

const TOKENS: &str = "tokens";
const REFILLED_AT: &str = "refilled_at_nanos";

/// What the `rate_limiter` action does with events over the limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimiterMode {
    /// Absorb the event.
    #[default]
    Drop,
    /// Wait until the event fits under the limit. Not supported: waiting would
    /// hold the group's mutation lock.
    Block,
}

/// Settings of the `rate_limiter` action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimiterConfig {
    /// Events per second each group lets through.
    pub events_per_second: u32,
    /// Behavior once a group is over its rate.
    #[serde(default)]
    pub when_exceeds: RateLimiterMode,
}

/// Lets at most `events_per_second` events of each group through per second.
///
/// Each group holds a token bucket in its state. The bucket starts with one
/// token, refills at the configured rate on the window clock and holds at
/// most one second's worth. An event takes a token and passes through, or is
/// absorbed when none is left. Conclusion emits nothing.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    events_per_second: f64,
}

impl RateLimiter {
    /// Build the action. Only [`RateLimiterMode::Drop`] is supported.
    pub fn new(config: RateLimiterConfig) -> Result<Self, ConfigError> {
        if config.events_per_second == 0 {
            return Err(ConfigError::invalid_value(
                "events_per_second",
                "must be greater than zero",
            ));
        }
        if config.when_exceeds == RateLimiterMode::Block {
            return Err(ConfigError::invalid_value(
                "when_exceeds",
                "only `drop` is supported",
            ));
        }
        Ok(Self {
            events_per_second: f64::from(config.events_per_second),
        })
    }
}

fn nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

impl Action for RateLimiter {
    fn handle_event(
        &self,
        _event: &Event,
        input: &mut ActionInput<'_>,
    ) -> Result<ActionResponse, ActionError> {
        let now = input.window_elapsed();
        let state = input.state_mut();

        let stored = state.get(TOKENS).and_then(Value::as_f64);
        let refilled_at = state.get(REFILLED_AT).and_then(Value::as_u64);
        let mut tokens = match (stored, refilled_at) {
            (Some(tokens), Some(at)) => {
                let idle = now.saturating_sub(Duration::from_nanos(at));
                (tokens + idle.as_secs_f64() * self.events_per_second).min(self.events_per_second)
            }
            _ => 1.0,
        };

        let passes = tokens >= 1.0;
        if passes {
            tokens -= 1.0;
        }
        state.insert(TOKENS.to_owned(), Value::from(tokens));
        state.insert(REFILLED_AT.to_owned(), Value::from(nanos(now)));

        Ok(if passes {
            ActionResponse::PassThrough
        } else {
            ActionResponse::Absorb
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use assert2::check;
    use rollup_event::Event;
    use rstest::rstest;

    use super::{RateLimiter, RateLimiterConfig, RateLimiterMode};
    use crate::{Action, ActionInput, GroupKey, GroupState};

    fn limiter(events_per_second: u32) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            events_per_second,
            when_exceeds: RateLimiterMode::Drop,
        })
        .unwrap()
    }

    /// Feed `events` events at `at` into `state`, returning how many passed.
    fn passed(limiter: &RateLimiter, state: &mut GroupState, at: Duration, events: usize) -> usize {
        let key = GroupKey::global();
        let event = Event::builder().build();
        (0..events)
            .filter(|_| {
                let mut input = ActionInput::new(&key, state, UNIX_EPOCH).with_window_elapsed(at);
                !limiter.handle_event(&event, &mut input).unwrap().is_absorbed()
            })
            .count()
    }

    #[test]
    fn a_burst_gets_one_event_through() {
        let mut state = GroupState::new();
        check!(passed(&limiter(1), &mut state, Duration::ZERO, 5) == 1);
    }

    #[test]
    fn tokens_refill_at_the_configured_rate() {
        let limiter = limiter(10);
        let mut state = GroupState::new();
        check!(passed(&limiter, &mut state, Duration::ZERO, 3) == 1);
        check!(passed(&limiter, &mut state, Duration::from_millis(50), 3) == 0);
        check!(passed(&limiter, &mut state, Duration::from_millis(300), 5) == 3);
    }

    #[test]
    fn idle_time_buys_at_most_one_second_of_events() {
        let limiter = limiter(4);
        let mut state = GroupState::new();
        check!(passed(&limiter, &mut state, Duration::ZERO, 1) == 1);
        check!(passed(&limiter, &mut state, Duration::from_secs(60), 100) == 4);
    }

    #[rstest]
    #[case::zero_rate(0, RateLimiterMode::Drop)]
    #[case::blocking(5, RateLimiterMode::Block)]
    fn rejects_unsupported_settings(#[case] events_per_second: u32, #[case] when_exceeds: RateLimiterMode) {
        let config = RateLimiterConfig {
            events_per_second,
            when_exceeds,
        };
        check!(RateLimiter::new(config).is_err());
    }
}
