// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use rollup_event::{Event, Value};
use serde::Deserialize;

use crate::{Action, ActionError, ActionInput, ActionResponse, ConfigError};

const SEEN: &str = "seen";
const ALLOWED: &str = "allowed";

/// Settings of the `percent_sampler` action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PercentSamplerConfig {
    /// Share of each group's events to let through, in `(0, 100]`.
    pub percent: f64,
}

/// Lets a fixed share of each group's events through and absorbs the rest.
///
/// Sampling is deterministic: an event passes when letting it through keeps
/// the group's pass rate at or below the configured percentage.
#[derive(Debug, Clone)]
pub struct PercentSampler {
    percent: f64,
}

impl PercentSampler {
    /// Build the action.
    pub fn new(config: PercentSamplerConfig) -> Result<Self, ConfigError> {
        if !(config.percent > 0.0 && config.percent <= 100.0) {
            return Err(ConfigError::invalid_value(
                "percent",
                "must be greater than 0 and at most 100",
            ));
        }
        Ok(Self {
            percent: config.percent,
        })
    }
}

impl Action for PercentSampler {
    fn handle_event(
        &self,
        _event: &Event,
        input: &mut ActionInput<'_>,
    ) -> Result<ActionResponse, ActionError> {
        let state = input.state_mut();
        let seen = state.get(SEEN).and_then(Value::as_u64).unwrap_or(0) + 1;
        let allowed = state.get(ALLOWED).and_then(Value::as_u64).unwrap_or(0);
        state.insert(SEEN.to_owned(), Value::from(seen));

        if (allowed + 1) as f64 / seen as f64 * 100.0 <= self.percent {
            state.insert(ALLOWED.to_owned(), Value::from(allowed + 1));
            return Ok(ActionResponse::PassThrough);
        }
        Ok(ActionResponse::Absorb)
    }
}
