// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use rollup_event::{Event, FieldPath, Value};
use serde::Deserialize;

use super::rfc3339;
use crate::{Action, ActionError, ActionInput, ActionResponse, ConcludeInput, ConfigError};

const COUNT: &str = "count";

/// Settings of the `count` action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CountConfig {
    /// Field the count is written to.
    pub count_key: String,
    /// Field the window start is written to, as RFC 3339 text. Left out when unset.
    pub start_time_key: Option<String>,
}

impl Default for CountConfig {
    fn default() -> Self {
        Self {
            count_key: "aggr._count".to_owned(),
            start_time_key: None,
        }
    }
}

/// Counts the events of each group.
///
/// Every event is absorbed. Conclusion emits the group's identification key
/// values together with the count.
#[derive(Debug, Clone)]
pub struct Count {
    count_key: FieldPath,
    start_time_key: Option<FieldPath>,
}

impl Count {
    /// Build the action, parsing the configured field paths.
    pub fn new(config: CountConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            count_key: config.count_key.parse()?,
            start_time_key: config
                .start_time_key
                .as_deref()
                .map(FieldPath::parse)
                .transpose()?,
        })
    }
}

impl Action for Count {
    fn handle_event(
        &self,
        _event: &Event,
        input: &mut ActionInput<'_>,
    ) -> Result<ActionResponse, ActionError> {
        let state = input.state_mut();
        let seen = state.get(COUNT).and_then(Value::as_u64).unwrap_or(0);
        state.insert(COUNT.to_owned(), Value::from(seen + 1));
        Ok(ActionResponse::Absorb)
    }

    fn conclude_group(&self, input: &ConcludeInput<'_>) -> Result<Option<Event>, ActionError> {
        let count = input.state().get(COUNT).and_then(Value::as_u64).unwrap_or(0);
        if count == 0 {
            return Ok(None);
        }

        let mut event = Event::builder().build();
        input.key().write_into(&mut event);
        event.put(&self.count_key, count);
        if let Some(start_time_key) = &self.start_time_key {
            event.put(start_time_key, rfc3339(input.window_start())?);
        }
        Ok(Some(event))
    }
}
