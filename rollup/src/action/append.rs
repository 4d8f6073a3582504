// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use rollup_event::{DEFAULT_EVENT_TYPE, Event, Value};
use serde::Deserialize;

use crate::{Action, ActionError, ActionInput, ActionResponse, ConcludeInput};

/// Settings of the `append` action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppendConfig {
    /// Top-level fields whose values are collected. Empty collects every field.
    pub keys_to_append: Vec<String>,
}

/// Collects the values of selected fields across a window.
///
/// The first event of a window becomes the group's state. For each later
/// event and each selected field already in the state: list values are
/// extended, and a value that differs from the stored one turns the field into
/// a list of both. Every event is absorbed. Conclusion emits the state.
#[derive(Debug, Clone, Default)]
pub struct Append {
    keys: HashSet<String>,
}

impl Append {
    /// Build the action.
    pub fn new(config: AppendConfig) -> Self {
        Self {
            keys: config.keys_to_append.into_iter().collect(),
        }
    }

    fn appends(&self, key: &str) -> bool {
        self.keys.is_empty() || self.keys.contains(key)
    }
}

impl Action for Append {
    fn handle_event(
        &self,
        event: &Event,
        input: &mut ActionInput<'_>,
    ) -> Result<ActionResponse, ActionError> {
        let state = input.state_mut();
        if state.is_empty() {
            state.extend(event.as_map().clone());
            return Ok(ActionResponse::Absorb);
        }

        for (key, value) in event.as_map() {
            if !self.appends(key) {
                continue;
            }
            let Some(current) = state.get_mut(key) else {
                continue;
            };
            match (current, value) {
                (Value::Array(items), Value::Array(more)) => items.extend(more.iter().cloned()),
                (Value::Array(items), value) => items.push(value.clone()),
                (current, value) if current != value => {
                    let previous = current.take();
                    *current = Value::Array(vec![previous, value.clone()]);
                }
                _ => {}
            }
        }
        Ok(ActionResponse::Absorb)
    }

    fn conclude_group(&self, input: &ConcludeInput<'_>) -> Result<Option<Event>, ActionError> {
        if input.state().is_empty() {
            return Ok(None);
        }
        Ok(Some(Event::from_map(
            DEFAULT_EVENT_TYPE,
            input.state().clone(),
        )))
    }
}
