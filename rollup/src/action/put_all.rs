// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use rollup_event::{DEFAULT_EVENT_TYPE, Event};

use crate::{Action, ActionError, ActionInput, ActionResponse, ConcludeInput};

/// Merges the top-level fields of every event into one, later values winning.
///
/// Every event is absorbed. Conclusion emits the merged event.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutAll;

impl Action for PutAll {
    fn handle_event(
        &self,
        event: &Event,
        input: &mut ActionInput<'_>,
    ) -> Result<ActionResponse, ActionError> {
        let state = input.state_mut();
        for (key, value) in event.as_map() {
            state.insert(key.clone(), value.clone());
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

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use assert2::{check, let_assert};
    use rollup_event::Event;
    use serde_json::json;

    use super::PutAll;
    use crate::{Action, ActionInput, ActionResponse, ConcludeInput, GroupKey, GroupState};

    #[test]
    fn merges_all_fields_with_later_events_winning() {
        let key = GroupKey::global();
        let mut state = GroupState::new();
        let events = [
            json!({"sourceIp": "127.0.0.1", "status": 200}),
            json!({"sourceIp": "127.0.0.1", "bytes": 1024}),
            json!({"status": 503}),
        ];
        for event in events {
            let event = Event::try_from(event).unwrap();
            let mut input = ActionInput::new(&key, &mut state, UNIX_EPOCH);
            check!(PutAll.handle_event(&event, &mut input).unwrap() == ActionResponse::Absorb);
        }

        let input = ConcludeInput::new(&key, &state, UNIX_EPOCH, UNIX_EPOCH);
        let_assert!(Some(merged) = PutAll.conclude_group(&input).unwrap());
        check!(
            serde_json::Value::Object(merged.into_map())
                == json!({"sourceIp": "127.0.0.1", "status": 503, "bytes": 1024})
        );
    }

    #[test]
    fn empty_groups_emit_nothing() {
        let key = GroupKey::global();
        let state = GroupState::new();
        let input = ConcludeInput::new(&key, &state, UNIX_EPOCH, UNIX_EPOCH);
        check!(PutAll.conclude_group(&input).unwrap() == None);
    }
}
