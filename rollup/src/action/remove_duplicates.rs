// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use rollup_event::{Event, Value};

use crate::{Action, ActionError, ActionInput, ActionResponse};

const SEEN: &str = "aggr._seen";

/// Lets the first event of each window through and absorbs the rest.
///
/// Emits nothing on conclusion.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveDuplicates;

impl Action for RemoveDuplicates {
    fn handle_event(
        &self,
        _event: &Event,
        input: &mut ActionInput<'_>,
    ) -> Result<ActionResponse, ActionError> {
        let state = input.state_mut();
        if state.contains_key(SEEN) {
            return Ok(ActionResponse::Absorb);
        }
        state.insert(SEEN.to_owned(), Value::Bool(true));
        Ok(ActionResponse::PassThrough)
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use assert2::check;
    use rollup_event::Event;

    use super::RemoveDuplicates;
    use crate::{Action, ActionInput, ActionResponse, ConcludeInput, GroupKey, GroupState};

    #[test]
    fn only_the_first_event_passes() {
        let key = GroupKey::global();
        let mut state = GroupState::new();
        let event = Event::builder().field("a", 1).build();

        let mut responses = vec![];
        for _ in 0..3 {
            let mut input = ActionInput::new(&key, &mut state, UNIX_EPOCH);
            responses.push(RemoveDuplicates.handle_event(&event, &mut input).unwrap());
        }
        check!(
            responses
                == [
                    ActionResponse::PassThrough,
                    ActionResponse::Absorb,
                    ActionResponse::Absorb
                ]
        );

        let input = ConcludeInput::new(&key, &state, UNIX_EPOCH, UNIX_EPOCH);
        check!(RemoveDuplicates.conclude_group(&input).unwrap() == None);
    }
}
