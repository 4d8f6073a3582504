// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use rollup_event::{Event, FieldPath, Value};
use serde::Deserialize;

use super::rfc3339;
use crate::{Action, ActionError, ActionInput, ActionResponse, ConcludeInput, ConfigError, GroupState};

const COUNT: &str = "count";
const SUM: &str = "sum";
const MIN: &str = "min";
const MAX: &str = "max";
const BUCKET_COUNTS: &str = "bucket_counts";

/// Settings of the `histogram` action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistogramConfig {
    /// Field holding the numeric value to record.
    pub key: String,
    /// Upper bounds of the buckets. Sorted before use.
    pub buckets: Vec<f64>,
    /// Units of the recorded values, copied into the output.
    pub units: String,
    /// Also track the smallest and largest value.
    #[serde(default)]
    pub record_minmax: bool,
    /// Prefix of every field the action writes.
    #[serde(default = "default_prefix")]
    pub generated_key_prefix: String,
}

fn default_prefix() -> String {
    "aggr._".to_owned()
}

struct OutputKeys {
    count: FieldPath,
    sum: FieldPath,
    min: FieldPath,
    max: FieldPath,
    buckets: FieldPath,
    bucket_counts: FieldPath,
    start_time: FieldPath,
    duration: FieldPath,
    units: FieldPath,
}

impl OutputKeys {
    fn new(prefix: &str) -> Result<Self, ConfigError> {
        let key = |name: &str| FieldPath::parse(&format!("{prefix}{name}"));
        Ok(Self {
            count: key("count")?,
            sum: key("sum")?,
            min: key("min")?,
            max: key("max")?,
            buckets: key("buckets")?,
            bucket_counts: key("bucket_counts")?,
            start_time: key("start_time")?,
            duration: key("duration")?,
            units: key("units")?,
        })
    }
}

/// Builds a histogram of a numeric field over each window.
///
/// A value lands in the first bucket whose bound is greater than it, or in an
/// extra overflow bucket past the last bound. Every event is absorbed, and
/// events without a numeric value at `key` are otherwise ignored. Conclusion
/// emits the group's identification key values with the count, sum, optional
/// min and max, the bounds, the bucket counts, the window start and its
/// length in milliseconds.
pub struct Histogram {
    key: FieldPath,
    bounds: Vec<f64>,
    units: String,
    record_minmax: bool,
    output: OutputKeys,
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram")
            .field("key", &self.key)
            .field("bounds", &self.bounds)
            .field("units", &self.units)
            .field("record_minmax", &self.record_minmax)
            .finish_non_exhaustive()
    }
}

impl Histogram {
    /// Build the action. Bounds must be finite and there must be at least one.
    pub fn new(config: HistogramConfig) -> Result<Self, ConfigError> {
        let mut bounds = config.buckets;
        if bounds.is_empty() {
            return Err(ConfigError::invalid_value(
                "buckets",
                "at least one bucket bound is required",
            ));
        }
        if bounds.iter().any(|bound| !bound.is_finite()) {
            return Err(ConfigError::invalid_value(
                "buckets",
                "bucket bounds must be finite",
            ));
        }
        bounds.sort_by(f64::total_cmp);

        Ok(Self {
            key: config.key.parse()?,
            bounds,
            units: config.units,
            record_minmax: config.record_minmax,
            output: OutputKeys::new(&config.generated_key_prefix)?,
        })
    }

    fn bucket(&self, value: f64) -> usize {
        self.bounds.partition_point(|bound| *bound <= value)
    }
}

fn number(state: &GroupState, key: &str) -> Option<f64> {
    state.get(key).and_then(Value::as_f64)
}

impl Action for Histogram {
    fn handle_event(
        &self,
        event: &Event,
        input: &mut ActionInput<'_>,
    ) -> Result<ActionResponse, ActionError> {
        let Some(value) = event.get(&self.key).and_then(Value::as_f64) else {
            return Ok(ActionResponse::Absorb);
        };
        let bucket = self.bucket(value);
        let state = input.state_mut();

        // JSON cannot hold an infinite sum, so refuse the event before touching the state
        let sum = number(state, SUM).unwrap_or(0.0) + value;
        if !sum.is_finite() {
            return Err(ActionError::new(format!(
                "histogram sum overflows after recording {value}"
            )));
        }
        let count = state.get(COUNT).and_then(Value::as_u64).unwrap_or(0) + 1;
        state.insert(COUNT.to_owned(), Value::from(count));
        state.insert(SUM.to_owned(), Value::from(sum));
        if self.record_minmax {
            let min = number(state, MIN).map_or(value, |min| min.min(value));
            let max = number(state, MAX).map_or(value, |max| max.max(value));
            state.insert(MIN.to_owned(), Value::from(min));
            state.insert(MAX.to_owned(), Value::from(max));
        }

        let counts = state
            .entry(BUCKET_COUNTS)
            .or_insert_with(|| Value::from(vec![0_u64; self.bounds.len() + 1]));
        if let Some(slot) = counts.as_array_mut().and_then(|counts| counts.get_mut(bucket)) {
            *slot = Value::from(slot.as_u64().unwrap_or(0) + 1);
        }
        Ok(ActionResponse::Absorb)
    }

    fn conclude_group(&self, input: &ConcludeInput<'_>) -> Result<Option<Event>, ActionError> {
        let state = input.state();
        let count = state.get(COUNT).and_then(Value::as_u64).unwrap_or(0);
        if count == 0 {
            return Ok(None);
        }

        let duration = input
            .concluded_at()
            .duration_since(input.window_start())
            .unwrap_or_default();

        let mut event = Event::builder().build();
        input.key().write_into(&mut event);
        event.put(&self.output.count, count);
        event.put(&self.output.sum, number(state, SUM).unwrap_or(0.0));
        if self.record_minmax {
            event.put(&self.output.min, state.get(MIN).cloned().unwrap_or(Value::Null));
            event.put(&self.output.max, state.get(MAX).cloned().unwrap_or(Value::Null));
        }
        event.put(&self.output.buckets, self.bounds.clone());
        event.put(
            &self.output.bucket_counts,
            state.get(BUCKET_COUNTS).cloned().unwrap_or(Value::Null),
        );
        event.put(&self.output.start_time, rfc3339(input.window_start())?);
        event.put(&self.output.duration, duration.as_millis() as u64);
        event.put(&self.output.units, self.units.as_str());
        Ok(Some(event))
    }
}
