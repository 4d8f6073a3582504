// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::BTreeSet, time::SystemTime};

use serde_json::{Map, Value};

use crate::FieldPath;

/// Default event type for events that are not given one explicitly.
pub const DEFAULT_EVENT_TYPE: &str = "event";

/// Metadata carried alongside an [`Event`]'s payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMetadata {
    event_type: String,
    time_received: SystemTime,
    tags: BTreeSet<String>,
}

impl EventMetadata {
    /// The type of the event, for example `"log"` or `"event"`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// When the event entered the pipeline.
    pub fn time_received(&self) -> SystemTime {
        self.time_received
    }

    /// Tags attached to the event.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Returns `true` if the event carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Attach `tag` to the event. Tags are a set, adding one twice is a no-op.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }
}

/// A single event flowing through the pipeline: a JSON object and its metadata.
///
/// Events are plain owned values. They are `Clone` so that an aggregation
/// step can keep a copy of a payload while the original continues downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    data: Map<String, Value>,
    metadata: EventMetadata,
}

impl Event {
    /// Start building a new event.
    pub fn builder() -> EventBuilder {
        EventBuilder::default()
    }

    /// Create an event of type `event_type` with `data` as its payload.
    pub fn from_map(event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self::builder().event_type(event_type).data(data).build()
    }

    /// Read the value at `path`, or `None` if any part of the path is absent.
    ///
    /// A segment that parses as an integer also indexes into arrays.
    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        let mut segments = path.segments();
        let mut current = self.data.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns `true` if there is a value at `path`. An explicit JSON `null` counts as present.
    pub fn contains(&self, path: &FieldPath) -> bool {
        self.get(path).is_some()
    }

    /// Write `value` at `path`, creating intermediate objects as needed.
    ///
    /// Intermediate values that are not objects are replaced.
    pub fn put(&mut self, path: &FieldPath, value: impl Into<Value>) {
        let Some((leaf, parents)) = path.split_leaf() else {
            return;
        };
        let mut current = &mut self.data;
        for segment in parents {
            current = child_object(current, segment);
        }
        current.insert(leaf.clone(), value.into());
    }

    /// Remove and return the value at `path`.
    pub fn delete(&mut self, path: &FieldPath) -> Option<Value> {
        let (leaf, parents) = path.split_leaf()?;
        let mut current = &mut self.data;
        for segment in parents {
            current = current.get_mut(segment)?.as_object_mut()?;
        }
        current.remove(leaf)
    }

    /// Remove every field from the payload. Metadata is kept.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Copy every top-level field of `other` into this event, overwriting on conflict.
    pub fn merge(&mut self, other: &Map<String, Value>) {
        for (key, value) in other {
            self.data.insert(key.clone(), value.clone());
        }
    }

    /// The payload as a JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Consume the event, returning its payload.
    pub fn into_map(self) -> Map<String, Value> {
        self.data
    }

    /// Serialize the payload as compact JSON.
    pub fn to_json_string(&self) -> String {
        Value::Object(self.data.clone()).to_string()
    }

    /// The event's metadata.
    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Mutable access to the event's metadata.
    pub fn metadata_mut(&mut self) -> &mut EventMetadata {
        &mut self.metadata
    }
}

fn child_object<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let slot = map
        .entry(key.to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(child) => child,
        _ => unreachable!("slot was just replaced with an object"),
    }
}

impl From<Map<String, Value>> for Event {
    fn from(data: Map<String, Value>) -> Self {
        Self::from_map(DEFAULT_EVENT_TYPE, data)
    }
}

impl TryFrom<Value> for Event {
    type Error = Value;

    /// Build an event from a JSON object. Any other JSON value is handed back unchanged.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(data) => Ok(data.into()),
            other => Err(other),
        }
    }
}

/// Builder for [`Event`], see [`Event::builder`].
#[derive(Debug, Default)]
pub struct EventBuilder {
    event_type: Option<String>,
    data: Map<String, Value>,
    time_received: Option<SystemTime>,
    tags: BTreeSet<String>,
}

impl EventBuilder {
    /// Set the event type. Defaults to [`DEFAULT_EVENT_TYPE`].
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Replace the payload.
    pub fn data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Set a single top-level field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Set the time the event was received. Defaults to the time [`build`](Self::build) is called.
    pub fn time_received(mut self, time: SystemTime) -> Self {
        self.time_received = Some(time);
        self
    }

    /// Attach a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Build the event.
    pub fn build(self) -> Event {
        Event {
            data: self.data,
            metadata: EventMetadata {
                event_type: self
                    .event_type
                    .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_owned()),
                time_received: self.time_received.unwrap_or_else(SystemTime::now),
                tags: self.tags,
            },
        }
    }
}
