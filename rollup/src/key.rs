// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Group keys and the hasher that derives them from events.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use rollup_event::{Event, FieldPath, Value};

use crate::ConfigError;

// Fixed so that fingerprints of the same key agree between runs of the same build.
const FINGERPRINT_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// The value a [`GroupKey`] holds for one identification key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    /// The event did not have the field. All such events share this value.
    Missing,
    /// The value the event had at the field. JSON `null` is a present value.
    Present(Value),
}

impl KeyValue {
    /// The present value, if any.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            KeyValue::Missing => None,
            KeyValue::Present(value) => Some(value),
        }
    }
}

// serde_json numbers cannot hold NaN, so value equality is an equivalence relation
impl Eq for KeyValue {}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            KeyValue::Missing => state.write_u8(0),
            KeyValue::Present(value) => {
                state.write_u8(1);
                hash_value(value, state);
            }
        }
    }
}

/// Hash a JSON value consistently with its `PartialEq` implementation.
///
/// Object members are visited in sorted key order, so two objects that compare
/// equal hash equally whatever order their members were inserted in.
fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => state.write_u8(0),
        Value::Bool(b) => {
            state.write_u8(1);
            b.hash(state);
        }
        Value::Number(n) => {
            state.write_u8(2);
            // `1` and `1.0` are unequal, `0.0` and `-0.0` are equal
            if let Some(u) = n.as_u64() {
                state.write_u8(0);
                state.write_u64(u);
            } else if let Some(i) = n.as_i64() {
                state.write_u8(1);
                state.write_i64(i);
            } else if let Some(f) = n.as_f64() {
                state.write_u8(2);
                let f = if f == 0.0 { 0.0 } else { f };
                state.write_u64(f.to_bits());
            }
        }
        Value::String(s) => {
            state.write_u8(3);
            s.hash(state);
        }
        Value::Array(items) => {
            state.write_u8(4);
            state.write_usize(items.len());
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            state.write_u8(5);
            state.write_usize(map.len());
            let mut members: Vec<_> = map.iter().collect();
            members.sort_unstable_by(|a, b| a.0.cmp(b.0));
            for (key, value) in members {
                key.hash(state);
                hash_value(value, state);
            }
        }
    }
}

/// Identity of an aggregation group.
///
/// One `(path, value)` pair per configured identification key, in
/// configuration order. Keys are cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    fields: Arc<[(FieldPath, KeyValue)]>,
}

impl GroupKey {
    /// The key of the single group used when no identification keys are configured.
    pub fn global() -> Self {
        Self {
            fields: Arc::from([]),
        }
    }

    /// Build a key directly from its fields.
    pub fn from_fields(fields: impl IntoIterator<Item = (FieldPath, KeyValue)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// The fields of this key, in configuration order.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = (&FieldPath, &KeyValue)> + '_ {
        self.fields.iter().map(|(path, value)| (path, value))
    }

    /// The value this key holds for `path`, or `None` if `path` is not an identification key.
    pub fn get(&self, path: &FieldPath) -> Option<&KeyValue> {
        self.fields
            .iter()
            .find(|(candidate, _)| candidate == path)
            .map(|(_, value)| value)
    }

    /// Returns `true` for the key of the global group.
    pub fn is_global(&self) -> bool {
        self.fields.is_empty()
    }

    /// Write every present key value into `event` at its path.
    ///
    /// Used by actions that emit one event per group and want the group's
    /// identity in it. Missing values are left out.
    pub fn write_into(&self, event: &mut Event) {
        for (path, value) in self.fields.iter() {
            if let KeyValue::Present(value) = value {
                event.put(path, value.clone());
            }
        }
    }

    /// A hash of this key that is stable across runs of the same build.
    ///
    /// Meant for correlating log lines about the same group, not for equality.
    pub fn fingerprint(&self) -> u64 {
        let [k0, k1, k2, k3] = FINGERPRINT_SEEDS;
        ahash::RandomState::with_seeds(k0, k1, k2, k3).hash_one(self)
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (path, value) in self.fields.iter() {
            match value {
                KeyValue::Missing => map.entry(&format_args!("{path}"), &format_args!("<missing>")),
                KeyValue::Present(value) => map.entry(&format_args!("{path}"), &format_args!("{value}")),
            };
        }
        map.finish()
    }
}

/// Derives [`GroupKey`]s from events.
///
/// The identification keys are parsed once when the hasher is built and stay
/// fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct KeyHasher {
    paths: Arc<[FieldPath]>,
}

impl KeyHasher {
    /// Build a hasher from identification key names.
    ///
    /// Fails if any name is not a valid [`FieldPath`].
    pub fn new<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths = names
            .into_iter()
            .map(|name| FieldPath::parse(name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_paths(paths))
    }

    /// Build a hasher from already parsed paths.
    pub fn from_paths(paths: impl IntoIterator<Item = FieldPath>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }

    /// The identification keys, in configuration order.
    pub fn identification_keys(&self) -> &[FieldPath] {
        &self.paths
    }

    /// Derive the key of the group `event` belongs to.
    pub fn derive_key(&self, event: &Event) -> GroupKey {
        if self.paths.is_empty() {
            return GroupKey::global();
        }
        GroupKey::from_fields(self.paths.iter().map(|path| {
            let value = match event.get(path) {
                Some(value) => KeyValue::Present(value.clone()),
                None => KeyValue::Missing,
            };
            (path.clone(), value)
        }))
    }
}
