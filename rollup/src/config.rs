// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;

use crate::{ConfigError, KeyHasher};

/// Window length used when none is configured.
pub const DEFAULT_WINDOW_DURATION: Duration = Duration::from_secs(180);

/// Configuration of an [`AggregateProcessor`](crate::AggregateProcessor).
///
/// Usually read from TOML:
///
/// ```
/// use rollup::AggregateProcessorConfig;
/// use std::time::Duration;
///
/// let config = AggregateProcessorConfig::from_toml_str(r#"
///     identification_keys = ["service", "/http/status"]
///     window_duration = "30s"
///     action = { count = { count_key = "requests" } }
/// "#).unwrap();
///
/// assert_eq!(config.window_duration, Duration::from_secs(30));
/// assert_eq!(config.action.name(), "count");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateProcessorConfig {
    /// Field paths whose values identify a group. Empty puts every event in one group.
    pub identification_keys: Vec<String>,
    /// How long a group accumulates before it is concluded.
    ///
    /// Either integer seconds or text such as `"180s"`, `"3m"` or `"PT3M"`.
    #[serde(
        default = "default_window_duration",
        alias = "group_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub window_duration: Duration,
    /// The action to run on each group.
    pub action: ActionConfig,
    /// Emit every input event unchanged, in addition to conclusion events.
    #[serde(default)]
    pub output_unaggregated_events: bool,
    /// Tag added to every event produced by a conclusion.
    #[serde(default)]
    pub aggregated_events_tag: Option<String>,
}

fn default_window_duration() -> Duration {
    DEFAULT_WINDOW_DURATION
}

impl AggregateProcessorConfig {
    /// A configuration with the given keys and action and defaults for everything else.
    pub fn new<S: Into<String>>(
        identification_keys: impl IntoIterator<Item = S>,
        action: ActionConfig,
    ) -> Self {
        Self {
            identification_keys: identification_keys.into_iter().map(Into::into).collect(),
            window_duration: DEFAULT_WINDOW_DURATION,
            action,
            output_unaggregated_events: false,
            aggregated_events_tag: None,
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without building the action.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_duration.is_zero() {
            return Err(ConfigError::invalid_value(
                "window_duration",
                "must be greater than zero",
            ));
        }
        if self.aggregated_events_tag.as_deref() == Some("") {
            return Err(ConfigError::invalid_value(
                "aggregated_events_tag",
                "must not be empty",
            ));
        }
        self.key_hasher()?;
        Ok(())
    }

    /// Build the [`KeyHasher`] for [`Self::identification_keys`].
    pub fn key_hasher(&self) -> Result<KeyHasher, ConfigError> {
        KeyHasher::new(&self.identification_keys)
    }
}

/// Parse a window duration such as `"180s"`, `"3m 30s"` or `"PT3M"`.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let signed: jiff::SignedDuration = text
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(text.to_owned()))?;
    Duration::try_from(signed).map_err(|_| ConfigError::InvalidDuration(text.to_owned()))
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Selects an action by name, together with its settings.
///
/// Deserializes from either a bare name, `action = "remove_duplicates"`, or a
/// table with exactly one entry mapping the name to its settings,
/// `action = { count = { count_key = "n" } }`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionConfig {
    name: String,
    settings: Value,
}

impl ActionConfig {
    /// An action with no settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, Value::Null)
    }

    /// An action with settings, given as a JSON object.
    pub fn with_settings(name: impl Into<String>, settings: Value) -> Self {
        Self {
            name: name.into(),
            settings,
        }
    }

    /// The action's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw settings. `Null` when none were given.
    pub fn raw_settings(&self) -> &Value {
        &self.settings
    }

    /// Deserialize the settings into an action's own configuration type.
    ///
    /// Missing settings deserialize as an empty table, so types with defaults
    /// for every field accept a bare action name.
    pub fn settings<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let settings = match &self.settings {
            Value::Null => Value::Object(Default::default()),
            settings => settings.clone(),
        };
        serde_json::from_value(settings).map_err(|source| ConfigError::InvalidActionSettings {
            action: self.name.clone(),
            source,
        })
    }
}

impl<'de> Deserialize<'de> for ActionConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawAction {
            Name(String),
            Table(BTreeMap<String, Value>),
        }

        match RawAction::deserialize(deserializer)? {
            RawAction::Name(name) => Ok(Self::new(name)),
            RawAction::Table(table) => {
                let mut entries = table.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((name, settings)), None) => Ok(Self::with_settings(name, settings)),
                    _ => Err(serde::de::Error::custom(
                        "an action table must have exactly one entry, naming the action",
                    )),
                }
            }
        }
    }
}
