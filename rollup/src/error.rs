// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{any::Any, borrow::Cow, error::Error, fmt};

use rollup_event::PathError;

/// Errors raised while building an aggregation engine from configuration.
///
/// All of these are fatal to startup. None of them can happen while events
/// are being processed.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A configured field path is malformed.
    InvalidFieldPath(PathError),
    /// No action is registered under this name.
    UnknownAction(String),
    /// The settings for an action could not be deserialized.
    InvalidActionSettings {
        /// The name of the action
        action: String,
        /// The underlying deserialization error
        source: serde_json::Error,
    },
    /// A duration could not be parsed.
    InvalidDuration(String),
    /// A setting has a value outside of what is accepted.
    InvalidValue {
        /// The setting's name
        field: &'static str,
        /// Why the value was rejected
        reason: Cow<'static, str>,
    },
    /// The configuration document is not valid TOML or does not match the expected shape.
    Toml(toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid_value(field: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFieldPath(err) => fmt::Display::fmt(err, f),
            Self::UnknownAction(name) => write!(f, "no aggregate action named `{name}` is registered"),
            Self::InvalidActionSettings { action, source } => {
                write!(f, "invalid settings for aggregate action `{action}`: {source}")
            }
            Self::InvalidDuration(text) => write!(f, "`{text}` is not a valid duration"),
            Self::InvalidValue { field, reason } => write!(f, "invalid value for `{field}`: {reason}"),
            Self::Toml(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidFieldPath(err) => Some(err),
            Self::InvalidActionSettings { source, .. } => Some(source),
            Self::Toml(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PathError> for ConfigError {
    fn from(value: PathError) -> Self {
        Self::InvalidFieldPath(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(value)
    }
}

/// Error returned by an [`Action`](crate::Action).
///
/// Action errors never escape the engine: a failed `handle_event` passes the
/// original event through, and a failed `conclude_group` discards the window's
/// result. See [`ActionSynchronizer`](crate::ActionSynchronizer).
#[derive(Debug)]
pub struct ActionError {
    message: Cow<'static, str>,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl ActionError {
    /// Create an error with a message.
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error with a message and an underlying cause.
    pub fn with_source(
        message: impl Into<Cow<'static, str>>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(message) = payload.downcast_ref::<&'static str>() {
            Cow::Borrowed(*message)
        } else if let Some(message) = payload.downcast_ref::<String>() {
            Cow::Owned(message.clone())
        } else {
            Cow::Borrowed("unknown panic payload")
        };
        Self::new(format!("action panicked: {detail}"))
    }

    /// The error message, without the cause.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl Error for ActionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn Error + 'static))
    }
}
