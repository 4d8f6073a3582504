// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Name to constructor mapping used to build actions from configuration.

use std::{collections::HashMap, fmt, sync::Arc};

use serde::Deserialize;

use super::{Append, Count, Histogram, PercentSampler, PutAll, RateLimiter, RemoveDuplicates};
use crate::{Action, ActionConfig, ConfigError};

/// Builds an action from its configuration.
pub type ActionFactory =
    Box<dyn Fn(&ActionConfig) -> Result<Arc<dyn Action>, ConfigError> + Send + Sync>;

/// Explicit registry of the actions that can be named in configuration.
///
/// ```
/// use rollup::{ActionConfig, action::{PutAll, registry::ActionRegistry}};
/// use std::sync::Arc;
///
/// let mut registry = ActionRegistry::builtin();
/// registry.register("merge", |_| Ok(Arc::new(PutAll)));
/// assert!(registry.build(&ActionConfig::new("merge")).is_ok());
/// assert!(registry.build(&ActionConfig::new("missing")).is_err());
/// ```
pub struct ActionRegistry {
    factories: HashMap<String, ActionFactory>,
}

impl ActionRegistry {
    /// A registry with no actions.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every built-in action.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry
            .register("remove_duplicates", |config| {
                config.settings::<NoSettings>()?;
                Ok(Arc::new(RemoveDuplicates))
            })
            .register("put_all", |config| {
                config.settings::<NoSettings>()?;
                Ok(Arc::new(PutAll))
            })
            .register("count", |config| Ok(Arc::new(Count::new(config.settings()?)?)))
            .register("append", |config| Ok(Arc::new(Append::new(config.settings()?))))
            .register("histogram", |config| {
                Ok(Arc::new(Histogram::new(config.settings()?)?))
            })
            .register("percent_sampler", |config| {
                Ok(Arc::new(PercentSampler::new(config.settings()?)?))
            })
            .register("rate_limiter", |config| {
                Ok(Arc::new(RateLimiter::new(config.settings()?)?))
            });
        registry
    }

    /// Register `factory` under `name`, replacing any action already registered under it.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ActionConfig) -> Result<Arc<dyn Action>, ConfigError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Names of every registered action, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the action selected by `config`.
    pub fn build(&self, config: &ActionConfig) -> Result<Arc<dyn Action>, ConfigError> {
        let factory = self
            .factories
            .get(config.name())
            .ok_or_else(|| ConfigError::UnknownAction(config.name().to_owned()))?;
        factory(config)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Settings of actions that take none. Rejects any key.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoSettings {}
