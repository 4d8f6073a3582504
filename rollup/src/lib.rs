// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod action;
mod config;
mod error;
mod group;
mod key;
mod processor;
mod registry;
mod synchronizer;

pub use action::{
    Action, ActionInput, ActionResponse, ConcludeInput, registry::ActionFactory,
    registry::ActionRegistry,
};
pub use config::{
    ActionConfig, AggregateProcessorConfig, DEFAULT_WINDOW_DURATION, parse_duration,
};
pub use error::{ActionError, ConfigError};
pub use group::{Group, GroupState};
pub use key::{GroupKey, KeyHasher, KeyValue};
pub use processor::{AggregateProcessor, AggregateProcessorBuilder};
pub use registry::GroupRegistry;
pub use synchronizer::{ActionSynchronizer, SynchronizerStats};
