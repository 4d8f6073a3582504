// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod event;
mod path;

pub use event::{DEFAULT_EVENT_TYPE, Event, EventBuilder, EventMetadata};
pub use path::{FieldPath, PathError, PathErrorKind};

pub use serde_json::{Map, Value};
