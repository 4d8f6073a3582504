// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use metrique::{timers::Timer, unit_of_work::metrics, writer::BoxEntrySink};
use metrique_timesource::TimeSource;
use rollup_event::{Event, FieldPath};
use tracing::{debug, info, trace};

use crate::{
    Action, ActionRegistry, ActionSynchronizer, AggregateProcessorConfig, ConfigError, Group,
    GroupKey, GroupRegistry, KeyHasher,
    synchronizer::{Conclusion, Handled},
};

#[metrics(rename_all = "PascalCase")]
#[derive(Default)]
struct BatchMetrics {
    records_in: usize,
    records_out: usize,
    action_handle_events_out: usize,
    action_handle_events_dropped: usize,
    action_conclude_group_events_out: usize,
    action_conclude_group_events_dropped: usize,
    action_handle_event_errors: usize,
    action_conclude_group_errors: usize,
    time: Timer,
}

/// Groups concluded by one sweep. Groups another sweep got to first are not counted.
#[derive(Debug, Default)]
struct Concluded {
    events: Vec<Event>,
    dropped: usize,
    errors: usize,
}

/// Groups events into windows and runs an [`Action`] on each group.
///
/// This is the driver around the engine: every batch passed to
/// [`execute`](Self::execute) is routed to its groups, and every group whose
/// window has elapsed is concluded at the end of the batch. `execute` may be
/// called from many threads at once.
///
/// ```
/// use rollup::{ActionConfig, AggregateProcessor, AggregateProcessorConfig};
/// use rollup_event::Event;
///
/// let config = AggregateProcessorConfig::new(["user"], ActionConfig::new("remove_duplicates"));
/// let processor = AggregateProcessor::builder(config).build().unwrap();
///
/// let events = ["alice", "bob", "alice"]
///     .map(|user| Event::builder().field("user", user).build());
/// assert_eq!(processor.execute(events).len(), 2);
/// ```
pub struct AggregateProcessor {
    key_hasher: KeyHasher,
    registry: Arc<GroupRegistry>,
    synchronizer: ActionSynchronizer,
    window_duration: Duration,
    output_unaggregated_events: bool,
    aggregated_events_tag: Option<String>,
    force_conclude: AtomicBool,
    metrics_sink: BoxEntrySink,
}

impl std::fmt::Debug for AggregateProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateProcessor")
            .field("key_hasher", &self.key_hasher)
            .field("window_duration", &self.window_duration)
            .field("output_unaggregated_events", &self.output_unaggregated_events)
            .field("aggregated_events_tag", &self.aggregated_events_tag)
            .field("force_conclude", &self.force_conclude)
            .finish_non_exhaustive()
    }
}

impl AggregateProcessor {
    /// Start building a processor from `config`.
    pub fn builder(config: AggregateProcessorConfig) -> AggregateProcessorBuilder {
        AggregateProcessorBuilder {
            config,
            time_source: None,
            metrics_sink: None,
            actions: None,
            action: None,
        }
    }

    /// Process one batch of events and return the events to pass downstream.
    ///
    /// Each event is handed to the action of its group. Afterwards every
    /// expired group (every group, after [`prepare_for_shutdown`](Self::prepare_for_shutdown))
    /// is concluded and the resulting events are appended to the output.
    pub fn execute(&self, events: impl IntoIterator<Item = Event>) -> Vec<Event> {
        let mut metrics = BatchMetrics::default().append_on_drop(self.metrics_sink.clone());
        let mut output = Vec::new();

        for event in events {
            metrics.records_in += 1;
            let key = self.key_hasher.derive_key(&event);
            let group = self.registry.get_or_create(&key);
            let Handled { response, failed } = self.synchronizer.handle(&event, &key, group);
            trace!(key = key.fingerprint(), ?response, "handled event");
            if failed {
                metrics.action_handle_event_errors += 1;
            }

            if self.output_unaggregated_events {
                if response.is_absorbed() {
                    metrics.action_handle_events_dropped += 1;
                } else {
                    metrics.action_handle_events_out += 1;
                }
                output.push(event);
                continue;
            }
            match response.resolve(event) {
                Some(event) => {
                    metrics.action_handle_events_out += 1;
                    output.push(event);
                }
                None => metrics.action_handle_events_dropped += 1,
            }
        }

        let concluded = self.conclude_groups();
        metrics.action_conclude_group_events_out += concluded.events.len();
        metrics.action_conclude_group_events_dropped += concluded.dropped;
        metrics.action_conclude_group_errors += concluded.errors;
        output.extend(concluded.events);
        metrics.records_out = output.len();
        output
    }

    /// Conclude every expired group (or every group, when shutting down) without handling new events.
    pub fn sweep(&self) -> Vec<Event> {
        self.conclude_groups().events
    }

    /// Conclude every group on the next sweep, regardless of its age.
    pub fn prepare_for_shutdown(&self) {
        info!(groups = self.registry.len(), "concluding all groups for shutdown");
        self.force_conclude.store(true, Ordering::Release);
    }

    /// Returns `true` once no group is left to conclude.
    pub fn is_ready_for_shutdown(&self) -> bool {
        self.registry.is_empty()
    }

    /// The identification keys groups are formed by.
    pub fn identification_keys(&self) -> &[FieldPath] {
        self.key_hasher.identification_keys()
    }

    /// The synchronizer coordinating this processor's groups.
    pub fn synchronizer(&self) -> &ActionSynchronizer {
        &self.synchronizer
    }

    fn conclude_groups(&self) -> Concluded {
        let mut concluded = Concluded::default();
        let mut conclude = |key: &GroupKey, group: &Arc<Group>| {
            match self.synchronizer.try_conclude(key, group) {
                Conclusion::Concluded(Some(mut event)) => {
                    if let Some(tag) = &self.aggregated_events_tag {
                        event.metadata_mut().add_tag(tag.clone());
                    }
                    concluded.events.push(event);
                }
                Conclusion::Concluded(None) => concluded.dropped += 1,
                Conclusion::Failed => {
                    concluded.dropped += 1;
                    concluded.errors += 1;
                }
                Conclusion::Skipped => {}
            }
        };

        if self.force_conclude.load(Ordering::Acquire) {
            self.registry.for_each(&mut conclude);
        } else {
            self.registry
                .for_each_expired(self.window_duration, self.registry.now(), &mut conclude);
        }

        if !concluded.events.is_empty() || concluded.dropped > 0 {
            debug!(
                emitted = concluded.events.len(),
                dropped = concluded.dropped,
                "concluded groups"
            );
        }
        concluded
    }
}

/// Builder for [`AggregateProcessor`], see [`AggregateProcessor::builder`].
pub struct AggregateProcessorBuilder {
    config: AggregateProcessorConfig,
    time_source: Option<TimeSource>,
    metrics_sink: Option<BoxEntrySink>,
    actions: Option<ActionRegistry>,
    action: Option<Arc<dyn Action>>,
}

impl AggregateProcessorBuilder {
    /// Time source for window starts and expiry. Defaults to the system clock.
    pub fn time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = Some(time_source);
        self
    }

    /// Sink receiving one metrics entry per batch. Defaults to discarding them.
    pub fn metrics_sink(mut self, sink: BoxEntrySink) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    /// Registry the configured action is looked up in. Defaults to [`ActionRegistry::builtin`].
    pub fn action_registry(mut self, actions: ActionRegistry) -> Self {
        self.actions = Some(actions);
        self
    }

    /// Use `action` instead of building one from the configuration.
    pub fn action(mut self, action: Arc<dyn Action>) -> Self {
        self.action = Some(action);
        self
    }

    /// Validate the configuration and build the processor.
    pub fn build(self) -> Result<AggregateProcessor, ConfigError> {
        let Self {
            config,
            time_source,
            metrics_sink,
            actions,
            action,
        } = self;
        config.validate()?;

        let action = match action {
            Some(action) => action,
            None => actions.unwrap_or_default().build(&config.action)?,
        };
        let registry = Arc::new(GroupRegistry::new(time_source.unwrap_or_default()));

        debug!(
            identification_keys = ?config.identification_keys,
            window_duration = ?config.window_duration,
            action = config.action.name(),
            "built aggregate processor"
        );
        Ok(AggregateProcessor {
            key_hasher: config.key_hasher()?,
            synchronizer: ActionSynchronizer::new(action, Arc::clone(&registry)),
            registry,
            window_duration: config.window_duration,
            output_unaggregated_events: config.output_unaggregated_events,
            aggregated_events_tag: config.aggregated_events_tag,
            force_conclude: AtomicBool::new(false),
            metrics_sink: metrics_sink
                .unwrap_or_else(metrique::writer::sink::DevNullSink::boxed),
        })
    }
}
