// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::HashSet,
    sync::Arc,
    thread,
    time::{Duration, UNIX_EPOCH},
};

use assert2::{check, let_assert};
use metrique::test_util::{TestEntrySink, test_entry_sink};
use metrique_timesource::{TimeSource, fakes::ManuallyAdvancedTimeSource};
use rand::seq::SliceRandom;
use rollup::{
    Action, ActionConfig, ActionError, ActionInput, ActionRegistry, ActionResponse,
    AggregateProcessor, AggregateProcessorConfig, ConcludeInput,
};
use rollup_event::{Event, Value};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 200 events over the 8 combinations of three boolean-ish fields, shuffled.
fn network_events() -> Vec<Event> {
    let mut events: Vec<_> = (0..200)
        .map(|i| {
            let raw = json!({
                "sourceIp": format!("10.0.0.{}", i % 2),
                "destinationIp": format!("10.0.1.{}", (i / 2) % 2),
                "status": 200 + 100 * ((i / 4) % 2),
                "sequence": i,
            });
            Event::try_from(raw).unwrap()
        })
        .collect();
    events.shuffle(&mut rand::rng());
    events
}

fn key_of(event: &Event) -> (Value, Value, Value) {
    let map = event.as_map();
    (
        map["sourceIp"].clone(),
        map["destinationIp"].clone(),
        map["status"].clone(),
    )
}

/// Run `events` through `processor` from 100 threads at once, two events per call.
fn execute_concurrently(processor: &AggregateProcessor, events: Vec<Event>) -> Vec<Event> {
    let batches: Vec<Vec<Event>> = events.chunks(2).map(<[Event]>::to_vec).collect();
    check!(batches.len() == 100);
    thread::scope(|s| {
        batches
            .into_iter()
            .map(|batch| s.spawn(move || processor.execute(batch)))
            .collect::<Vec<_>>()
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    })
}

fn dedup_processor(clock: &ManuallyAdvancedTimeSource) -> AggregateProcessor {
    init_tracing();
    let config = AggregateProcessorConfig::from_toml_str(
        r#"
        identification_keys = ["sourceIp", "destinationIp", "status"]
        window_duration = "3m"
        action = "remove_duplicates"
        "#,
    )
    .unwrap();
    AggregateProcessor::builder(config)
        .time_source(TimeSource::custom(clock.clone()))
        .build()
        .unwrap()
}

#[test]
fn concurrent_dedup_emits_one_event_per_key() {
    let clock = ManuallyAdvancedTimeSource::at_time(UNIX_EPOCH);
    let processor = dedup_processor(&clock);

    let output = execute_concurrently(&processor, network_events());

    check!(output.len() == 8);
    let keys: HashSet<_> = output.iter().map(key_of).collect();
    check!(keys.len() == 8);
}

#[test]
fn a_new_window_starts_from_clean_state() {
    let clock = ManuallyAdvancedTimeSource::at_time(UNIX_EPOCH);
    let processor = dedup_processor(&clock);

    let first = execute_concurrently(&processor, network_events());
    check!(first.len() == 8);

    clock.update_instant(Duration::from_secs(180));
    check!(processor.sweep().is_empty());
    check!(processor.is_ready_for_shutdown());

    let second = execute_concurrently(&processor, network_events());
    check!(second.len() == 8);
    let keys: HashSet<_> = second.iter().map(key_of).collect();
    check!(keys.len() == 8);
}

#[test]
fn concurrent_counting_into_one_group() {
    init_tracing();
    let config = AggregateProcessorConfig::new(Vec::<String>::new(), ActionConfig::new("count"));
    let processor = AggregateProcessor::builder(config).build().unwrap();

    thread::scope(|s| {
        for _ in 0..100 {
            s.spawn(|| {
                let batch = (0..200).map(|i| Event::builder().field("i", i).build());
                check!(processor.execute(batch).is_empty());
            });
        }
    });

    processor.prepare_for_shutdown();
    let concluded = processor.sweep();
    let_assert!([out] = concluded.as_slice());
    check!(out.to_json_string() == r#"{"aggr._count":20000}"#);
    check!(processor.is_ready_for_shutdown());
}

#[test]
fn sweeping_while_handling_neither_loses_nor_double_counts() {
    init_tracing();
    let mut config = AggregateProcessorConfig::new(["shard"], ActionConfig::new("count"));
    // every group is eligible for conclusion as soon as it exists
    config.window_duration = Duration::from_nanos(1);
    let processor = AggregateProcessor::builder(config).build().unwrap();

    let mut outputs: Vec<Event> = thread::scope(|s| {
        let handlers: Vec<_> = (0..8)
            .map(|t| {
                let processor = &processor;
                s.spawn(move || {
                    (0..50)
                        .flat_map(|round| {
                            let batch = (0..20)
                                .map(|i| Event::builder().field("shard", (t + round + i) % 4).build());
                            processor.execute(batch)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let sweepers: Vec<_> = (0..4)
            .map(|_| s.spawn(|| (0..200).flat_map(|_| processor.sweep()).collect::<Vec<_>>()))
            .collect();
        handlers
            .into_iter()
            .chain(sweepers)
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    });

    processor.prepare_for_shutdown();
    outputs.extend(processor.sweep());
    check!(processor.is_ready_for_shutdown());

    let total: u64 = outputs
        .iter()
        .map(|event| event.as_map()["aggr._count"].as_u64().unwrap())
        .sum();
    check!(total == 8 * 50 * 20);
}

#[test]
fn histogram_from_toml() {
    init_tracing();
    let clock = ManuallyAdvancedTimeSource::at_time(UNIX_EPOCH);
    let config = AggregateProcessorConfig::from_toml_str(
        r#"
        identification_keys = ["/request/route"]
        window_duration = "PT1M"
        aggregated_events_tag = "latency-rollup"

        [action.histogram]
        key = "/request/latency"
        buckets = [50, 100, 250]
        units = "ms"
        record_minmax = true
        generated_key_prefix = "latency_"
        "#,
    )
    .unwrap();
    let processor = AggregateProcessor::builder(config)
        .time_source(TimeSource::custom(clock.clone()))
        .build()
        .unwrap();

    let events = [12, 180, 75, 900].map(|latency| {
        Event::try_from(json!({"request": {"route": "/cart", "latency": latency}})).unwrap()
    });
    check!(processor.execute(events).is_empty());

    clock.update_instant(Duration::from_secs(60));
    clock.update_time(UNIX_EPOCH + Duration::from_secs(60));
    let concluded = processor.sweep();
    let_assert!([out] = concluded.as_slice());
    check!(out.metadata().has_tag("latency-rollup"));
    check!(
        Value::Object(out.as_map().clone())
            == json!({
                "request": {"route": "/cart"},
                "latency_count": 4,
                "latency_sum": 1167.0,
                "latency_min": 12.0,
                "latency_max": 900.0,
                "latency_buckets": [50.0, 100.0, 250.0],
                "latency_bucket_counts": [1, 1, 1, 1],
                "latency_start_time": "1970-01-01T00:00:00Z",
                "latency_duration": 60000,
                "latency_units": "ms",
            })
    );
}

/// Replaces each event with a redacted copy and emits nothing on conclusion.
struct Redact;

impl Action for Redact {
    fn handle_event(
        &self,
        event: &Event,
        _input: &mut ActionInput<'_>,
    ) -> Result<ActionResponse, ActionError> {
        let mut redacted = event.clone();
        redacted.put(&"user".parse().unwrap(), "<redacted>");
        Ok(ActionResponse::Replace(redacted))
    }

    fn conclude_group(&self, _input: &ConcludeInput<'_>) -> Result<Option<Event>, ActionError> {
        Err(ActionError::new("nothing to conclude"))
    }
}

#[test]
fn custom_actions_by_name_and_metrics() {
    init_tracing();
    let TestEntrySink { inspector, sink } = test_entry_sink();
    let mut actions = ActionRegistry::builtin();
    actions.register("redact", |_| Ok(Arc::new(Redact)));

    let config = AggregateProcessorConfig::from_toml_str(
        r#"
        identification_keys = ["user"]
        action = "redact"
        "#,
    )
    .unwrap();
    let processor = AggregateProcessor::builder(config)
        .action_registry(actions)
        .metrics_sink(sink)
        .build()
        .unwrap();

    let out = processor.execute([Event::try_from(json!({"user": "alice", "op": "login"})).unwrap()]);
    let_assert!([redacted] = out.as_slice());
    check!(redacted.to_json_string() == r#"{"op":"login","user":"<redacted>"}"#);

    processor.prepare_for_shutdown();
    check!(processor.execute(Vec::<Event>::new()).is_empty());
    check!(processor.synchronizer().stats().conclude_errors() == 1);

    let entries = inspector.entries();
    check!(entries.len() == 2);
    check!(entries[0].metrics["RecordsIn"].as_u64() == 1);
    check!(entries[0].metrics["RecordsOut"].as_u64() == 1);
    check!(entries[0].metrics["ActionHandleEventsOut"].as_u64() == 1);
    check!(entries[1].metrics["ActionConcludeGroupEventsDropped"].as_u64() == 1);
}

#[test]
fn failing_action_passes_the_original_event_downstream() {
    struct Explodes;

    impl Action for Explodes {
        fn handle_event(
            &self,
            _event: &Event,
            input: &mut ActionInput<'_>,
        ) -> Result<ActionResponse, ActionError> {
            input.state_mut().insert("half".into(), json!("done"));
            Err(ActionError::new("exploded"))
        }
    }

    init_tracing();
    let config = AggregateProcessorConfig::new(["id"], ActionConfig::new("ignored"));
    let processor = AggregateProcessor::builder(config)
        .action(Arc::new(Explodes))
        .build()
        .unwrap();

    let original = Event::builder().event_type("log").field("id", 7).tag("raw").build();
    let out = processor.execute([original.clone()]);
    check!(out == [original]);
    check!(processor.synchronizer().stats().handle_errors() == 1);
}

#[test]
fn signed_zero_key_values_share_a_group() {
    init_tracing();
    let config = AggregateProcessorConfig::new(["v"], ActionConfig::new("remove_duplicates"));
    let processor = AggregateProcessor::builder(config).build().unwrap();

    let events = [json!({"v": 0.0}), json!({"v": -0.0}), json!({"v": 0.0})]
        .map(|raw| Event::try_from(raw).unwrap());
    check!(processor.execute(events).len() == 1);

    processor.prepare_for_shutdown();
    check!(processor.sweep().is_empty());
    check!(processor.is_ready_for_shutdown());
}

#[test]
fn rate_limiter_drops_bursts_per_group() {
    init_tracing();
    let clock = ManuallyAdvancedTimeSource::at_time(UNIX_EPOCH);
    let config = AggregateProcessorConfig::from_toml_str(
        r#"
        identification_keys = ["host"]
        action = { rate_limiter = { events_per_second = 1, when_exceeds = "drop" } }
        "#,
    )
    .unwrap();
    let processor = AggregateProcessor::builder(config)
        .time_source(TimeSource::custom(clock.clone()))
        .build()
        .unwrap();
    let burst = || {
        (0..10).map(|i| {
            let host = if i % 2 == 0 { "a" } else { "b" };
            Event::builder().field("host", host).field("i", i).build()
        })
    };

    let first = processor.execute(burst());
    let hosts: Vec<_> = first.iter().map(|e| e.as_map()["host"].clone()).collect();
    check!(hosts == [json!("a"), json!("b")]);

    clock.update_instant(Duration::from_millis(400));
    check!(processor.execute(burst()).is_empty());

    clock.update_instant(Duration::from_millis(700));
    check!(processor.execute(burst()).len() == 2);
}
