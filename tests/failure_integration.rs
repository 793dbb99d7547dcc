//! Fail-fast propagation: a failing stage stops sources upstream and lets
//! downstream drain to end-of-stream.

mod common;

use common::builders::{endless_source, numbers, LinearPipelineBuilder};
use common::mock_helpers::{Counter, FailAt};
use stagepipe_rs::pipeline::{
    CancelReason, Collector, Pipeline, PipelineError, PipelineState, Stage, StageError,
    StageOutcome, Supervisor, SupervisorEvent, TransformError,
};
use std::time::Duration;

#[test]
fn test_mid_pipeline_failure() {
    let (supervisor, collector) = LinearPipelineBuilder::new()
        .items(0..100)
        .capacity(1)
        .then(Stage::from_filter(FailAt::new(5)))
        .supervisor();

    let result = common::run_with_deadline(supervisor);

    assert_eq!(result.state, PipelineState::Failed);
    let failures: Vec<_> = result.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.name, "fail-at-5");
    assert_eq!(
        failures[0].1,
        &StageError::Transform(TransformError::new("refusing item 5"))
    );

    // The offending item is not forwarded; the sink reaches end-of-stream.
    assert_eq!(collector.items(), vec![0, 1, 2, 3, 4]);
    let sink = result.stages.last().unwrap();
    assert_eq!(sink.outcome, StageOutcome::Completed);
}

#[test]
fn test_failure_stops_endless_source() {
    let mut pipeline = Pipeline::new();
    let a = pipeline.channel();
    let b = pipeline.channel();
    let collector = Collector::new();

    let source = pipeline.add_stage(endless_source("endless").output(&a)).unwrap();
    pipeline
        .add_stage(Stage::from_filter(FailAt::new(3)).input(&a).output(&b))
        .unwrap();
    pipeline.add_stage(collector.stage("collect").input(&b)).unwrap();

    let mut supervisor = Supervisor::new(pipeline);
    let events = supervisor.events();
    let result = common::run_with_deadline(supervisor);

    assert!(result.is_failed());
    assert_eq!(
        result.report(source.id()).map(|r| r.outcome.clone()),
        Some(StageOutcome::Cancelled)
    );
    assert_eq!(collector.items(), vec![0, 1, 2]);

    let cancel_events: Vec<_> = events
        .try_iter()
        .filter(|e| matches!(e, SupervisorEvent::CancelRequested { .. }))
        .collect();
    assert_eq!(
        cancel_events,
        vec![SupervisorEvent::CancelRequested {
            reason: Some(CancelReason::StageFailed(stagepipe_rs::pipeline::StageId(1)))
        }]
    );
}

#[test]
fn test_sink_failure_maps_to_stage_failed() {
    let mut pipeline = Pipeline::new();
    let ch = pipeline.channel();
    pipeline.add_stage(numbers(10).output(&ch)).unwrap();
    pipeline
        .add_stage(
            Stage::sink("picky", |x: i64| {
                if x > 2 {
                    Err(format!("{} is too large", x).into())
                } else {
                    Ok(())
                }
            })
            .input(&ch),
        )
        .unwrap();

    let result = common::run_with_deadline(Supervisor::new(pipeline));
    let err = result.into_result().unwrap_err();
    match err {
        PipelineError::StageFailed { name, source, .. } => {
            assert_eq!(name, "picky");
            assert_eq!(source.to_string(), "Transform error: 3 is too large");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_all_failures_are_collected_in_stage_order() {
    let mut pipeline = Pipeline::new();
    let left = pipeline.channel();
    let right = pipeline.channel();
    pipeline.add_stage(numbers(10).output(&left).output(&right)).unwrap();
    pipeline
        .add_stage(Stage::sink("left", |_: i64| Err("left broke".into())).input(&left))
        .unwrap();
    pipeline
        .add_stage(Stage::sink("right", |_: i64| Err("right broke".into())).input(&right))
        .unwrap();

    let result = common::run_with_deadline(Supervisor::new(pipeline));
    assert!(result.is_failed());
    let names: Vec<&str> = result.failures().map(|(r, _)| r.name.as_str()).collect();
    assert_eq!(names, vec!["left", "right"]);
}

#[test]
fn test_idle_timeout_fails_starved_stage() {
    let mut pipeline = Pipeline::new();
    let ch = pipeline.channel();
    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    pipeline
        .add_stage(
            Stage::source(
                "stalled",
                std::iter::from_fn(move || gate_rx.recv().ok().map(|_| 1i64)),
            )
            .output(&ch),
        )
        .unwrap();
    let counter = Counter::new();
    let sink = pipeline
        .add_stage(
            counter
                .sink("impatient", Duration::ZERO)
                .input(&ch)
                .idle_timeout(Duration::from_millis(20)),
        )
        .unwrap();

    let mut supervisor = Supervisor::new(pipeline);
    let events = supervisor.events();
    supervisor.start().unwrap();

    // The source stays blocked until the sink has timed out.
    let sink_finished = events
        .iter()
        .find(|e| matches!(e, SupervisorEvent::StageFinished { stage, .. } if *stage == sink.id()));
    assert!(sink_finished.is_some());
    drop(gate_tx);

    let result = supervisor.wait().unwrap();
    assert!(result.is_failed());
    assert_eq!(
        result.report(sink.id()).map(|r| r.outcome.clone()),
        Some(StageOutcome::Failed(StageError::ReceiveTimeout { after_ms: 20 }))
    );
}

#[test]
fn test_panic_is_contained() {
    let (supervisor, collector) = LinearPipelineBuilder::new()
        .items(0..10)
        .then(Stage::map("explode", |x: i64| {
            if x == 4 {
                panic!("bad input {}", x);
            }
            x
        }))
        .supervisor();

    let result = common::run_with_deadline(supervisor);
    assert!(result.is_failed());
    let (_, err) = result.failures().next().unwrap();
    assert_eq!(err, &StageError::Panicked("bad input 4".to_string()));
    assert_eq!(collector.items(), vec![0, 1, 2, 3]);
}
