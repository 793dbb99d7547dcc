//! External cancellation: sources stop, everything drains, the run reports
//! `Cancelled` rather than `Failed`.

mod common;

use common::builders::{endless_source, numbers};
use common::mock_helpers::Counter;
use stagepipe_rs::pipeline::{
    CancelReason, Pipeline, PipelineState, Stage, StageOutcome, Supervisor, SupervisorEvent,
};
use std::time::Duration;

fn endless_pipeline(sink_delay: Duration) -> (Supervisor, Counter) {
    let mut pipeline = Pipeline::new();
    let a = pipeline.channel();
    let b = pipeline.channel();
    let counter = Counter::new();
    pipeline.add_stage(endless_source("endless").output(&a)).unwrap();
    pipeline
        .add_stage(Stage::map("inc", |x: i64| x + 1).input(&a).output(&b))
        .unwrap();
    pipeline
        .add_stage(counter.sink("count", sink_delay).input(&b))
        .unwrap();
    (Supervisor::new(pipeline), counter)
}

#[test]
fn test_cancel_running_pipeline() {
    let (mut supervisor, counter) = endless_pipeline(Duration::ZERO);
    let events = supervisor.events();
    supervisor.start().unwrap();

    assert!(common::wait_until(Duration::from_secs(2), || counter.get() > 100));
    supervisor.cancel();
    let result = supervisor.wait().unwrap();

    assert_eq!(result.state, PipelineState::Cancelled);
    assert_eq!(result.stages[0].outcome, StageOutcome::Cancelled);
    assert_eq!(result.failures().count(), 0);
    // Downstream drained to end-of-stream.
    assert_eq!(result.stages[2].outcome, StageOutcome::Completed);
    assert_eq!(result.stages[2].stats.received as usize, counter.get());

    assert!(events.try_iter().any(|e| e
        == SupervisorEvent::CancelRequested {
            reason: Some(CancelReason::Requested)
        }));
}

#[test]
fn test_cancel_from_another_thread_unblocks_full_channels() {
    // Slow sink keeps every channel full, so the source is parked in send.
    let (mut supervisor, counter) = endless_pipeline(Duration::from_millis(5));
    let handle = supervisor.cancel_handle();
    supervisor.start().unwrap();

    assert!(common::wait_until(Duration::from_secs(2), || counter.get() > 2));
    std::thread::spawn(move || handle.cancel()).join().unwrap();

    let result = supervisor.wait().unwrap();
    assert!(result.is_cancelled());
    assert_eq!(supervisor.state(), PipelineState::Cancelled);
}

#[test]
fn test_cancel_before_start() {
    let (mut supervisor, counter) = endless_pipeline(Duration::ZERO);
    supervisor.cancel();
    let result = common::run_with_deadline(supervisor);
    assert!(result.is_cancelled());
    assert_eq!(counter.get(), 0);
}

#[test]
fn test_cancel_after_completion_keeps_completed() {
    let mut pipeline = Pipeline::new();
    let ch = pipeline.channel();
    let counter = Counter::new();
    pipeline.add_stage(numbers(5).output(&ch)).unwrap();
    pipeline
        .add_stage(counter.sink("count", Duration::ZERO).input(&ch))
        .unwrap();

    let mut supervisor = Supervisor::new(pipeline);
    let result = supervisor.run().unwrap();
    supervisor.cancel();
    assert!(result.is_completed());
    assert_eq!(supervisor.wait().unwrap().state, PipelineState::Completed);
}

#[test]
fn test_dropping_running_supervisor_stops_workers() {
    let (mut supervisor, counter) = endless_pipeline(Duration::ZERO);
    supervisor.start().unwrap();
    assert!(common::wait_until(Duration::from_secs(2), || counter.get() > 10));

    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        drop(supervisor);
        let _ = tx.send(());
    });
    assert!(rx.recv_timeout(common::test_timeout()).is_ok());

    // Nothing keeps counting once the drop has returned.
    let settled = counter.get();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(counter.get(), settled);
}
