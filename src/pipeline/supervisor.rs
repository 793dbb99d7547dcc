//! Supervisor: runs every stage on its own thread and aggregates outcomes.
//!
//! ```text
//! start()
//!   ├── worker "<prefix>-<stage>"  ×N ──► StageReport ──┐
//!   └── monitor "<prefix>-monitor" ◄─────────────────────┘
//!         ├── first failure → cancel(StageFailed)
//!         ├── SupervisorEvent stream
//!         └── join workers → RunResult
//! ```
//!
//! Failures travel two ways: a failed stage closes its outputs so downstream
//! drains and stops, and the monitor trips the cancellation signal so sources
//! stop producing into channels nobody reads anymore.

use crate::pipeline::cancel::{CancelHandle, CancelReason, CancelToken};
use crate::pipeline::error::{PipelineError, PipelineResult, StageError};
use crate::pipeline::events::SupervisorEvent;
use crate::pipeline::graph::{Pipeline, PipelineState};
use crate::pipeline::id::StageId;
use crate::pipeline::lock;
use crate::pipeline::stage::{ReleasePorts, StageContext, StageOutcome, StageReport, StageStats};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Aggregated outcome of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// `Completed`, `Failed` or `Cancelled`
    pub state: PipelineState,
    /// One report per stage, ordered by stage id
    pub stages: Vec<StageReport>,
    pub elapsed: Duration,
}

impl RunResult {
    /// `Failed` if any stage failed, else `Cancelled` if any stage stopped on
    /// cancellation, else `Completed`.
    fn aggregate(mut stages: Vec<StageReport>, elapsed: Duration) -> Self {
        stages.sort_by_key(|r| r.id);
        let failed = stages
            .iter()
            .any(|r| matches!(r.outcome, StageOutcome::Failed(_)));
        let cancelled = stages.iter().any(|r| r.outcome == StageOutcome::Cancelled);
        let state = if failed {
            PipelineState::Failed
        } else if cancelled {
            PipelineState::Cancelled
        } else {
            PipelineState::Completed
        };
        Self {
            state,
            stages,
            elapsed,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == PipelineState::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.state == PipelineState::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == PipelineState::Cancelled
    }

    /// Every failed stage with its reason, ordered by stage id.
    pub fn failures(&self) -> impl Iterator<Item = (&StageReport, &StageError)> + '_ {
        self.stages.iter().filter_map(|r| match &r.outcome {
            StageOutcome::Failed(err) => Some((r, err)),
            _ => None,
        })
    }

    pub fn report(&self, stage: StageId) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.id == stage)
    }

    /// `Ok` only for a completed run. A failed run maps to the failure of the
    /// lowest stage id.
    pub fn into_result(self) -> PipelineResult<()> {
        match self.state {
            PipelineState::Completed => Ok(()),
            PipelineState::Failed => match self.failures().next() {
                Some((report, err)) => Err(PipelineError::StageFailed {
                    stage: report.id,
                    name: report.name.clone(),
                    source: err.clone(),
                }),
                None => Err(PipelineError::Supervisor(
                    "run failed without a stage failure".to_string(),
                )),
            },
            _ => Err(PipelineError::Cancelled),
        }
    }
}


fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// OS thread names cannot carry NUL bytes; stage names can.
fn thread_name(prefix: &str, name: &str) -> String {
    format!("{}-{}", prefix, name).replace('\0', "")
}

/// Undo a partial launch: close the channels of stages that never started,
/// stop the sources and join every worker already running.
fn abort_launch(
    cancel: &CancelToken,
    unlaunched: Vec<ReleasePorts>,
    workers: Vec<(StageId, JoinHandle<()>)>,
) {
    for release in unlaunched {
        release();
    }
    cancel.cancel(CancelReason::Requested);
    for (id, handle) in workers {
        if handle.join().is_err() {
            tracing::error!("Worker for stage {} did not exit cleanly", id);
        }
    }
}

/// Owns a pipeline and drives it to a terminal state.
pub struct Supervisor {
    /// Present until `start()`
    pipeline: Option<Pipeline>,
    cancel: CancelToken,
    state: Arc<Mutex<PipelineState>>,
    /// Handed to the workers and monitor by `start()`, so the event stream
    /// disconnects once the run is over
    events_tx: Option<Sender<SupervisorEvent>>,
    events_rx: Receiver<SupervisorEvent>,
    monitor: Option<JoinHandle<RunResult>>,
    result: Option<RunResult>,
}

impl Supervisor {
    pub fn new(pipeline: Pipeline) -> Self {
        let (events_tx, events_rx) = unbounded();
        let state = Arc::new(Mutex::new(pipeline.state()));
        Self {
            pipeline: Some(pipeline),
            cancel: CancelToken::new(),
            state,
            events_tx: Some(events_tx),
            events_rx,
            monitor: None,
            result: None,
        }
    }

    /// Launch every stage and return immediately.
    pub fn start(&mut self) -> PipelineResult<()> {
        let Some(mut pipeline) = self.pipeline.take() else {
            return Err(PipelineError::AlreadyStarted);
        };
        if pipeline.state() != PipelineState::Validated {
            if let Err(err) = pipeline.validate() {
                self.pipeline = Some(pipeline);
                return Err(err);
            }
        }

        let Some(events_tx) = self.events_tx.take() else {
            self.pipeline = Some(pipeline);
            return Err(PipelineError::AlreadyStarted);
        };

        let config = pipeline.config().clone();
        let default_timeout = config.idle_timeout();
        let stages = pipeline.into_stages();
        let stage_count = stages.len();
        *lock(&self.state) = PipelineState::Running;
        tracing::info!("Starting pipeline with {} stages", stage_count);

        let started = Instant::now();
        let (report_tx, report_rx) = unbounded::<StageReport>();
        let mut workers: Vec<(StageId, JoinHandle<()>)> = Vec::with_capacity(stage_count);
        let mut pending = stages.into_iter();

        while let Some(slot) = pending.next() {
            let stage_id = slot.id;
            let ctx = StageContext {
                id: stage_id,
                name: slot.name,
                kind: slot.kind,
                cancel: self.cancel.clone(),
                fairness: slot.fairness.unwrap_or(config.fairness),
                idle_timeout: slot.idle_timeout.or(default_timeout),
            };
            let runner = slot.runner;
            let release = runner.release_ports();
            let reports = report_tx.clone();
            let events = events_tx.clone();
            let name = thread_name(&config.thread_name_prefix, &ctx.name);

            let spawned = thread::Builder::new().name(name).spawn(move || {
                let _ = events.send(SupervisorEvent::StageStarted {
                    stage: ctx.id,
                    name: ctx.name.clone(),
                });
                let t0 = Instant::now();
                let report = match panic::catch_unwind(AssertUnwindSafe(|| runner.run(&ctx))) {
                    Ok(report) => report,
                    Err(payload) => {
                        let message = panic_message(payload);
                        tracing::error!("Stage {} '{}' panicked: {}", ctx.id, ctx.name, message);
                        StageReport {
                            id: ctx.id,
                            name: ctx.name.clone(),
                            kind: ctx.kind,
                            outcome: StageOutcome::Failed(StageError::Panicked(message)),
                            stats: StageStats {
                                elapsed: t0.elapsed(),
                                ..StageStats::default()
                            },
                        }
                    }
                };
                let _ = reports.send(report);
            });

            match spawned {
                Ok(handle) => workers.push((stage_id, handle)),
                Err(err) => {
                    tracing::error!("Failed to spawn worker for stage {}: {}", stage_id, err);
                    let unlaunched = std::iter::once(release)
                        .chain(pending.map(|slot| slot.runner.release_ports()))
                        .collect();
                    abort_launch(&self.cancel, unlaunched, workers);
                    *lock(&self.state) = PipelineState::Failed;
                    return Err(PipelineError::Io(err));
                }
            }
        }
        drop(report_tx);

        let monitor = Monitor {
            cancel: self.cancel.clone(),
            state: Arc::clone(&self.state),
            events: events_tx,
            reports: report_rx,
            workers,
            stage_count,
            started,
        };
        let spawned = thread::Builder::new()
            .name(thread_name(&config.thread_name_prefix, "monitor"))
            .spawn(move || monitor.run());

        match spawned {
            Ok(handle) => {
                self.monitor = Some(handle);
                Ok(())
            }
            Err(err) => {
                // The monitor owned the worker handles; they exit on their own
                // once cancelled.
                self.cancel.cancel(CancelReason::Requested);
                *lock(&self.state) = PipelineState::Failed;
                Err(PipelineError::Io(err))
            }
        }
    }

    /// Block until every stage has exited and return the aggregated result.
    pub fn wait(&mut self) -> PipelineResult<RunResult> {
        if let Some(result) = &self.result {
            return Ok(result.clone());
        }
        let handle = self.monitor.take().ok_or(PipelineError::NotStarted)?;
        let result = handle
            .join()
            .map_err(|_| PipelineError::Supervisor("monitor thread panicked".to_string()))?;
        self.result = Some(result.clone());
        Ok(result)
    }

    /// Start and wait.
    pub fn run(&mut self) -> PipelineResult<RunResult> {
        self.start()?;
        self.wait()
    }

    /// Ask every source to stop producing.
    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.cancel.clone())
    }

    pub fn state(&self) -> PipelineState {
        match &self.pipeline {
            Some(pipeline) => pipeline.state(),
            None => *lock(&self.state),
        }
    }

    /// Subscribe to lifecycle events. Every receiver competes for the same
    /// stream, so use one. The stream ends after `Finished`.
    pub fn events(&self) -> Receiver<SupervisorEvent> {
        self.events_rx.clone()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.take() {
            tracing::debug!("Supervisor dropped while running, cancelling");
            self.cancel.cancel(CancelReason::Requested);
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Collects stage reports on a dedicated thread.
struct Monitor {
    cancel: CancelToken,
    state: Arc<Mutex<PipelineState>>,
    events: Sender<SupervisorEvent>,
    reports: Receiver<StageReport>,
    workers: Vec<(StageId, JoinHandle<()>)>,
    stage_count: usize,
    started: Instant,
}

enum Wake {
    Report(StageReport),
    Cancelled,
    Disconnected,
}

impl Monitor {
    fn announce_cancel(&self) {
        let reason = self.cancel.reason();
        tracing::info!("Cancellation signalled: {:?}", reason);
        let _ = self.events.send(SupervisorEvent::CancelRequested { reason });
    }

    fn run(self) -> RunResult {
        let mut reports = Vec::with_capacity(self.stage_count);
        let mut announced = false;

        while reports.len() < self.stage_count {
            let wake = if announced {
                self.reports.recv().map_or(Wake::Disconnected, Wake::Report)
            } else {
                select! {
                    recv(self.reports) -> msg => msg.map_or(Wake::Disconnected, Wake::Report),
                    recv(self.cancel.signal()) -> _ => Wake::Cancelled,
                }
            };

            match wake {
                Wake::Report(report) => {
                    if matches!(report.outcome, StageOutcome::Failed(_))
                        && self.cancel.cancel(CancelReason::StageFailed(report.id))
                    {
                        tracing::warn!(
                            "Stage {} '{}' failed, cancelling sources",
                            report.id,
                            report.name
                        );
                        if !announced {
                            announced = true;
                            self.announce_cancel();
                        }
                    }
                    let _ = self.events.send(SupervisorEvent::StageFinished {
                        stage: report.id,
                        name: report.name.clone(),
                        outcome: report.outcome.clone(),
                    });
                    reports.push(report);
                }
                Wake::Cancelled => {
                    announced = true;
                    self.announce_cancel();
                }
                Wake::Disconnected => {
                    tracing::error!(
                        "Report channel closed with {} of {} stages reported",
                        reports.len(),
                        self.stage_count
                    );
                    break;
                }
            }
        }
        if !announced && self.cancel.is_cancelled() {
            self.announce_cancel();
        }

        for (id, handle) in self.workers {
            if handle.join().is_err() {
                tracing::error!("Worker for stage {} did not exit cleanly", id);
            }
        }

        let result = RunResult::aggregate(reports, self.started.elapsed());
        *lock(&self.state) = result.state;
        tracing::info!(
            "Pipeline finished: {:?} in {:.1} ms",
            result.state,
            result.elapsed.as_secs_f64() * 1000.0
        );
        let _ = self.events.send(SupervisorEvent::Finished {
            state: result.state,
        });
        result
    }
}
