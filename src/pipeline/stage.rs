//! Stage abstraction for the pipeline.
//!
//! Two-layer design:
//! - **`Stage<I, O>`**: typed construction surface. Holds the transformation
//!   and the channels the stage reads from and writes to.
//! - **`StageRunner`**: object-safe execution loop, so the pipeline can hold
//!   stages of different item types side by side.
//!
//! `StageRef<I, O>` is the typed handle returned by `Pipeline::add_stage`; it
//! shares the stage's channel endpoints with the runner until the pipeline
//! starts.

use crate::pipeline::cancel::CancelToken;
use crate::pipeline::channel::{Channel, ChannelReceiver, ChannelSender};
use crate::pipeline::error::{PipelineError, StageError, TransformResult};
use crate::pipeline::id::StageId;
use crate::pipeline::lock;
use crossbeam_channel::{Select, TryRecvError};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Structural role of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    /// No inputs; produces items.
    Source,
    /// Inputs and outputs; maps each input to zero or more outputs.
    Transform,
    /// No outputs; the only kind allowed to have side effects.
    Sink,
}

/// How a stage with several inputs picks the next one to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairnessPolicy {
    /// Start each read at the input after the one served last.
    #[default]
    RoundRobin,
    /// Take from any ready input; ties are broken at random.
    ReadyFirst,
}

/// A named, reusable unit of work for transform stages.
pub trait Filter: Send + 'static {
    type Input: Send + 'static;
    type Output: Clone + Send + 'static;

    /// Human-readable name of this filter.
    fn name(&self) -> &str;

    /// Process one item, pushing zero or more results into `out`.
    fn process(&mut self, item: Self::Input, out: &mut Vec<Self::Output>) -> TransformResult<()>;
}

type SourceIter<O> = Box<dyn Iterator<Item = TransformResult<O>> + Send>;
type TransformFn<I, O> = Box<dyn FnMut(I, &mut Vec<O>) -> TransformResult<()> + Send>;
type SinkFn<I> = Box<dyn FnMut(I) -> TransformResult<()> + Send>;

pub(crate) enum Logic<I, O> {
    Source(SourceIter<O>),
    Transform(TransformFn<I, O>),
    Sink(SinkFn<I>),
}

/// A stage before it is added to a pipeline.
///
/// Sources are `Stage<(), O>` and sinks are `Stage<I, ()>`.
pub struct Stage<I, O> {
    name: String,
    kind: StageKind,
    logic: Logic<I, O>,
    inputs: Vec<Channel<I>>,
    outputs: Vec<Channel<O>>,
    fairness: Option<FairnessPolicy>,
    idle_timeout: Option<Duration>,
}

impl<O: Clone + Send + 'static> Stage<(), O> {
    /// Source stage emitting every item of `items`.
    pub fn source<It>(name: impl Into<String>, items: It) -> Self
    where
        It: IntoIterator<Item = O>,
        It::IntoIter: Send + 'static,
    {
        Self::try_source(name, items.into_iter().map(Ok))
    }

    /// Source stage whose items may fail; the first error fails the stage.
    pub fn try_source<It>(name: impl Into<String>, items: It) -> Self
    where
        It: IntoIterator<Item = TransformResult<O>>,
        It::IntoIter: Send + 'static,
    {
        Self::with_logic(
            name,
            StageKind::Source,
            Logic::Source(Box::new(items.into_iter())),
        )
    }
}

impl<I: Send + 'static, O: Clone + Send + 'static> Stage<I, O> {
    /// Transform stage from a raw `item -> out buffer` function.
    pub fn transform<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(I, &mut Vec<O>) -> TransformResult<()> + Send + 'static,
    {
        Self::with_logic(name, StageKind::Transform, Logic::Transform(Box::new(f)))
    }

    pub fn map<F>(name: impl Into<String>, mut f: F) -> Self
    where
        F: FnMut(I) -> O + Send + 'static,
    {
        Self::transform(name, move |item, out| {
            out.push(f(item));
            Ok(())
        })
    }

    pub fn try_map<F>(name: impl Into<String>, mut f: F) -> Self
    where
        F: FnMut(I) -> TransformResult<O> + Send + 'static,
    {
        Self::transform(name, move |item, out| {
            out.push(f(item)?);
            Ok(())
        })
    }

    pub fn flat_map<F, It>(name: impl Into<String>, mut f: F) -> Self
    where
        F: FnMut(I) -> TransformResult<It> + Send + 'static,
        It: IntoIterator<Item = O>,
    {
        Self::transform(name, move |item, out| {
            out.extend(f(item)?);
            Ok(())
        })
    }

    /// Transform stage driven by a `Filter` implementation.
    pub fn from_filter<F>(filter: F) -> Self
    where
        F: Filter<Input = I, Output = O>,
    {
        let name = filter.name().to_string();
        let mut filter = filter;
        Self::transform(name, move |item, out| filter.process(item, out))
    }
}

impl<T: Clone + Send + 'static> Stage<T, T> {
    /// Pass through items matching `predicate`, drop the rest.
    pub fn filter<P>(name: impl Into<String>, mut predicate: P) -> Self
    where
        P: FnMut(&T) -> bool + Send + 'static,
    {
        Self::transform(name, move |item, out| {
            if predicate(&item) {
                out.push(item);
            }
            Ok(())
        })
    }
}

impl<I: Send + 'static> Stage<I, ()> {
    /// Sink stage; the function may fail the stage.
    pub fn sink<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnMut(I) -> TransformResult<()> + Send + 'static,
    {
        Self::with_logic(name, StageKind::Sink, Logic::Sink(Box::new(f)))
    }

    /// Infallible sink.
    pub fn for_each<F>(name: impl Into<String>, mut f: F) -> Self
    where
        F: FnMut(I) + Send + 'static,
    {
        Self::sink(name, move |item| {
            f(item);
            Ok(())
        })
    }
}

impl<I, O> Stage<I, O> {
    fn with_logic(name: impl Into<String>, kind: StageKind, logic: Logic<I, O>) -> Self {
        Self {
            name: name.into(),
            kind,
            logic,
            inputs: Vec::new(),
            outputs: Vec::new(),
            fairness: None,
            idle_timeout: None,
        }
    }

    /// Read from `channel`.
    pub fn input(mut self, channel: &Channel<I>) -> Self {
        self.inputs.push(channel.clone());
        self
    }

    /// Write every result to `channel`.
    pub fn output(mut self, channel: &Channel<O>) -> Self {
        self.outputs.push(channel.clone());
        self
    }

    /// Override the pipeline's fairness policy for this stage's inputs.
    pub fn fairness(mut self, policy: FairnessPolicy) -> Self {
        self.fairness = Some(policy);
        self
    }

    /// Fail the stage if no input arrives within `timeout`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub(crate) fn into_parts(self) -> StageParts<I, O> {
        StageParts {
            name: self.name,
            kind: self.kind,
            logic: self.logic,
            inputs: self.inputs,
            outputs: self.outputs,
            fairness: self.fairness,
            idle_timeout: self.idle_timeout,
        }
    }
}

pub(crate) struct StageParts<I, O> {
    pub name: String,
    pub kind: StageKind,
    pub logic: Logic<I, O>,
    pub inputs: Vec<Channel<I>>,
    pub outputs: Vec<Channel<O>>,
    pub fairness: Option<FairnessPolicy>,
    pub idle_timeout: Option<Duration>,
}

/// Channel endpoints bound to a stage, filled in while the graph is built.
pub(crate) struct Ports<I, O> {
    pub inputs: Vec<ChannelReceiver<I>>,
    pub outputs: Vec<ChannelSender<O>>,
}

impl<I, O> Default for Ports<I, O> {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

pub(crate) type SharedPorts<I, O> = Arc<Mutex<Ports<I, O>>>;

/// Typed handle to a stage registered in a `Pipeline`.
pub struct StageRef<I, O> {
    id: StageId,
    kind: StageKind,
    pub(crate) ports: SharedPorts<I, O>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> StageRef<I, O> {
    pub(crate) fn new(id: StageId, kind: StageKind, ports: SharedPorts<I, O>) -> Self {
        Self {
            id,
            kind,
            ports,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }
}

impl<I, O> Clone for StageRef<I, O> {
    fn clone(&self) -> Self {
        Self::new(self.id, self.kind, Arc::clone(&self.ports))
    }
}

impl<I, O> std::fmt::Debug for StageRef<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRef")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Per-run settings handed to a stage's execution loop.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub id: StageId,
    pub name: String,
    pub kind: StageKind,
    pub cancel: CancelToken,
    pub fairness: FairnessPolicy,
    pub idle_timeout: Option<Duration>,
}

/// Terminal outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    Completed,
    /// Stopped by the cancellation signal, or because every consumer of its
    /// outputs went away.
    Cancelled,
    Failed(StageError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    /// Items taken from input channels.
    pub received: u64,
    /// Items produced by the transformation and forwarded.
    pub emitted: u64,
    pub elapsed: Duration,
}

/// What a stage reports to the supervisor when it exits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub id: StageId,
    pub name: String,
    pub kind: StageKind,
    pub outcome: StageOutcome,
    pub stats: StageStats,
}

/// Object-safe execution loop for one stage.
pub(crate) trait StageRunner: Send {
    fn run(self: Box<Self>, ctx: &StageContext) -> StageReport;

    /// Closure that drops this stage's channel endpoints.
    ///
    /// `StageRef`s share the endpoints with the runner, so dropping a runner
    /// that never ran does not close its channels on its own.
    fn release_ports(&self) -> ReleasePorts;
}

pub(crate) type ReleasePorts = Box<dyn FnOnce() + Send>;

pub(crate) struct TypedRunner<I, O> {
    logic: Logic<I, O>,
    ports: SharedPorts<I, O>,
}

impl<I, O> TypedRunner<I, O> {
    pub(crate) fn new(logic: Logic<I, O>, ports: SharedPorts<I, O>) -> Self {
        Self { logic, ports }
    }
}

enum Halt {
    Cancelled,
    Failed(StageError),
}

impl<I: Send + 'static, O: Clone + Send + 'static> StageRunner for TypedRunner<I, O> {
    fn release_ports(&self) -> ReleasePorts {
        let ports = Arc::clone(&self.ports);
        Box::new(move || drop(std::mem::take(&mut *lock(&ports))))
    }

    fn run(self: Box<Self>, ctx: &StageContext) -> StageReport {
        let started = Instant::now();
        let Ports { inputs, outputs } = std::mem::take(&mut *lock(&self.ports));
        tracing::debug!(
            "Stage {} '{}' running ({} inputs, {} outputs)",
            ctx.id,
            ctx.name,
            inputs.len(),
            outputs.len()
        );

        let mut outputs = Broadcast::new(outputs);
        let mut stats = StageStats::default();
        let result = match self.logic {
            Logic::Source(items) => run_source(items, &mut outputs, ctx, &mut stats),
            Logic::Transform(f) => run_transform(inputs, f, &mut outputs, ctx, &mut stats),
            Logic::Sink(f) => run_sink(inputs, f, ctx, &mut stats),
        };
        // Downstream must see end-of-stream whatever happened here.
        outputs.close_all();
        stats.elapsed = started.elapsed();

        let outcome = match result {
            Ok(()) => StageOutcome::Completed,
            Err(Halt::Cancelled) => StageOutcome::Cancelled,
            Err(Halt::Failed(err)) => {
                tracing::warn!("Stage {} '{}' failed: {}", ctx.id, ctx.name, err);
                StageOutcome::Failed(err)
            }
        };
        tracing::debug!(
            "Stage {} '{}' finished: {:?} (in {}, out {})",
            ctx.id,
            ctx.name,
            outcome,
            stats.received,
            stats.emitted
        );

        StageReport {
            id: ctx.id,
            name: ctx.name.clone(),
            kind: ctx.kind,
            outcome,
            stats,
        }
    }
}

fn run_source<O: Clone>(
    mut items: SourceIter<O>,
    outputs: &mut Broadcast<O>,
    ctx: &StageContext,
    stats: &mut StageStats,
) -> Result<(), Halt> {
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        let Some(next) = items.next() else {
            return Ok(());
        };
        let item = next.map_err(|e| Halt::Failed(e.into()))?;
        outputs.send(item, Some(&ctx.cancel))?;
        stats.emitted += 1;
    }
}

fn run_transform<I, O: Clone>(
    inputs: Vec<ChannelReceiver<I>>,
    mut f: TransformFn<I, O>,
    outputs: &mut Broadcast<O>,
    ctx: &StageContext,
    stats: &mut StageStats,
) -> Result<(), Halt> {
    let mut inputs = InputSet::new(inputs, ctx.fairness);
    let mut buf = Vec::new();
    while let Some(item) = inputs.next(ctx.idle_timeout)? {
        stats.received += 1;
        if let Err(e) = f(item, &mut buf) {
            // Partial results of the offending item are not forwarded.
            buf.clear();
            return Err(Halt::Failed(e.into()));
        }
        for result in buf.drain(..) {
            outputs.send(result, None)?;
            stats.emitted += 1;
        }
    }
    Ok(())
}

fn run_sink<I>(
    inputs: Vec<ChannelReceiver<I>>,
    mut f: SinkFn<I>,
    ctx: &StageContext,
    stats: &mut StageStats,
) -> Result<(), Halt> {
    let mut inputs = InputSet::new(inputs, ctx.fairness);
    while let Some(item) = inputs.next(ctx.idle_timeout)? {
        stats.received += 1;
        f(item).map_err(|e| Halt::Failed(e.into()))?;
    }
    Ok(())
}

/// Output side of a stage: every item goes to every live output.
struct Broadcast<O> {
    outputs: Vec<ChannelSender<O>>,
    had_outputs: bool,
}

impl<O: Clone> Broadcast<O> {
    fn new(outputs: Vec<ChannelSender<O>>) -> Self {
        let had_outputs = !outputs.is_empty();
        Self {
            outputs,
            had_outputs,
        }
    }

    fn send(&mut self, item: O, cancel: Option<&CancelToken>) -> Result<(), Halt> {
        let mut pending = Some(item);
        let mut i = 0;
        while i < self.outputs.len() {
            // The last output takes the item itself; the others get clones.
            let value = if i + 1 == self.outputs.len() {
                match pending.take() {
                    Some(value) => value,
                    None => break,
                }
            } else {
                match &pending {
                    Some(value) => value.clone(),
                    None => break,
                }
            };

            let output = &self.outputs[i];
            let channel = output.id();
            let result = match cancel {
                Some(token) => output.send_or_cancel(value, token),
                None => output.send(value),
            };
            match result {
                Ok(()) => i += 1,
                Err(PipelineError::Disconnected(_)) => {
                    tracing::debug!("Channel {} lost its consumers, dropping output", channel);
                    self.outputs.remove(i);
                }
                Err(PipelineError::Cancelled) => return Err(Halt::Cancelled),
                Err(_) => return Err(Halt::Failed(StageError::ChannelClosed(channel))),
            }
        }

        if self.had_outputs && self.outputs.is_empty() {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    fn close_all(&mut self) {
        for output in &mut self.outputs {
            output.close();
        }
    }

    #[cfg(test)]
    fn ids(&self) -> Vec<crate::pipeline::id::ChannelId> {
        self.outputs.iter().map(ChannelSender::id).collect()
    }
}

/// Input side of a stage: merges several channels under a fairness policy.
struct InputSet<I> {
    inputs: Vec<ChannelReceiver<I>>,
    open: Vec<bool>,
    cursor: usize,
    policy: FairnessPolicy,
}

impl<I> InputSet<I> {
    fn new(inputs: Vec<ChannelReceiver<I>>, policy: FairnessPolicy) -> Self {
        let open = vec![true; inputs.len()];
        Self {
            inputs,
            open,
            cursor: 0,
            policy,
        }
    }

    fn live(&self) -> Vec<usize> {
        (0..self.inputs.len()).filter(|&i| self.open[i]).collect()
    }

    /// Next item from any input. `None` once every input reached end-of-stream.
    fn next(&mut self, timeout: Option<Duration>) -> Result<Option<I>, Halt> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let timed_out = || {
            Halt::Failed(StageError::ReceiveTimeout {
                after_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
            })
        };

        match self.policy {
            FairnessPolicy::ReadyFirst => loop {
                let live = self.live();
                if live.is_empty() {
                    return Ok(None);
                }
                let mut sel = Select::new();
                for &i in &live {
                    sel.recv(self.inputs[i].inner());
                }
                let oper = match deadline {
                    Some(d) => sel.select_deadline(d).map_err(|_| timed_out())?,
                    None => sel.select(),
                };
                let idx = live[oper.index()];
                match oper.recv(self.inputs[idx].inner()) {
                    Ok(item) => return Ok(Some(item)),
                    Err(_) => self.open[idx] = false,
                }
            },
            FairnessPolicy::RoundRobin => loop {
                let n = self.inputs.len();
                for step in 0..n {
                    let idx = (self.cursor + step) % n;
                    if !self.open[idx] {
                        continue;
                    }
                    match self.inputs[idx].try_recv() {
                        Ok(item) => {
                            self.cursor = (idx + 1) % n;
                            return Ok(Some(item));
                        }
                        Err(TryRecvError::Empty) => {}
                        Err(TryRecvError::Disconnected) => self.open[idx] = false,
                    }
                }

                let live = self.live();
                if live.is_empty() {
                    return Ok(None);
                }
                // Nothing buffered: park until an input has an item or closes.
                let mut sel = Select::new();
                for &i in &live {
                    sel.recv(self.inputs[i].inner());
                }
                match deadline {
                    Some(d) => {
                        sel.ready_deadline(d).map_err(|_| timed_out())?;
                    }
                    None => {
                        sel.ready();
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cancel::CancelReason;

    fn context(kind: StageKind) -> StageContext {
        StageContext {
            id: StageId(0),
            name: "test".into(),
            kind,
            cancel: CancelToken::new(),
            fairness: FairnessPolicy::RoundRobin,
            idle_timeout: None,
        }
    }

    fn run<I: Send + 'static, O: Clone + Send + 'static>(
        stage: Stage<I, O>,
        inputs: Vec<ChannelReceiver<I>>,
        outputs: Vec<ChannelSender<O>>,
        ctx: &StageContext,
    ) -> StageReport {
        let parts = stage.into_parts();
        let ports = Arc::new(Mutex::new(Ports { inputs, outputs }));
        Box::new(TypedRunner::new(parts.logic, ports)).run(ctx)
    }

    #[test]
    fn test_transform_stage_closes_output_on_completion() {
        let (in_tx, in_rx) = Channel::bounded(8).split().unwrap();
        let (out_tx, out_rx) = Channel::bounded(8).split().unwrap();
        for i in 0..3 {
            in_tx.send(i).unwrap();
        }
        drop(in_tx);

        let report = run(
            Stage::map("double", |x: i32| x * 2),
            vec![in_rx],
            vec![out_tx],
            &context(StageKind::Transform),
        );

        assert_eq!(report.outcome, StageOutcome::Completed);
        assert_eq!(report.stats.received, 3);
        assert_eq!(report.stats.emitted, 3);
        assert_eq!(out_rx.iter().collect::<Vec<_>>(), vec![0, 2, 4]);
    }

    #[test]
    fn test_failing_transform_does_not_forward_offending_item() {
        let (in_tx, in_rx) = Channel::bounded(8).split().unwrap();
        let (out_tx, out_rx) = Channel::bounded(8).split().unwrap();
        for i in 0..5 {
            in_tx.send(i).unwrap();
        }
        drop(in_tx);

        let stage = Stage::transform("fail-on-2", |x: i32, out: &mut Vec<i32>| {
            out.push(x);
            if x == 2 {
                return Err("two is not allowed".into());
            }
            Ok(())
        });
        let report = run(stage, vec![in_rx], vec![out_tx], &context(StageKind::Transform));

        assert!(matches!(
            report.outcome,
            StageOutcome::Failed(StageError::Transform(_))
        ));
        // Output closed, offending item not forwarded.
        assert_eq!(out_rx.iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_source_observes_cancellation() {
        let (out_tx, out_rx) = Channel::bounded(1).split().unwrap();
        let ctx = context(StageKind::Source);
        let token = ctx.cancel.clone();
        let handle = std::thread::spawn(move || {
            run(Stage::source("forever", 0u64..), vec![], vec![out_tx], &ctx)
        });

        assert_eq!(out_rx.recv(), Some(0));
        token.cancel(CancelReason::Requested);
        let report = handle.join().unwrap();
        assert_eq!(report.outcome, StageOutcome::Cancelled);
        // Whatever was buffered drains, then end-of-stream.
        while out_rx.recv().is_some() {}
    }

    #[test]
    fn test_sink_failure_reports_reason() {
        let (in_tx, in_rx) = Channel::bounded(4).split().unwrap();
        in_tx.send(1).unwrap();
        drop(in_tx);
        let report = run(
            Stage::sink("reject", |_: i32| Err("rejected".into())),
            vec![in_rx],
            vec![],
            &context(StageKind::Sink),
        );
        assert_eq!(
            report.outcome,
            StageOutcome::Failed(StageError::Transform("rejected".into()))
        );
    }

    #[test]
    fn test_idle_timeout_fails_stage() {
        let (_in_tx, in_rx) = Channel::<i32>::bounded(1).split().unwrap();
        let mut ctx = context(StageKind::Sink);
        ctx.idle_timeout = Some(Duration::from_millis(10));
        let report = run(Stage::for_each("idle", |_: i32| {}), vec![in_rx], vec![], &ctx);
        assert_eq!(
            report.outcome,
            StageOutcome::Failed(StageError::ReceiveTimeout { after_ms: 10 })
        );
    }

    #[test]
    fn test_round_robin_alternates_ready_inputs() {
        let (a_tx, a_rx) = Channel::unbounded().split().unwrap();
        let (b_tx, b_rx) = Channel::unbounded().split().unwrap();
        for i in 0..3 {
            a_tx.send(("a", i)).unwrap();
            b_tx.send(("b", i)).unwrap();
        }
        drop(a_tx);
        drop(b_tx);

        let mut set = InputSet::new(vec![a_rx, b_rx], FairnessPolicy::RoundRobin);
        let mut order = Vec::new();
        while let Ok(Some((tag, _))) = set.next(None) {
            order.push(tag);
        }
        assert_eq!(order, vec!["a", "b", "a", "b", "a", "b"]);
    }

    #[test]
    fn test_ready_first_drains_every_input() {
        let (a_tx, a_rx) = Channel::unbounded().split().unwrap();
        let (b_tx, b_rx) = Channel::unbounded().split().unwrap();
        for i in 0..50 {
            a_tx.send(i).unwrap();
            b_tx.send(100 + i).unwrap();
        }
        drop(a_tx);
        drop(b_tx);

        let mut set = InputSet::new(vec![a_rx, b_rx], FairnessPolicy::ReadyFirst);
        let mut seen = Vec::new();
        while let Ok(Some(item)) = set.next(None) {
            seen.push(item);
        }
        assert_eq!(seen.len(), 100);
        // Per-channel FIFO still holds.
        let a: Vec<_> = seen.iter().copied().filter(|&x| x < 100).collect();
        assert_eq!(a, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_broadcast_drops_disconnected_output() {
        let (a_tx, a_rx) = Channel::bounded(4).split().unwrap();
        let (b_tx, b_rx) = Channel::bounded(4).split().unwrap();
        let b_id = b_tx.id();
        drop(a_rx);

        let mut out = Broadcast::new(vec![a_tx, b_tx]);
        assert!(out.send(7, None).is_ok());
        assert_eq!(out.ids(), vec![b_id]);
        assert_eq!(b_rx.try_recv(), Ok(7));

        drop(b_rx);
        assert!(matches!(out.send(8, None), Err(Halt::Cancelled)));
    }

    struct Tripler;

    impl Filter for Tripler {
        type Input = i32;
        type Output = i32;

        fn name(&self) -> &str {
            "tripler"
        }

        fn process(&mut self, item: i32, out: &mut Vec<i32>) -> TransformResult<()> {
            out.push(item * 3);
            Ok(())
        }
    }

    #[test]
    fn test_stage_from_filter_takes_filter_name() {
        let stage = Stage::from_filter(Tripler);
        assert_eq!(stage.name(), "tripler");
        assert_eq!(stage.kind(), StageKind::Transform);
    }
}
