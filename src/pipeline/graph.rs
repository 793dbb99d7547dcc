//! Pipeline graph: stages, channels and the producer → consumer edges
//! between them.
//!
//! Every mutation is checked before it is committed: a call that would bind a
//! channel twice, mismatch a stage kind or close a cycle returns an error and
//! leaves the graph exactly as it was.

use crate::config::EngineConfig;
use crate::pipeline::channel::{Channel, ErasedChannel};
use crate::pipeline::compiled_plan::CompiledPlan;
use crate::pipeline::compiler::PipelineCompiler;
use crate::pipeline::error::{Endpoint, PipelineError, PipelineResult};
use crate::pipeline::id::{ChannelId, StageId};
use crate::pipeline::lock;
use crate::pipeline::stage::{
    FairnessPolicy, Ports, Stage, StageKind, StageRef, StageRunner, TypedRunner,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Lifecycle of a pipeline.
///
/// `Constructed → Validated → Running → {Completed, Failed, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Constructed,
    Validated,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }
}

/// A producer → consumer edge carried by one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub channel: ChannelId,
    pub from: StageId,
    pub to: StageId,
}

/// A registered stage and its type-erased execution loop.
pub(crate) struct StageSlot {
    pub id: StageId,
    pub name: String,
    pub kind: StageKind,
    pub inputs: Vec<ChannelId>,
    pub outputs: Vec<ChannelId>,
    pub fairness: Option<FairnessPolicy>,
    pub idle_timeout: Option<Duration>,
    pub runner: Box<dyn StageRunner>,
}

struct ChannelSlot {
    id: ChannelId,
    producer: Option<StageId>,
    consumers: Vec<StageId>,
    handle: Box<dyn ErasedChannel>,
}

/// The pipeline graph under construction.
pub struct Pipeline {
    stages: Vec<StageSlot>,
    channels: Vec<ChannelSlot>,
    edges: Vec<Edge>,
    state: PipelineState,
    /// Plan from the last successful `validate()`
    plan: Option<CompiledPlan>,
    /// Bumped on every topology change
    generation: u64,
    config: EngineConfig,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            stages: Vec::new(),
            channels: Vec::new(),
            edges: Vec::new(),
            state: PipelineState::Constructed,
            plan: None,
            generation: 0,
            config,
        }
    }

    // ── Graph building ──

    /// Create a channel with the configured default capacity.
    pub fn channel<T: Send + 'static>(&self) -> Channel<T> {
        Channel::bounded(self.config.default_capacity)
    }

    /// Register a stage and bind the channels it declared.
    ///
    /// Edges to stages already attached to those channels are added as well.
    pub fn add_stage<I, O>(&mut self, stage: Stage<I, O>) -> PipelineResult<StageRef<I, O>>
    where
        I: Send + 'static,
        O: Clone + Send + 'static,
    {
        let parts = stage.into_parts();
        let id = StageId(self.stages.len() as u32);

        match parts.kind {
            StageKind::Source if !parts.inputs.is_empty() => {
                return Err(PipelineError::PortMismatch(format!(
                    "source stage '{}' cannot have input channels",
                    parts.name
                )));
            }
            StageKind::Sink if !parts.outputs.is_empty() => {
                return Err(PipelineError::PortMismatch(format!(
                    "sink stage '{}' cannot have output channels",
                    parts.name
                )));
            }
            _ => {}
        }

        let input_ids: Vec<ChannelId> = parts.inputs.iter().map(Channel::id).collect();
        let output_ids: Vec<ChannelId> = parts.outputs.iter().map(Channel::id).collect();
        Self::check_unique(&parts.name, &input_ids)?;
        Self::check_unique(&parts.name, &output_ids)?;
        for channel in &parts.outputs {
            self.check_producer_free(channel.id(), channel.has_sender(), None)?;
        }

        let mut new_edges = Vec::new();
        for &channel in &input_ids {
            if let Some(producer) = self.slot(channel).and_then(|slot| slot.producer) {
                new_edges.push(Edge {
                    channel,
                    from: producer,
                    to: id,
                });
            }
        }
        for &channel in &output_ids {
            let consumers = self.slot(channel).map(|slot| slot.consumers.as_slice());
            for &consumer in consumers.unwrap_or_default() {
                new_edges.push(Edge {
                    channel,
                    from: id,
                    to: consumer,
                });
            }
            if input_ids.contains(&channel) {
                new_edges.push(Edge {
                    channel,
                    from: id,
                    to: id,
                });
            }
        }
        self.check_acyclic(self.stages.len() + 1, &new_edges)?;

        // Receivers first: they can fail without side effects.
        let receivers = parts
            .inputs
            .iter()
            .map(Channel::receiver)
            .collect::<PipelineResult<Vec<_>>>()?;
        let senders = parts
            .outputs
            .iter()
            .map(Channel::sender)
            .collect::<PipelineResult<Vec<_>>>()?;

        // ── Commit ──
        for channel in &parts.inputs {
            let idx = self.register_channel(channel);
            self.channels[idx].consumers.push(id);
        }
        for channel in &parts.outputs {
            let idx = self.register_channel(channel);
            self.channels[idx].producer = Some(id);
        }

        let ports = Arc::new(Mutex::new(Ports {
            inputs: receivers,
            outputs: senders,
        }));
        self.stages.push(StageSlot {
            id,
            name: parts.name,
            kind: parts.kind,
            inputs: input_ids,
            outputs: output_ids,
            fairness: parts.fairness,
            idle_timeout: parts.idle_timeout,
            runner: Box::new(TypedRunner::new(parts.logic, Arc::clone(&ports))),
        });
        self.edges.extend(new_edges);
        self.invalidate();

        tracing::debug!(
            "Added stage {} '{}' ({:?})",
            id,
            self.stages[id.index()].name,
            parts.kind
        );
        Ok(StageRef::new(id, parts.kind, ports))
    }

    /// Connect `producer`'s output to `consumer`'s input through `channel`.
    pub fn connect<A, T, B>(
        &mut self,
        producer: &StageRef<A, T>,
        consumer: &StageRef<T, B>,
        channel: &Channel<T>,
    ) -> PipelineResult<()>
    where
        T: Send + 'static,
    {
        let (from, to) = (producer.id(), consumer.id());
        for stage in [from, to] {
            if stage.index() >= self.stages.len() {
                return Err(PipelineError::InvalidEdge(format!(
                    "stage {} is not part of this pipeline",
                    stage
                )));
            }
        }
        if producer.kind() == StageKind::Sink {
            return Err(PipelineError::PortMismatch(format!(
                "sink stage {} cannot produce into channel {}",
                from,
                channel.id()
            )));
        }
        if consumer.kind() == StageKind::Source {
            return Err(PipelineError::PortMismatch(format!(
                "source stage {} cannot consume from channel {}",
                to,
                channel.id()
            )));
        }

        let slot = self.slot(channel.id());
        let existing_producer = slot.and_then(|s| s.producer);
        let existing_consumers: Vec<StageId> =
            slot.map(|s| s.consumers.clone()).unwrap_or_default();
        self.check_producer_free(channel.id(), channel.has_sender(), Some(from))?;

        let new_producer = existing_producer.is_none();
        let new_consumer = !existing_consumers.contains(&to);
        if !new_producer && !new_consumer {
            return Ok(());
        }

        let mut new_edges = Vec::new();
        if new_producer {
            for &c in &existing_consumers {
                new_edges.push(Edge {
                    channel: channel.id(),
                    from,
                    to: c,
                });
            }
        }
        if new_consumer {
            new_edges.push(Edge {
                channel: channel.id(),
                from,
                to,
            });
        }
        self.check_acyclic(self.stages.len(), &new_edges)?;

        let receiver = if new_consumer {
            Some(channel.receiver()?)
        } else {
            None
        };
        let sender = if new_producer {
            Some(channel.sender()?)
        } else {
            None
        };

        // ── Commit ──
        let idx = self.register_channel(channel);
        if let Some(rx) = receiver {
            lock(&consumer.ports).inputs.push(rx);
            self.channels[idx].consumers.push(to);
            self.stages[to.index()].inputs.push(channel.id());
        }
        if let Some(tx) = sender {
            lock(&producer.ports).outputs.push(tx);
            self.channels[idx].producer = Some(from);
            self.stages[from.index()].outputs.push(channel.id());
        }
        self.edges.extend(new_edges);
        self.invalidate();

        tracing::debug!("Connected {} -> {} via channel {}", from, to, channel.id());
        Ok(())
    }

    // ── Validation ──

    /// Check the graph and compile its execution plan.
    pub fn validate(&mut self) -> PipelineResult<&CompiledPlan> {
        if self.stages.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }

        for slot in &self.channels {
            if slot.producer.is_none() {
                return Err(PipelineError::DanglingChannel {
                    channel: slot.id,
                    missing: Endpoint::Producer,
                });
            }
            if slot.consumers.is_empty() {
                return Err(PipelineError::DanglingChannel {
                    channel: slot.id,
                    missing: Endpoint::Consumer,
                });
            }
        }

        let kinds: Vec<StageKind> = self.stages.iter().map(|s| s.kind).collect();
        let plan = PipelineCompiler::compile(&kinds, &self.edges, self.generation);

        if !plan.is_acyclic() {
            let scheduled: Vec<StageId> = plan.order.clone();
            let edge = self
                .edges
                .iter()
                .find(|e| !scheduled.contains(&e.from) && !scheduled.contains(&e.to));
            let (from, to) = edge.map_or((StageId::INVALID, StageId::INVALID), |e| (e.from, e.to));
            return Err(PipelineError::CycleDetected { from, to });
        }

        if let Some(stage) = plan.first_unreachable() {
            return Err(PipelineError::UnreachableStage {
                stage,
                name: self.stages[stage.index()].name.clone(),
            });
        }

        for slot in &self.stages {
            if slot.kind == StageKind::Source && slot.outputs.is_empty() {
                tracing::warn!(
                    "Source stage '{}' ({}) has no output channels; its items are discarded",
                    slot.name,
                    slot.id
                );
            }
        }

        tracing::info!(
            "Pipeline validated: {} stages, {} channels, {} edges (gen {})",
            plan.stats.total_stages,
            self.channels.len(),
            plan.stats.edge_count,
            plan.generation,
        );

        self.state = PipelineState::Validated;
        Ok(self.plan.insert(plan))
    }

    // ── Accessors ──

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn plan(&self) -> Option<&CompiledPlan> {
        self.plan.as_ref()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn stage_name(&self, id: StageId) -> Option<&str> {
        self.stages.get(id.index()).map(|s| s.name.as_str())
    }

    pub fn stage_kind(&self, id: StageId) -> Option<StageKind> {
        self.stages.get(id.index()).map(|s| s.kind)
    }

    /// Seal every channel and hand the stages over for execution.
    pub(crate) fn into_stages(self) -> Vec<StageSlot> {
        for slot in &self.channels {
            slot.handle.seal();
        }
        self.stages
    }

    // ── Internals ──

    fn invalidate(&mut self) {
        self.generation += 1;
        self.plan = None;
        self.state = PipelineState::Constructed;
    }

    fn slot(&self, channel: ChannelId) -> Option<&ChannelSlot> {
        self.channels.iter().find(|slot| slot.id == channel)
    }

    fn register_channel<T: Send + 'static>(&mut self, channel: &Channel<T>) -> usize {
        if let Some(idx) = self.channels.iter().position(|s| s.id == channel.id()) {
            return idx;
        }
        self.channels.push(ChannelSlot {
            id: channel.id(),
            producer: None,
            consumers: Vec::new(),
            handle: Box::new(channel.clone()),
        });
        self.channels.len() - 1
    }

    fn check_unique(stage: &str, channels: &[ChannelId]) -> PipelineResult<()> {
        for (i, id) in channels.iter().enumerate() {
            if channels[..i].contains(id) {
                return Err(PipelineError::InvalidEdge(format!(
                    "stage '{}' binds channel {} twice",
                    stage, id
                )));
            }
        }
        Ok(())
    }

    /// A channel has exactly one producer. `Some(stage)` re-binding the same
    /// producer is accepted.
    fn check_producer_free(
        &self,
        channel: ChannelId,
        has_sender: bool,
        stage: Option<StageId>,
    ) -> PipelineResult<()> {
        match self.slot(channel).and_then(|s| s.producer) {
            Some(existing) if Some(existing) == stage => Ok(()),
            Some(existing) => Err(PipelineError::InvalidEdge(format!(
                "channel {} already has producer {}",
                channel, existing
            ))),
            None if !has_sender => Err(PipelineError::InvalidEdge(format!(
                "producer endpoint of channel {} is already taken",
                channel
            ))),
            None => Ok(()),
        }
    }

    fn check_acyclic(&self, stage_count: usize, new_edges: &[Edge]) -> PipelineResult<()> {
        let mut edges: Vec<(usize, usize)> = self
            .edges
            .iter()
            .map(|e| (e.from.index(), e.to.index()))
            .collect();
        for edge in new_edges {
            let (from, to) = (edge.from.index(), edge.to.index());
            if PipelineCompiler::would_create_cycle(stage_count, &edges, from, to) {
                tracing::warn!("Rejected edge {} -> {}: would create a cycle", edge.from, edge.to);
                return Err(PipelineError::CycleDetected {
                    from: edge.from,
                    to: edge.to,
                });
            }
            edges.push((from, to));
        }
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .field("channels", &self.channels.len())
            .field("edges", &self.edges)
            .field("state", &self.state)
            .finish()
    }
}
