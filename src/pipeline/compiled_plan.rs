use crate::pipeline::id::StageId;

/// Compiled execution plan for a pipeline graph.
/// Produced by `Pipeline::validate()`; read-only afterwards.
#[derive(Debug, Clone)]
pub struct CompiledPlan {
    /// Stages in topological order
    pub order: Vec<StageId>,

    /// Pre-computed edge routing (producer, consumer)
    pub edges: Vec<(StageId, StageId)>,

    /// Per-stage forward reachability from any source, indexed by `StageId`
    pub reachable: Vec<bool>,

    /// Stages with no inputs
    pub sources: Vec<StageId>,

    /// Stages with no outputs
    pub sinks: Vec<StageId>,

    /// Graph generation this plan was compiled from
    pub generation: u64,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default)]
pub struct PlanStats {
    /// Total number of stages in the graph
    pub total_stages: usize,

    /// Number of stages reachable from a source
    pub reachable_stages: usize,

    /// Number of source stages (no inputs)
    pub source_stages: usize,

    /// Number of sink stages (no outputs)
    pub sink_stages: usize,

    /// Number of producer → consumer edges
    pub edge_count: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl CompiledPlan {
    /// Create a new empty compiled plan
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            edges: Vec::new(),
            reachable: Vec::new(),
            sources: Vec::new(),
            sinks: Vec::new(),
            generation: 0,
            stats: PlanStats::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether every stage made it into the topological order.
    pub fn is_acyclic(&self) -> bool {
        self.order.len() == self.stats.total_stages
    }

    /// First stage (by id) that no source reaches.
    pub fn first_unreachable(&self) -> Option<StageId> {
        self.reachable
            .iter()
            .position(|&r| !r)
            .map(|idx| StageId(idx as u32))
    }

    /// Position of `stage` in the topological order.
    pub fn position(&self, stage: StageId) -> Option<usize> {
        self.order.iter().position(|&s| s == stage)
    }
}

impl Default for CompiledPlan {
    fn default() -> Self {
        Self::new()
    }
}
