use super::compiled_plan::{CompiledPlan, PlanStats};
use super::graph::Edge;
use super::id::StageId;
use super::stage::StageKind;
use std::collections::VecDeque;

/// Compiles a pipeline graph into an execution plan
pub struct PipelineCompiler;

impl PipelineCompiler {
    /// Compile a pipeline graph into an execution plan.
    ///
    /// Computes a topological order (Kahn's algorithm) and forward
    /// reachability from every source stage. A graph with a cycle yields a
    /// plan whose `order` is shorter than the stage count.
    ///
    /// # Arguments
    /// * `kinds` - Kind of every stage, indexed by `StageId`
    /// * `edges` - All producer → consumer edges
    /// * `generation` - Generation counter of the graph
    pub fn compile(kinds: &[StageKind], edges: &[Edge], generation: u64) -> CompiledPlan {
        let start_time = std::time::Instant::now();

        let n = kinds.len();
        if n == 0 {
            return CompiledPlan {
                generation,
                ..CompiledPlan::new()
            };
        }

        let fwd_adj = Self::build_adjacency(n, edges);

        let sources: Vec<usize> = Self::stages_of_kind(kinds, StageKind::Source);
        let sinks: Vec<usize> = Self::stages_of_kind(kinds, StageKind::Sink);

        let reachable = Self::forward_reachability(&sources, &fwd_adj, n);
        let order = Self::topological_sort(&fwd_adj, n);

        let compile_time_us = start_time.elapsed().as_micros() as u64;

        let stats = PlanStats {
            total_stages: n,
            reachable_stages: reachable.iter().filter(|&&r| r).count(),
            source_stages: sources.len(),
            sink_stages: sinks.len(),
            edge_count: edges.len(),
            compile_time_us,
        };

        CompiledPlan {
            order: order.into_iter().map(Self::id).collect(),
            edges: edges.iter().map(|e| (e.from, e.to)).collect(),
            reachable,
            sources: sources.into_iter().map(Self::id).collect(),
            sinks: sinks.into_iter().map(Self::id).collect(),
            generation,
            stats,
        }
    }

    /// Check if adding an edge from `from` to `to` would create a cycle.
    ///
    /// `n` is the stage count; `edges` are `(from, to)` index pairs.
    pub fn would_create_cycle(n: usize, edges: &[(usize, usize)], from: usize, to: usize) -> bool {
        if from == to {
            return true;
        }
        // If `to` can reach `from` through existing edges, adding from->to creates a cycle.
        let mut visited = vec![false; n];
        let mut stack = vec![to];

        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if current >= n || visited[current] {
                continue;
            }
            visited[current] = true;

            for &(a, b) in edges {
                if a == current {
                    stack.push(b);
                }
            }
        }
        false
    }

    fn id(idx: usize) -> StageId {
        StageId(idx as u32)
    }

    fn stages_of_kind(kinds: &[StageKind], kind: StageKind) -> Vec<usize> {
        kinds
            .iter()
            .enumerate()
            .filter(|&(_, &k)| k == kind)
            .map(|(idx, _)| idx)
            .collect()
    }

    fn build_adjacency(n: usize, edges: &[Edge]) -> Vec<Vec<usize>> {
        let mut fwd_adj = vec![Vec::new(); n];
        for edge in edges {
            let from = edge.from.index();
            let to = edge.to.index();
            if from < n && to < n {
                fwd_adj[from].push(to);
            }
        }
        fwd_adj
    }

    /// Perform forward reachability analysis from sources using DFS
    fn forward_reachability(sources: &[usize], fwd_adj: &[Vec<usize>], n: usize) -> Vec<bool> {
        let mut reachable = vec![false; n];
        let mut stack = Vec::new();

        for &src in sources {
            reachable[src] = true;
            stack.push(src);
        }

        while let Some(stage) = stack.pop() {
            for &neighbor in &fwd_adj[stage] {
                if !reachable[neighbor] {
                    reachable[neighbor] = true;
                    stack.push(neighbor);
                }
            }
        }

        reachable
    }

    /// Topological sort using Kahn's algorithm. Ties resolve by stage id.
    fn topological_sort(fwd_adj: &[Vec<usize>], n: usize) -> Vec<usize> {
        let mut in_degree = vec![0usize; n];
        for targets in fwd_adj {
            for &to in targets {
                in_degree[to] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(n);

        while let Some(stage) = queue.pop_front() {
            result.push(stage);
            for &neighbor in &fwd_adj[stage] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        result
    }
}
