//! Instance-level dependency graph.
//!
//! Template-level `needs` declarations are resolved here into instance-level
//! edges: an instance depends on every instance of every template it names.
//! After a successful build the node set is fixed; the only mutation is
//! marking nodes terminal, which synchronously propagates cancellation.

use capstan_core::error::ConfigError;
use capstan_core::ids::InstanceId;
use capstan_core::instance::JobInstance;
use capstan_core::report::Outcome;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Scheduling position per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Dispatched,
    Done(Outcome),
}

/// Policy knobs for cancellation propagation.
#[derive(Debug, Clone, Copy)]
pub struct GraphPolicy {
    /// Whether an `always` job still runs when an upstream job was
    /// cancelled (as opposed to failed). The common CI reading is yes.
    pub run_always_after_cancelled: bool,
}

impl Default for GraphPolicy {
    fn default() -> Self {
        Self {
            run_always_after_cancelled: true,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

struct Node {
    instance: JobInstance,
    state: NodeState,
}

/// DAG over job instances. Edge A -> B means B needs A.
pub struct InstanceGraph {
    graph: DiGraph<Node, ()>,
    index: HashMap<InstanceId, NodeIndex>,
    policy: GraphPolicy,
}

impl InstanceGraph {
    /// Build the graph, resolving `needs` fan-out and rejecting unknown
    /// dependencies and cycles before anything can execute.
    pub fn build(instances: Vec<JobInstance>, policy: GraphPolicy) -> Result<Self, ConfigError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut by_template: HashMap<String, Vec<NodeIndex>> = HashMap::new();

        for instance in instances {
            let id = instance.id.clone();
            let template = id.job().to_string();
            let idx = graph.add_node(Node {
                instance,
                state: NodeState::Pending,
            });
            index.insert(id, idx);
            by_template.entry(template).or_default().push(idx);
        }

        let nodes: Vec<NodeIndex> = graph.node_indices().collect();
        for idx in nodes {
            let needs = graph[idx].instance.needs.clone();
            let job = graph[idx].instance.id.job().to_string();
            for need in needs {
                let deps = by_template
                    .get(&need)
                    .ok_or_else(|| ConfigError::UnknownDependency {
                        job: job.clone(),
                        needs: need.clone(),
                    })?;
                for &dep in deps {
                    graph.add_edge(dep, idx, ());
                }
            }
        }

        let built = Self {
            graph,
            index,
            policy,
        };
        built.check_acyclic()?;
        Ok(built)
    }

    /// DFS with a visiting marker; on a back edge the offending node
    /// sequence is reported by template name.
    fn check_acyclic(&self) -> Result<(), ConfigError> {
        let mut color = vec![Color::White; self.graph.node_count()];
        let mut path = Vec::new();

        for start in self.graph.node_indices() {
            if color[start.index()] == Color::White
                && let Some(cycle) = self.dfs_cycle(start, &mut color, &mut path)
            {
                let names = cycle
                    .iter()
                    .map(|&i| self.graph[i].instance.id.job().to_string())
                    .collect();
                return Err(ConfigError::DependencyCycle(names));
            }
        }
        Ok(())
    }

    fn dfs_cycle(
        &self,
        idx: NodeIndex,
        color: &mut [Color],
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        color[idx.index()] = Color::Gray;
        path.push(idx);

        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
            match color[neighbor.index()] {
                Color::Gray => {
                    // Back edge: the cycle runs from the neighbor's position
                    // on the current path back to itself.
                    let start = path.iter().position(|&p| p == neighbor).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(neighbor);
                    return Some(cycle);
                }
                Color::White => {
                    if let Some(cycle) = self.dfs_cycle(neighbor, color, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        path.pop();
        color[idx.index()] = Color::Black;
        None
    }

    /// Instances whose dependencies are all terminal and permit a start,
    /// and that have not been dispatched yet.
    pub fn ready(&self) -> Vec<InstanceId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph[idx].state == NodeState::Pending && self.deps_allow_start(idx)
            })
            .map(|idx| self.graph[idx].instance.id.clone())
            .collect()
    }

    fn deps_allow_start(&self, idx: NodeIndex) -> bool {
        let runs_always = self.graph[idx].instance.runs_always();
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .all(|dep| match self.graph[dep].state {
                NodeState::Done(outcome) => runs_always || outcome.is_success(),
                _ => false,
            })
    }

    /// Whether the instance has neither been dispatched nor finished.
    pub fn is_pending(&self, id: &InstanceId) -> bool {
        self.index
            .get(id)
            .is_some_and(|&idx| self.graph[idx].state == NodeState::Pending)
    }

    pub fn mark_dispatched(&mut self, id: &InstanceId) {
        if let Some(&idx) = self.index.get(id)
            && self.graph[idx].state == NodeState::Pending
        {
            self.graph[idx].state = NodeState::Dispatched;
        }
    }

    /// Record a terminal outcome. Idempotent: the first terminal state
    /// sticks. Cancellation of dependents propagates transitively and
    /// synchronously before this returns.
    pub fn mark_complete(&mut self, id: &InstanceId, outcome: Outcome) {
        let Some(&idx) = self.index.get(id) else {
            return;
        };
        if matches!(self.graph[idx].state, NodeState::Done(_)) {
            return;
        }
        self.graph[idx].state = NodeState::Done(outcome);
        self.propagate_cancellations();
    }

    fn propagate_cancellations(&mut self) {
        loop {
            let to_cancel: Vec<NodeIndex> = self
                .graph
                .node_indices()
                .filter(|&idx| {
                    self.graph[idx].state == NodeState::Pending && self.should_cancel(idx)
                })
                .collect();
            if to_cancel.is_empty() {
                break;
            }
            for idx in to_cancel {
                self.graph[idx].state = NodeState::Done(Outcome::Cancelled);
            }
        }
    }

    fn should_cancel(&self, idx: NodeIndex) -> bool {
        let runs_always = self.graph[idx].instance.runs_always();
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .any(|dep| match self.graph[dep].state {
                NodeState::Done(outcome) => {
                    if runs_always {
                        !self.policy.run_always_after_cancelled && outcome == Outcome::Cancelled
                    } else {
                        !outcome.is_success()
                    }
                }
                _ => false,
            })
    }

    /// Whether every instance has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.graph
            .node_indices()
            .all(|idx| matches!(self.graph[idx].state, NodeState::Done(_)))
    }

    /// Snapshot of all terminal outcomes so far.
    pub fn outcomes(&self) -> Vec<(InstanceId, Outcome)> {
        self.graph
            .node_indices()
            .filter_map(|idx| match self.graph[idx].state {
                NodeState::Done(outcome) => {
                    Some((self.graph[idx].instance.id.clone(), outcome))
                }
                _ => None,
            })
            .collect()
    }

    pub fn instance(&self, id: &InstanceId) -> Option<&JobInstance> {
        self.index.get(id).map(|&idx| &self.graph[idx].instance)
    }

    pub fn instances(&self) -> impl Iterator<Item = &JobInstance> {
        self.graph
            .node_indices()
            .map(|idx| &self.graph[idx].instance)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
