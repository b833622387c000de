use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use fixedbitset::FixedBitSet;

/// Error returned when system ordering constraints form a cycle.
#[derive(Debug, Clone)]
pub struct CycleError {
    /// Indices of the nodes still blocked when propagation stalled.
    pub nodes: Vec<usize>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dependency cycle detected among systems {:?}",
            self.nodes
        )
    }
}

impl std::error::Error for CycleError {}

/// A directed graph of system ordering constraints.
///
/// Nodes are system indices `0..n`; an edge `u → v` means `u` must finish
/// before `v` may start. Build with [`init_nodes`](Self::init_nodes) and
/// [`add_dependency`](Self::add_dependency), then
/// [`finalize`](Self::finalize) to compute successor lists and initial
/// predecessor counts and to reject cycles.
pub struct DependencyGraph {
    successors: Vec<Vec<usize>>,
    /// Bit `v` of row `u` set iff edge `u → v` exists; keeps duplicate
    /// `add_dependency` calls from inflating predecessor counts.
    edges: Vec<FixedBitSet>,
    predecessor_counts: Vec<usize>,
    finalized: bool,
}

impl DependencyGraph {
    /// Creates an empty graph; call [`init_nodes`](Self::init_nodes) next.
    pub fn new() -> Self {
        Self {
            successors: Vec::new(),
            edges: Vec::new(),
            predecessor_counts: Vec::new(),
            finalized: false,
        }
    }

    /// Allocates `count` nodes, discarding any previous structure.
    pub fn init_nodes(&mut self, count: usize) {
        self.successors = vec![Vec::new(); count];
        self.edges = vec![FixedBitSet::with_capacity(count); count];
        self.predecessor_counts = vec![0; count];
        self.finalized = false;
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.successors.len()
    }

    /// Adds the edge `before → after`. Duplicate edges are ignored.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range, on a self-edge, or after
    /// [`finalize`](Self::finalize).
    pub fn add_dependency(&mut self, before: usize, after: usize) {
        assert!(!self.finalized, "graph is already finalized");
        assert!(
            before < self.node_count() && after < self.node_count(),
            "dependency ({before} -> {after}) references a node out of range"
        );
        assert_ne!(before, after, "a system cannot depend on itself");

        if self.edges[before].contains(after) {
            return;
        }
        self.edges[before].insert(after);
        self.successors[before].push(after);
        self.predecessor_counts[after] += 1;
    }

    /// Returns whether the edge `before → after` exists.
    pub fn has_dependency(&self, before: usize, after: usize) -> bool {
        self.edges[before].contains(after)
    }

    /// Validates the graph and freezes it.
    ///
    /// Runs a topological propagation over the predecessor counts; if any
    /// node is never released the constraints are cyclic and the blocked
    /// nodes are reported.
    pub fn finalize(&mut self) -> Result<(), CycleError> {
        let count = self.node_count();
        let mut remaining = self.predecessor_counts.clone();
        let mut queue: VecDeque<usize> = (0..count).filter(|&n| remaining[n] == 0).collect();
        let mut released = 0;

        while let Some(node) = queue.pop_front() {
            released += 1;
            for &successor in &self.successors[node] {
                remaining[successor] -= 1;
                if remaining[successor] == 0 {
                    queue.push_back(successor);
                }
            }
        }

        if released != count {
            let nodes = (0..count).filter(|&n| remaining[n] > 0).collect();
            return Err(CycleError { nodes });
        }
        self.finalized = true;
        Ok(())
    }

    /// Returns whether [`finalize`](Self::finalize) succeeded.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Successors of `node`.
    pub fn successors(&self, node: usize) -> &[usize] {
        &self.successors[node]
    }

    /// Number of direct predecessors of `node`.
    pub fn predecessor_count(&self, node: usize) -> usize {
        self.predecessor_counts[node]
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution state of one node during a tick.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum NodeState {
    Pending,
    Ready,
    Running,
    Done,
}

/// Per-tick runtime state over a finalized [`DependencyGraph`].
///
/// Create a fresh tracer each tick. A node is *ready* when all its
/// predecessors are done and it has not been started; the scheduler pulls
/// ready nodes, marks them running, and reports them finished, which may
/// release successors.
pub struct DependencyTracer {
    graph: Arc<DependencyGraph>,
    states: Vec<NodeState>,
    remaining_predecessors: Vec<usize>,
    done_count: usize,
}

impl DependencyTracer {
    /// Creates a tracer with every zero-predecessor node ready.
    ///
    /// # Panics
    ///
    /// Panics if the graph was not finalized.
    pub fn new(graph: Arc<DependencyGraph>) -> Self {
        assert!(
            graph.is_finalized(),
            "tracer requires a finalized dependency graph"
        );
        let count = graph.node_count();
        let states = (0..count)
            .map(|node| {
                if graph.predecessor_count(node) == 0 {
                    NodeState::Ready
                } else {
                    NodeState::Pending
                }
            })
            .collect();
        let remaining_predecessors = (0..count).map(|n| graph.predecessor_count(n)).collect();
        Self {
            graph,
            states,
            remaining_predecessors,
            done_count: 0,
        }
    }

    /// Returns every node currently ready to run.
    pub fn ready_systems(&self) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, &state)| state == NodeState::Ready)
            .map(|(node, _)| node)
            .collect()
    }

    /// Marks a ready node as running; it disappears from
    /// [`ready_systems`](Self::ready_systems) until finished.
    ///
    /// # Panics
    ///
    /// Panics if the node is not ready.
    pub fn mark_running(&mut self, node: usize) {
        assert_eq!(
            self.states[node],
            NodeState::Ready,
            "system {node} started while not ready"
        );
        self.states[node] = NodeState::Running;
    }

    /// Marks a running node done, releasing successors whose predecessors
    /// have all finished.
    ///
    /// # Panics
    ///
    /// Panics if the node is not running.
    pub fn mark_finished(&mut self, node: usize) {
        assert_eq!(
            self.states[node],
            NodeState::Running,
            "system {node} finished while not running"
        );
        self.states[node] = NodeState::Done;
        self.done_count += 1;

        let graph = Arc::clone(&self.graph);
        for &successor in graph.successors(node) {
            self.remaining_predecessors[successor] -= 1;
            if self.remaining_predecessors[successor] == 0 {
                debug_assert_eq!(self.states[successor], NodeState::Pending);
                self.states[successor] = NodeState::Ready;
            }
        }
    }

    /// Returns whether every node is done.
    pub fn is_complete(&self) -> bool {
        self.done_count == self.graph.node_count()
    }
}
