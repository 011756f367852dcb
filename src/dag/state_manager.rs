// src/dag/state_manager.rs

//! Per-run state transitions for the nodes of one phase.

use std::collections::{BTreeMap, HashSet};

use petgraph::graph::NodeIndex;
use tracing::debug;

use crate::dag::graph::{EdgeKind, TaskGraph};
use crate::dag::task_info::{Phase, RunState};

/// Tracks which nodes of a phase are pending, running or finished, and how
/// many ordering edges each pending node still waits on.
///
/// Ordering edges are the edges whose both ends belong to the phase, of
/// either kind. A failed dependency skips its dependents; a post-run edge
/// only waits for its owner to settle, in the primary phase as well.
///
/// Edges coming from outside the phase are already settled.
pub struct StateManager<'a> {
    graph: &'a TaskGraph,
    phase: Phase,
    states: BTreeMap<NodeIndex, RunState>,
    waiting_on: BTreeMap<NodeIndex, usize>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a TaskGraph, members: &HashSet<NodeIndex>, phase: Phase) -> Self {
        let mut states = BTreeMap::new();
        let mut waiting_on = BTreeMap::new();

        for &idx in members {
            let waiting = graph
                .incoming(idx)
                .filter(|(source, _)| members.contains(source))
                .count();
            states.insert(idx, RunState::Pending);
            waiting_on.insert(idx, waiting);
        }

        Self {
            graph,
            phase,
            states,
            waiting_on,
        }
    }

    pub fn state_of(&self, idx: NodeIndex) -> Option<RunState> {
        self.states.get(&idx).copied()
    }

    /// Final states of every member, keyed by index.
    pub fn states(&self) -> impl Iterator<Item = (NodeIndex, RunState)> + '_ {
        self.states.iter().map(|(&idx, &state)| (idx, state))
    }

    /// Pending nodes with nothing left to wait on, up to `limit`, marked
    /// `Running`. Returned in index order.
    pub fn take_ready(&mut self, limit: usize) -> Vec<NodeIndex> {
        let ready: Vec<NodeIndex> = self
            .states
            .iter()
            .filter(|&(idx, state)| {
                *state == RunState::Pending && self.waiting_on.get(idx) == Some(&0)
            })
            .map(|(&idx, _)| idx)
            .take(limit)
            .collect();

        for idx in &ready {
            self.states.insert(*idx, RunState::Running);
        }

        ready
    }

    pub fn mark_succeeded(&mut self, idx: NodeIndex) {
        self.states.insert(idx, RunState::Succeeded);
        self.release_dependents(idx, false);
    }

    /// Mark `idx` as failed and skip every pending node whose dependency
    /// chain goes through it. Returns the newly skipped nodes.
    pub fn mark_failed(&mut self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.states.insert(idx, RunState::Failed);
        self.release_dependents(idx, true)
    }

    /// Skip every node that is still pending. Returns them.
    pub fn skip_remaining(&mut self) -> Vec<NodeIndex> {
        let mut skipped = Vec::new();
        for (idx, state) in self.states.iter_mut() {
            if *state == RunState::Pending {
                *state = RunState::Skipped;
                skipped.push(*idx);
            }
        }
        skipped
    }

    pub fn all_terminal(&self) -> bool {
        self.states.values().all(|state| state.is_terminal())
    }

    /// Resolve the outgoing ordering edges of a node that just settled.
    ///
    /// Dependency edges out of a failed (or skipped) node skip the target;
    /// every other ordering edge counts down the target's wait.
    fn release_dependents(&mut self, settled: NodeIndex, failed: bool) -> Vec<NodeIndex> {
        let mut newly_skipped = Vec::new();
        let mut stack = vec![(settled, failed)];

        while let Some((node, node_failed)) = stack.pop() {
            let edges: Vec<(NodeIndex, EdgeKind)> = self.graph.outgoing(node).collect();

            for (target, kind) in edges {
                if self.states.get(&target) != Some(&RunState::Pending) {
                    continue;
                }

                if node_failed && kind == EdgeKind::Dependency {
                    self.states.insert(target, RunState::Skipped);
                    debug!(
                        task = %self.graph.key_of(target),
                        upstream = %self.graph.key_of(node),
                        phase = %self.phase,
                        "skipping node: a dependency did not complete"
                    );
                    newly_skipped.push(target);
                    stack.push((target, true));
                } else if let Some(waiting) = self.waiting_on.get_mut(&target) {
                    *waiting = waiting.saturating_sub(1);
                }
            }
        }

        newly_skipped
    }
}
