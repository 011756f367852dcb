// src/dag/graph.rs

//! Arena of task items with typed edges.
//!
//! Nodes live in a petgraph `DiGraph` and refer to each other through
//! `NodeIndex`, never through direct references. Every edge points from the
//! node that must finish first to the node that waits:
//!
//! - `Dependency`: `dep -> dependent` (the dependent needs the dep's result)
//! - `PostRun`: `owner -> post_run_dependent`
//!
//! Nodes are never removed, so indices stay stable across clones.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::dag::task_item::TaskItem;
use crate::errors::{Result, TaskGraphError};
use crate::types::TaskKey;

/// Kind of an edge between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Dependency,
    PostRun,
}

#[derive(Clone)]
pub(crate) struct TaskNode {
    key: TaskKey,
    item: Arc<dyn TaskItem>,
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Key-indexed arena of task items.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    graph: DiGraph<TaskNode, EdgeKind>,
    index: HashMap<TaskKey, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|node| node.key.as_str())
    }

    pub fn node_index(&self, key: &str) -> Option<NodeIndex> {
        self.index.get(key).copied()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn key_of(&self, idx: NodeIndex) -> &str {
        &self.graph[idx].key
    }

    pub fn item(&self, idx: NodeIndex) -> &Arc<dyn TaskItem> {
        &self.graph[idx].item
    }

    /// Insert `item`, or return the node already registered under its key.
    pub fn ensure_node(&mut self, item: Arc<dyn TaskItem>) -> NodeIndex {
        if let Some(&idx) = self.index.get(item.key()) {
            debug!(task = %item.key(), "key already present; reusing existing node");
            return idx;
        }

        let key = item.key().to_string();
        let idx = self.graph.add_node(TaskNode {
            key: key.clone(),
            item,
        });
        self.index.insert(key, idx);
        idx
    }

    /// Add `before -> after` unless an edge of the same kind exists.
    ///
    /// Acyclicity is not checked here; see [`TaskGraph::validate_acyclic`].
    pub fn add_edge(&mut self, before: NodeIndex, after: NodeIndex, kind: EdgeKind) {
        let exists = self
            .graph
            .edges_connecting(before, after)
            .any(|edge| *edge.weight() == kind);
        if !exists {
            self.graph.add_edge(before, after, kind);
        }
    }

    /// Copy every node and edge of `other` into this arena.
    ///
    /// Nodes whose key already exists here are reused. Returns the mapping
    /// from `other`'s indices to indices in this arena.
    pub fn absorb(&mut self, other: &TaskGraph) -> HashMap<NodeIndex, NodeIndex> {
        let mapping: HashMap<NodeIndex, NodeIndex> = other
            .graph
            .node_indices()
            .map(|idx| (idx, self.ensure_node(Arc::clone(other.item(idx)))))
            .collect();

        for edge in other.graph.edge_references() {
            self.add_edge(mapping[&edge.source()], mapping[&edge.target()], *edge.weight());
        }

        mapping
    }

    /// Fail with [`TaskGraphError::DagCycle`] if the edges form a cycle.
    ///
    /// Both edge kinds take part: a node cannot be needed before and run
    /// after the same owner.
    pub fn validate_acyclic(&self) -> Result<()> {
        self.topological_order().map(|_| ())
    }

    /// A valid execution order over all nodes.
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>> {
        toposort(&self.graph, None).map_err(|cycle| {
            TaskGraphError::DagCycle(format!(
                "cycle detected in task graph involving task '{}'",
                self.key_of(cycle.node_id())
            ))
        })
    }

    /// Immediate dependencies of `idx`.
    pub fn dependencies_of(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(idx, Direction::Incoming, EdgeKind::Dependency)
    }

    /// Immediate dependents of `idx`.
    pub fn dependents_of(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(idx, Direction::Outgoing, EdgeKind::Dependency)
    }

    /// Immediate post-run dependents of `idx`.
    pub fn post_run_dependents_of(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(idx, Direction::Outgoing, EdgeKind::PostRun)
    }

    /// Edges into `idx` as `(source, kind)`.
    pub fn incoming(&self, idx: NodeIndex) -> impl Iterator<Item = (NodeIndex, EdgeKind)> + '_ {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|edge| (edge.source(), *edge.weight()))
    }

    /// Edges out of `idx` as `(target, kind)`.
    pub fn outgoing(&self, idx: NodeIndex) -> impl Iterator<Item = (NodeIndex, EdgeKind)> + '_ {
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge| (edge.target(), *edge.weight()))
    }

    /// `root` plus every node it depends on, transitively.
    pub fn dependency_closure(&self, root: NodeIndex) -> HashSet<NodeIndex> {
        let mut seen = HashSet::new();
        let mut stack = vec![root];

        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            stack.extend(self.dependencies_of(idx));
        }

        seen
    }

    fn neighbors(&self, idx: NodeIndex, dir: Direction, kind: EdgeKind) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, dir)
            .filter(|edge| *edge.weight() == kind)
            .map(|edge| match dir {
                Direction::Incoming => edge.source(),
                Direction::Outgoing => edge.target(),
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }
}
