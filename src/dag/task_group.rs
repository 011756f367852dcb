// src/dag/task_group.rs

//! Owner-rooted dependency graph and its invocation entry point.

use std::collections::HashSet;
use std::sync::Arc;

use petgraph::graph::NodeIndex;
use tracing::{debug, info, warn};

use crate::config::GraphOptions;
use crate::dag::context::InvocationContext;
use crate::dag::graph::{EdgeKind, TaskGraph};
use crate::dag::scheduler::{run_after_settlement, run_phase};
use crate::dag::task_info::Phase;
use crate::dag::task_item::{Produced, TaskItem};
use crate::errors::{Result, TaskGraphError};
use crate::types::{GroupState, TaskKey};

/// Anything that owns a task group and can be merged into another one.
pub trait HasTaskGroup {
    fn task_group(&self) -> &TaskGroup;
}

/// A DAG of task items with one designated root: the item that owns it.
///
/// The group is responsible for:
/// - inserting items and merging other groups, idempotently by key
/// - rejecting edges that would introduce a cycle, leaving the graph as it was
/// - running late-bound wiring hooks before an invocation
/// - running the primary phase, then the post-run phase, then the
///   after-settlement hooks
///
/// The value of an invocation is the root's produced value.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    root: NodeIndex,
    graph: TaskGraph,
    state: GroupState,
    options: GraphOptions,
}

impl HasTaskGroup for TaskGroup {
    fn task_group(&self) -> &TaskGroup {
        self
    }
}

impl TaskGroup {
    pub fn new(root: Arc<dyn TaskItem>) -> Self {
        let mut graph = TaskGraph::new();
        let root = graph.ensure_node(root);
        Self {
            root,
            graph,
            state: GroupState::Built,
            options: GraphOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GraphOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    /// Key of the root item.
    pub fn key(&self) -> &str {
        self.graph.key_of(self.root)
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.graph.contains(key)
    }

    pub fn keys(&self) -> Vec<TaskKey> {
        self.graph.keys().map(str::to_string).collect()
    }

    /// Add `item` as a dependency of the root.
    ///
    /// If a node with the same key exists it is reused and its key returned.
    pub fn add_dependency(&mut self, item: Arc<dyn TaskItem>) -> Result<TaskKey> {
        self.ensure_idle()?;
        self.attach_item(self.root, item, EdgeKind::Dependency)
    }

    /// Merge `group` as a dependency subtree of the root. Returns the key of
    /// the merged group's root, usable to read its result.
    pub fn add_dependency_task_group(&mut self, group: &TaskGroup) -> Result<TaskKey> {
        self.ensure_idle()?;
        self.attach_group(self.root, group, EdgeKind::Dependency)
    }

    /// Add `item` to run once the root has settled.
    pub fn add_post_run_dependent(&mut self, item: Arc<dyn TaskItem>) -> Result<TaskKey> {
        self.ensure_idle()?;
        self.attach_item(self.root, item, EdgeKind::PostRun)
    }

    /// Merge `group` to run once the root has settled.
    pub fn add_post_run_dependent_task_group(&mut self, group: &TaskGroup) -> Result<TaskKey> {
        self.ensure_idle()?;
        self.attach_group(self.root, group, EdgeKind::PostRun)
    }

    pub fn dependencies_of(&self, key: &str) -> Vec<TaskKey> {
        self.related(key, TaskGraph::dependencies_of)
    }

    pub fn dependents_of(&self, key: &str) -> Vec<TaskKey> {
        self.related(key, TaskGraph::dependents_of)
    }

    pub fn post_run_dependents_of(&self, key: &str) -> Vec<TaskKey> {
        self.related(key, TaskGraph::post_run_dependents_of)
    }

    /// A valid order over all keys (dependencies and post-run owners first).
    pub fn invocation_order(&self) -> Result<Vec<TaskKey>> {
        Ok(self
            .graph
            .topological_order()?
            .into_iter()
            .map(|idx| self.graph.key_of(idx).to_string())
            .collect())
    }

    /// Fresh context for one invocation of this group.
    pub fn new_invocation_context(&self) -> InvocationContext {
        InvocationContext::new(self.options.fault_strategy)
    }

    /// Execute the graph and return the root's produced value.
    ///
    /// Fails with [`TaskGraphError::Faulted`] carrying the first recorded
    /// failure if the root did not complete. Post-run failures never change
    /// the result; read them from `ctx`.
    ///
    /// `ctx` must be unused: a context that already drove an invocation is
    /// rejected with [`TaskGraphError::ContextReused`].
    pub async fn invoke(&mut self, ctx: &InvocationContext) -> Result<Produced> {
        self.ensure_idle()?;
        if !ctx.start() {
            warn!(group = %self.key(), run_id = ctx.run_id(), "invocation context reused");
            return Err(TaskGraphError::ContextReused(ctx.run_id()));
        }
        self.run_before_invoke_hooks()?;

        let root_key = self.key().to_string();
        info!(
            group = %root_key,
            run_id = ctx.run_id(),
            nodes = self.graph.len(),
            "invoking task group"
        );

        self.state = GroupState::Running;
        let primary = self.graph.dependency_closure(self.root);
        let post_run: HashSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| !primary.contains(idx))
            .collect();

        let summary = run_phase(&self.graph, &primary, Phase::Primary, ctx, &self.options).await;

        self.state = GroupState::Settled;
        debug!(
            group = %root_key,
            run_id = ctx.run_id(),
            faulted = ctx.is_faulted(),
            post_run = post_run.len(),
            "primary phase settled"
        );

        run_phase(&self.graph, &post_run, Phase::PostRun, ctx, &self.options).await;
        run_after_settlement(&self.graph, ctx).await;
        self.state = GroupState::Done;

        let failures = ctx.post_run_failures();
        if !failures.is_empty() {
            warn!(
                group = %root_key,
                run_id = ctx.run_id(),
                count = failures.len(),
                "post-run failures recorded"
            );
        }

        match ctx.result(&root_key) {
            Some(value) => {
                info!(
                    group = %root_key,
                    run_id = ctx.run_id(),
                    succeeded = summary.succeeded,
                    "task group completed"
                );
                Ok(value)
            }
            None => {
                let err = ctx
                    .fault()
                    .map(TaskGraphError::Faulted)
                    .unwrap_or_else(|| TaskGraphError::ResultNotFound(root_key.clone()));
                warn!(group = %root_key, run_id = ctx.run_id(), error = %err, "task group faulted");
                Err(err)
            }
        }
    }

    /// [`TaskGroup::invoke`] with a fresh context, returned alongside the
    /// value for access to the other results.
    pub async fn invoke_with_new_context(&mut self) -> Result<(Produced, InvocationContext)> {
        let ctx = self.new_invocation_context();
        let value = self.invoke(&ctx).await?;
        Ok((value, ctx))
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state.is_idle() {
            Ok(())
        } else {
            Err(TaskGraphError::InvalidGroupState {
                key: self.key().to_string(),
                state: self.state,
            })
        }
    }

    fn related(&self, key: &str, f: fn(&TaskGraph, NodeIndex) -> Vec<NodeIndex>) -> Vec<TaskKey> {
        match self.graph.node_index(key) {
            Some(idx) => f(&self.graph, idx)
                .into_iter()
                .map(|other| self.graph.key_of(other).to_string())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Insert `item` and connect it to `anchor`. The graph is only replaced
    /// once the result is known to be acyclic.
    fn attach_item(
        &mut self,
        anchor: NodeIndex,
        item: Arc<dyn TaskItem>,
        kind: EdgeKind,
    ) -> Result<TaskKey> {
        let mut staged = self.graph.clone();
        let idx = staged.ensure_node(item);
        connect(&mut staged, anchor, idx, kind);
        self.commit(staged, idx)
    }

    fn attach_group(
        &mut self,
        anchor: NodeIndex,
        group: &TaskGroup,
        kind: EdgeKind,
    ) -> Result<TaskKey> {
        if !group.state.is_idle() {
            return Err(TaskGraphError::GroupNotMergeable {
                key: group.key().to_string(),
                state: group.state,
            });
        }

        let mut staged = self.graph.clone();
        let mapping = staged.absorb(&group.graph);
        let idx = mapping[&group.root];
        connect(&mut staged, anchor, idx, kind);
        self.commit(staged, idx)
    }

    fn commit(&mut self, staged: TaskGraph, idx: NodeIndex) -> Result<TaskKey> {
        staged.validate_acyclic()?;
        let key = staged.key_of(idx).to_string();
        debug!(
            group = %self.key(),
            task = %key,
            nodes = staged.len(),
            "edge added to task group"
        );
        self.graph = staged;
        Ok(key)
    }

    /// Call `before_invoke` on every node once, including nodes added by
    /// earlier hooks, until no new node appears.
    fn run_before_invoke_hooks(&mut self) -> Result<()> {
        let mut prepared: HashSet<NodeIndex> = HashSet::new();

        loop {
            let pending: Vec<NodeIndex> = self
                .graph
                .node_indices()
                .filter(|idx| !prepared.contains(idx))
                .collect();
            if pending.is_empty() {
                return Ok(());
            }

            for idx in pending {
                prepared.insert(idx);
                let item = Arc::clone(self.graph.item(idx));
                let mut wiring = Wiring {
                    group: &mut *self,
                    node: idx,
                };
                item.before_invoke(&mut wiring)?;
            }
        }
    }
}

/// `kind` edge between `anchor` (the node being extended) and `other`.
fn connect(graph: &mut TaskGraph, anchor: NodeIndex, other: NodeIndex, kind: EdgeKind) {
    match kind {
        EdgeKind::Dependency => graph.add_edge(other, anchor, kind),
        EdgeKind::PostRun => graph.add_edge(anchor, other, kind),
    }
}

/// Edge-adding handle given to [`TaskItem::before_invoke`].
///
/// Edges are added relative to the node whose hook is running, inside the
/// group being invoked.
pub struct Wiring<'a> {
    group: &'a mut TaskGroup,
    node: NodeIndex,
}

impl Wiring<'_> {
    /// Key of the node whose hook is running.
    pub fn key(&self) -> &str {
        self.group.graph.key_of(self.node)
    }

    pub fn add_dependency(&mut self, item: Arc<dyn TaskItem>) -> Result<TaskKey> {
        self.group.attach_item(self.node, item, EdgeKind::Dependency)
    }

    pub fn add_dependency_group(&mut self, group: &TaskGroup) -> Result<TaskKey> {
        self.group.attach_group(self.node, group, EdgeKind::Dependency)
    }

    pub fn add_post_run_dependent(&mut self, item: Arc<dyn TaskItem>) -> Result<TaskKey> {
        self.group.attach_item(self.node, item, EdgeKind::PostRun)
    }

    pub fn add_post_run_dependent_group(&mut self, group: &TaskGroup) -> Result<TaskKey> {
        self.group.attach_group(self.node, group, EdgeKind::PostRun)
    }
}
