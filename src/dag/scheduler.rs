// src/dag/scheduler.rs

//! Asynchronous execution of one invocation phase.
//!
//! The scheduler never spawns: node futures are polled together from the
//! calling task through a `FuturesUnordered`, so it runs the same way on a
//! multi-threaded or a current-thread runtime. It only decides, whenever a
//! node finishes, which nodes became eligible next.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::graph::NodeIndex;
use tracing::{debug, info, warn};

use crate::config::GraphOptions;
use crate::dag::context::InvocationContext;
use crate::dag::graph::TaskGraph;
use crate::dag::state_manager::StateManager;
use crate::dag::task_info::{Phase, RunState};
use crate::errors::Fault;
use crate::types::FaultStrategy;

/// Counts of how the nodes of a phase ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Run every node in `members` once, in dependency order.
///
/// - A node starts only when all of its in-phase ordering edges are resolved.
/// - Primary failures are recorded as the run's fault (first wins) and skip
///   the failed node's dependents. Post-run failures are only collected.
/// - With [`FaultStrategy::DrainInProgress`], nothing new starts in the
///   primary phase once a fault exists; running nodes finish normally.
pub async fn run_phase(
    graph: &TaskGraph,
    members: &HashSet<NodeIndex>,
    phase: Phase,
    ctx: &InvocationContext,
    options: &GraphOptions,
) -> PhaseSummary {
    if members.is_empty() {
        return PhaseSummary::default();
    }

    let mut manager = StateManager::new(graph, members, phase);
    let mut in_flight = FuturesUnordered::new();
    let max_in_flight = options.max_concurrency.unwrap_or(usize::MAX).max(1);

    debug!(
        run_id = ctx.run_id(),
        %phase,
        nodes = members.len(),
        "starting phase"
    );

    loop {
        if !halted(phase, ctx) {
            let capacity = max_in_flight.saturating_sub(in_flight.len());
            for idx in manager.take_ready(capacity) {
                let item = Arc::clone(graph.item(idx));
                debug!(
                    task = %graph.key_of(idx),
                    run_id = ctx.run_id(),
                    %phase,
                    "dependencies satisfied; invoking"
                );
                in_flight.push(async move {
                    let outcome = item.invoke(ctx).await;
                    (idx, outcome)
                });
            }
        }

        let Some((idx, outcome)) = in_flight.next().await else {
            break;
        };
        let key = graph.key_of(idx);

        match outcome {
            Ok(value) => {
                debug!(task = %key, run_id = ctx.run_id(), %phase, "task completed");
                ctx.store_result(key, value);
                manager.mark_succeeded(idx);
            }
            Err(err) => {
                let fault = Fault::new(key, err);
                warn!(
                    task = %key,
                    run_id = ctx.run_id(),
                    %phase,
                    error = %fault,
                    "task failed; skipping its dependents"
                );
                match phase {
                    Phase::Primary => {
                        ctx.record_fault(fault);
                    }
                    Phase::PostRun => ctx.record_post_run_failure(fault),
                }
                manager.mark_failed(idx);
            }
        }
    }

    let never_started = manager.skip_remaining();
    debug_assert!(manager.all_terminal());
    if !never_started.is_empty() {
        info!(
            run_id = ctx.run_id(),
            %phase,
            count = never_started.len(),
            "run stopped before these nodes became eligible; marked skipped"
        );
    }

    let mut summary = PhaseSummary::default();
    for (idx, state) in manager.states() {
        ctx.record_state(graph.key_of(idx), state);
        match state {
            RunState::Succeeded => summary.succeeded += 1,
            RunState::Failed => summary.failed += 1,
            RunState::Skipped => summary.skipped += 1,
            RunState::Pending | RunState::Running => {}
        }
    }

    debug!(
        run_id = ctx.run_id(),
        %phase,
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        "phase settled"
    );

    summary
}

/// Call `after_settlement` on every node of the graph, concurrently.
///
/// Failures are added to the context's post-run failures.
pub async fn run_after_settlement(graph: &TaskGraph, ctx: &InvocationContext) {
    let faulted = ctx.is_faulted();
    let mut hooks: FuturesUnordered<_> = graph
        .node_indices()
        .map(|idx| {
            let item = Arc::clone(graph.item(idx));
            async move {
                let outcome = item.after_settlement(faulted).await;
                (idx, outcome)
            }
        })
        .collect();

    while let Some((idx, outcome)) = hooks.next().await {
        if let Err(err) = outcome {
            let fault = Fault::new(graph.key_of(idx), err);
            warn!(
                task = %fault.key(),
                run_id = ctx.run_id(),
                faulted,
                error = %fault,
                "after-settlement hook failed"
            );
            ctx.record_post_run_failure(fault);
        }
    }
}

fn halted(phase: Phase, ctx: &InvocationContext) -> bool {
    phase == Phase::Primary
        && ctx.is_faulted()
        && ctx.fault_strategy() == FaultStrategy::DrainInProgress
}
