// src/dag/task_info.rs

//! Per-run node state and invocation phases.

use std::fmt;

/// State of a node within one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting on dependencies.
    Pending,
    /// Invoked and not yet finished.
    Running,
    /// Completed; its value is in the context.
    Succeeded,
    /// The node's own invocation failed.
    Failed,
    /// Never invoked: a dependency failed or was skipped, or the run stopped
    /// starting new nodes after a fault.
    Skipped,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed | RunState::Skipped)
    }
}

/// Which part of an invocation a node belongs to.
///
/// The root and everything it depends on (transitively) are `Primary`; every
/// other node was reached through a post-run edge and is `PostRun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Primary,
    PostRun,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Primary => f.write_str("primary"),
            Phase::PostRun => f.write_str("post-run"),
        }
    }
}
