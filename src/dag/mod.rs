// src/dag/mod.rs

//! Dependency-graph task scheduling.
//!
//! - [`task_item`] defines the node contract ([`TaskItem`]) and the opaque
//!   [`Produced`] value every node yields.
//! - [`context`] holds the per-run [`InvocationContext`]: result cache and
//!   first fault.
//! - [`graph`] is the arena of nodes and typed edges, with cycle validation.
//! - [`task_group`] owns a rooted graph, the merge rules and the invocation
//!   entry point.
//! - [`scheduler`] runs one phase (primary or post-run) of an invocation.
//! - [`state_manager`] tracks per-run node states inside a phase.
//! - [`task_info`] provides the per-run state and phase types.

pub mod context;
pub mod graph;
pub mod scheduler;
pub mod state_manager;
pub mod task_group;
pub mod task_info;
pub mod task_item;

pub use context::InvocationContext;
pub use graph::{EdgeKind, TaskGraph};
pub use task_group::{HasTaskGroup, TaskGroup, Wiring};
pub use task_info::{Phase, RunState};
pub use task_item::{FnTaskItem, Produced, TaskItem};
