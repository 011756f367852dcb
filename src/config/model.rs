// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::FaultStrategy;

/// Graph file as read from TOML, before validation.
///
/// ```toml
/// [scheduler]
/// max_concurrency = 4
/// fault_strategy = "continue_independent"
///
/// [graph]
/// root = "deploy"
/// post_run = ["notify"]
///
/// [task.network]
/// cmd = "echo 10.0.0.0/16"
///
/// [task.deploy]
/// cmd = "echo deploying into $TASKGRAPH_OUT_NETWORK"
/// after = ["network"]
///
/// [task.notify]
/// cmd = "echo done"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawGraphFile {
    #[serde(default)]
    pub scheduler: GraphOptions,

    pub graph: GraphSection,

    /// All tasks from `[task.<key>]`, keyed by task key.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// A graph file that passed validation (see `config::validate`).
#[derive(Debug, Clone)]
pub struct GraphFile {
    pub scheduler: GraphOptions,
    pub graph: GraphSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl GraphFile {
    pub(crate) fn new_unchecked(
        scheduler: GraphOptions,
        graph: GraphSection,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            scheduler,
            graph,
            task,
        }
    }
}

/// Scheduler options carried by every task group.
///
/// `[scheduler]` section of a graph file; [`GraphOptions::default`] when
/// building groups in code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GraphOptions {
    /// Upper bound on nodes running at once. `None` means no bound: every
    /// eligible node starts immediately.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// What happens to not-yet-started nodes after a fault.
    #[serde(default)]
    pub fault_strategy: FaultStrategy,
}

/// `[graph]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSection {
    /// Task whose result is the result of the run.
    pub root: String,

    /// Tasks that run after the root has settled, whatever the outcome.
    #[serde(default)]
    pub post_run: Vec<String>,
}

/// `[task.<key>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Shell command; its trimmed stdout is the task's produced value.
    pub cmd: String,

    /// Tasks whose results this one needs.
    #[serde(default)]
    pub after: Vec<String>,
}
