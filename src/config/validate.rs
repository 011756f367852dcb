// src/config/validate.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{GraphFile, RawGraphFile};
use crate::errors::{Result, TaskGraphError};
use crate::exec::output_env_var;

impl TryFrom<RawGraphFile> for GraphFile {
    type Error = TaskGraphError;

    fn try_from(raw: RawGraphFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_graph(&raw)?;
        Ok(GraphFile::new_unchecked(raw.scheduler, raw.graph, raw.task))
    }
}

fn validate_raw_graph(raw: &RawGraphFile) -> Result<()> {
    ensure_has_tasks(raw)?;
    validate_scheduler(raw)?;
    validate_graph_section(raw)?;
    validate_task_dependencies(raw)?;
    validate_output_vars(raw)?;
    validate_dag(raw)?;
    Ok(())
}

fn ensure_has_tasks(raw: &RawGraphFile) -> Result<()> {
    if raw.task.is_empty() {
        return Err(TaskGraphError::ConfigError(
            "graph file must contain at least one [task.<key>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_scheduler(raw: &RawGraphFile) -> Result<()> {
    // fault_strategy is validated during deserialization.
    if raw.scheduler.max_concurrency == Some(0) {
        return Err(TaskGraphError::ConfigError(
            "[scheduler].max_concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_graph_section(raw: &RawGraphFile) -> Result<()> {
    let root = &raw.graph.root;
    if !raw.task.contains_key(root) {
        return Err(TaskGraphError::ConfigError(format!(
            "[graph].root refers to unknown task '{}'",
            root
        )));
    }

    for name in raw.graph.post_run.iter() {
        if !raw.task.contains_key(name) {
            return Err(TaskGraphError::ConfigError(format!(
                "[graph].post_run refers to unknown task '{}'",
                name
            )));
        }
        if name == root {
            return Err(TaskGraphError::ConfigError(format!(
                "root task '{}' cannot also be a post-run task",
                name
            )));
        }
    }
    Ok(())
}

fn validate_task_dependencies(raw: &RawGraphFile) -> Result<()> {
    for (name, task) in raw.task.iter() {
        for dep in task.after.iter() {
            if !raw.task.contains_key(dep) {
                return Err(TaskGraphError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(TaskGraphError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

/// Each task's output is exported to its dependents under a normalised
/// variable name; two keys must not share one.
fn validate_output_vars(raw: &RawGraphFile) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for name in raw.task.keys() {
        let var = output_env_var(name);
        if let Some(other) = seen.insert(var.clone(), name.as_str()) {
            return Err(TaskGraphError::ConfigError(format!(
                "tasks '{}' and '{}' both export their output as {}",
                other, name, var
            )));
        }
    }
    Ok(())
}

fn validate_dag(raw: &RawGraphFile) -> Result<()> {
    // Edge direction: dep -> task, and root -> post-run task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in raw.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in raw.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    for name in raw.graph.post_run.iter() {
        graph.add_edge(raw.graph.root.as_str(), name.as_str(), ());
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(TaskGraphError::DagCycle(format!(
            "cycle detected in task graph involving task '{}'",
            cycle.node_id()
        ))),
    }
}

/// Task keys ordered so that every task comes after everything in its
/// `after` list.
pub fn dependency_order(file: &GraphFile) -> Result<Vec<String>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in file.task.keys() {
        graph.add_node(name.as_str());
    }
    for (name, task) in file.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    toposort(&graph, None)
        .map(|order| order.into_iter().map(str::to_string).collect())
        .map_err(|cycle| {
            TaskGraphError::DagCycle(format!(
                "cycle detected in task graph involving task '{}'",
                cycle.node_id()
            ))
        })
}
