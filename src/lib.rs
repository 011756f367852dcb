// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod resource;
pub mod types;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::{GraphFile, dependency_order};
use crate::dag::TaskGroup;
use crate::errors::TaskGraphError;
use crate::exec::CommandTask;

/// High-level entry point used by `main.rs`.
///
/// Loads and validates the graph file, builds the task group and invokes it
/// once. The root's output is printed to stdout.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut file = load_and_validate(&config_path)?;
    if let Some(strategy) = args.fault_strategy {
        debug!(?strategy, "fault strategy overridden from the command line");
        file.scheduler.fault_strategy = strategy;
    }
    let mut group = build_task_group(&file)?;

    if args.dry_run {
        print_dry_run(&file, &group)?;
        return Ok(());
    }

    let ctx = group.new_invocation_context();
    let outcome = group.invoke(&ctx).await;

    for failure in ctx.post_run_failures() {
        warn!(task = %failure.key(), error = %failure, "post-run task failed");
    }

    let value = outcome?;
    if let Some(output) = value.downcast::<String>() {
        println!("{output}");
    }
    info!(root = %group.key(), run_id = ctx.run_id(), "graph run finished");
    Ok(())
}

/// Build the task group described by a validated graph file.
///
/// Every task becomes a [`CommandTask`] wrapped in its own group; groups are
/// built dependencies first and merged into their dependents. Post-run tasks
/// are merged into the root's group as post-run dependents. Tasks reachable
/// from neither are left out.
pub fn build_task_group(file: &GraphFile) -> errors::Result<TaskGroup> {
    let mut groups: HashMap<String, TaskGroup> = HashMap::new();

    for key in dependency_order(file)? {
        let task = file
            .task
            .get(&key)
            .ok_or_else(|| TaskGraphError::ConfigError(format!("unknown task '{key}'")))?;

        let item = CommandTask::new(key.as_str(), task.cmd.as_str())
            .with_inputs(task.after.iter().cloned());
        let mut group = TaskGroup::new(Arc::new(item)).with_options(file.scheduler.clone());

        for dep in task.after.iter() {
            let dep_group = groups.get(dep).ok_or_else(|| {
                TaskGraphError::ConfigError(format!("task '{key}' depends on unbuilt task '{dep}'"))
            })?;
            group.add_dependency_task_group(dep_group)?;
        }
        groups.insert(key, group);
    }

    let mut root = groups.remove(&file.graph.root).ok_or_else(|| {
        TaskGraphError::ConfigError(format!("unknown root task '{}'", file.graph.root))
    })?;

    for name in file.graph.post_run.iter() {
        let post_run = groups.get(name).ok_or_else(|| {
            TaskGraphError::ConfigError(format!("unknown post-run task '{name}'"))
        })?;
        root.add_post_run_dependent_task_group(post_run)?;
    }

    for key in file.task.keys() {
        if !root.contains(key) {
            warn!(task = %key, "task is not reachable from the root or a post-run task; ignored");
        }
    }

    debug!(root = %root.key(), nodes = root.len(), "task group built");
    Ok(root)
}

/// Simple dry-run output: print options, tasks and the invocation order.
fn print_dry_run(file: &GraphFile, group: &TaskGroup) -> Result<()> {
    println!("taskgraph dry-run");
    println!(
        "  scheduler.max_concurrency = {}",
        file.scheduler
            .max_concurrency
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unbounded".to_string())
    );
    println!(
        "  scheduler.fault_strategy = {:?}",
        file.scheduler.fault_strategy
    );
    println!("  graph.root = {}", file.graph.root);
    if !file.graph.post_run.is_empty() {
        println!("  graph.post_run = {:?}", file.graph.post_run);
    }
    println!();

    println!("tasks ({}):", file.task.len());
    for (name, task) in file.task.iter() {
        println!("  - {name}");
        println!("      cmd: {}", task.cmd);
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
    }
    println!();

    println!("invocation order:");
    for (i, key) in group.invocation_order()?.iter().enumerate() {
        println!("  {}. {key}", i + 1);
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
