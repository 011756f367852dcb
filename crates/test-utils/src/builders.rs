#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fmt::Write as _;

use taskgraph::config::{GraphFile, GraphOptions, GraphSection, RawGraphFile, TaskConfig};
use taskgraph::types::FaultStrategy;

/// Builder for graph files to simplify test setup.
pub struct GraphFileBuilder {
    raw: RawGraphFile,
}

impl GraphFileBuilder {
    pub fn new(root: &str) -> Self {
        Self {
            raw: RawGraphFile {
                scheduler: GraphOptions::default(),
                graph: GraphSection {
                    root: root.to_string(),
                    post_run: Vec::new(),
                },
                task: BTreeMap::new(),
            },
        }
    }

    pub fn task(mut self, name: &str, cmd: &str, after: &[&str]) -> Self {
        self.raw.task.insert(
            name.to_string(),
            TaskConfig {
                cmd: cmd.to_string(),
                after: after.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }

    pub fn post_run(mut self, name: &str) -> Self {
        self.raw.graph.post_run.push(name.to_string());
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.raw.scheduler.max_concurrency = Some(n);
        self
    }

    pub fn fault_strategy(mut self, strategy: FaultStrategy) -> Self {
        self.raw.scheduler.fault_strategy = strategy;
        self
    }

    pub fn build_raw(self) -> RawGraphFile {
        self.raw
    }

    pub fn build(self) -> GraphFile {
        GraphFile::try_from(self.raw).expect("Failed to build valid graph file from builder")
    }

    /// Render as TOML, for tests that go through the loader.
    pub fn to_toml(&self) -> String {
        let mut out = String::new();

        out.push_str("[scheduler]\n");
        if let Some(n) = self.raw.scheduler.max_concurrency {
            writeln!(out, "max_concurrency = {n}").unwrap();
        }
        let strategy = match self.raw.scheduler.fault_strategy {
            FaultStrategy::ContinueIndependent => "continue_independent",
            FaultStrategy::DrainInProgress => "drain_in_progress",
        };
        writeln!(out, "fault_strategy = \"{strategy}\"").unwrap();

        out.push_str("\n[graph]\n");
        writeln!(out, "root = {:?}", self.raw.graph.root).unwrap();
        writeln!(out, "post_run = {:?}", self.raw.graph.post_run).unwrap();

        for (name, task) in self.raw.task.iter() {
            writeln!(out, "\n[task.{name}]").unwrap();
            writeln!(out, "cmd = {:?}", task.cmd).unwrap();
            writeln!(out, "after = {:?}", task.after).unwrap();
        }

        out
    }
}
