// src/exec/command.rs

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use futures::future::{BoxFuture, FutureExt};
use tokio::process::Command;
use tracing::{debug, info};

use crate::dag::{InvocationContext, Produced, TaskItem};
use crate::types::TaskKey;

/// Set to `1` for every command when the run's primary phase has faulted,
/// `0` otherwise. Only meaningful for post-run commands.
pub const FAULTED_ENV: &str = "TASKGRAPH_FAULTED";

/// Name of the variable carrying the output of `key`: `TASKGRAPH_OUT_` plus
/// the key upper-cased, with anything not alphanumeric replaced by `_`.
pub fn output_env_var(key: &str) -> String {
    let suffix: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("TASKGRAPH_OUT_{suffix}")
}

/// Task item running one shell command.
///
/// Produces the command's trimmed stdout as a `String`. A non-zero exit
/// status fails the node.
#[derive(Debug, Clone)]
pub struct CommandTask {
    key: TaskKey,
    cmd: String,
    inputs: Vec<TaskKey>,
}

impl CommandTask {
    pub fn new(key: impl Into<TaskKey>, cmd: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            cmd: cmd.into(),
            inputs: Vec::new(),
        }
    }

    /// Keys whose outputs are exported to the command's environment.
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = impl Into<TaskKey>>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub fn inputs(&self) -> &[TaskKey] {
        &self.inputs
    }

    async fn run(&self, ctx: &InvocationContext) -> Result<Produced> {
        info!(
            task = %self.key,
            run_id = ctx.run_id(),
            cmd = %self.cmd,
            "starting task process"
        );

        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        cmd.env(FAULTED_ENV, if ctx.is_faulted() { "1" } else { "0" });
        for input in self.inputs.iter() {
            // Inputs that did not complete in this run are left unset.
            if let Some(value) = ctx.result(input).and_then(|v| v.downcast::<String>()) {
                cmd.env(output_env_var(input), value.as_str());
            }
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", self.key))?;

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("waiting for process of task '{}'", self.key))?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            debug!(task = %self.key, run_id = ctx.run_id(), "stderr: {}", line);
        }

        let code = output.status.code().unwrap_or(-1);
        info!(
            task = %self.key,
            run_id = ctx.run_id(),
            exit_code = code,
            success = output.status.success(),
            "task process exited"
        );

        if !output.status.success() {
            bail!("command for task '{}' exited with code {}", self.key, code);
        }

        let stdout = String::from_utf8(output.stdout)
            .with_context(|| format!("stdout of task '{}' is not valid UTF-8", self.key))?;
        Ok(Produced::new(stdout.trim().to_string()))
    }
}

impl TaskItem for CommandTask {
    fn key(&self) -> &str {
        &self.key
    }

    fn invoke<'a>(&'a self, ctx: &'a InvocationContext) -> BoxFuture<'a, Result<Produced>> {
        self.run(ctx).boxed()
    }
}
