// src/exec/mod.rs

//! Process execution layer.
//!
//! Task items that run shell commands with `tokio::process::Command`. A
//! command's trimmed stdout is its produced value; the stdout of each declared
//! input is handed to it through `TASKGRAPH_OUT_<KEY>` environment variables.

pub mod command;

pub use command::{CommandTask, FAULTED_ENV, output_env_var};
