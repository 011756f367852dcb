// src/config/mod.rs

//! Configuration loading and validation for taskgraph.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`), including the
//!   scheduler options every [`crate::dag::TaskGroup`] carries.
//! - Load a graph file from disk (`loader.rs`).
//! - Validate basic invariants like DAG correctness (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{GraphFile, GraphOptions, GraphSection, RawGraphFile, TaskConfig};
pub use validate::dependency_order;
