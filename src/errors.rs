// src/errors.rs

//! Crate-wide error type, the recorded run fault, and result alias.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{GroupState, TaskKey};

#[derive(Error, Debug)]
pub enum TaskGraphError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in task graph: {0}")]
    DagCycle(String),

    #[error("task group '{key}' is {state} and cannot be merged")]
    GroupNotMergeable { key: TaskKey, state: GroupState },

    #[error("task group '{key}' is {state}; invocation or edge changes are not allowed")]
    InvalidGroupState { key: TaskKey, state: GroupState },

    #[error("invocation context of run {0} was already used; each invocation needs a new one")]
    ContextReused(u64),

    #[error("No action pending on child resource: {0}, invoke should not be called")]
    NoActionPending(String),

    #[error("no result stored for task '{0}'")]
    ResultNotFound(TaskKey),

    #[error("result of task '{0}' has an unexpected type")]
    ResultType(TaskKey),

    #[error(transparent)]
    Faulted(Fault),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskGraphError {
    /// The recorded run fault, if this error is one.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            TaskGraphError::Faulted(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Failure of a single task item during a run.
///
/// The first primary-phase failure becomes the run's fault. Post-run failures
/// use the same shape but are only collected.
#[derive(Clone)]
pub struct Fault {
    key: TaskKey,
    error: Arc<anyhow::Error>,
}

impl Fault {
    pub fn new(key: impl Into<TaskKey>, error: anyhow::Error) -> Self {
        Self {
            key: key.into(),
            error: Arc::new(error),
        }
    }

    /// Key of the task item that failed.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    /// Downcast the underlying error (or a context layer) to a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Whether the failure was the adapter refusing to run without a pending
    /// operation.
    pub fn is_no_action_pending(&self) -> bool {
        matches!(
            self.downcast_ref::<TaskGraphError>(),
            Some(TaskGraphError::NoActionPending(_))
        )
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("key", &self.key)
            .field("error", &format_args!("{:#}", self.error))
            .finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task '{}' failed: {:#}", self.key, self.error)
    }
}

impl std::error::Error for Fault {}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskGraphError>;
