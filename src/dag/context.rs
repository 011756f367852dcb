// src/dag/context.rs

//! Per-run state shared by every node of an invocation.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use crate::dag::task_info::RunState;
use crate::dag::task_item::Produced;
use crate::errors::{Fault, Result, TaskGraphError};
use crate::types::{FaultStrategy, TaskKey};

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mutable state of one graph invocation.
///
/// Created fresh for every top-level invocation and handed by reference to
/// each node. A context drives one invocation only; a second `invoke` with
/// it is refused. Cloning is cheap and yields a handle to the same run.
///
/// - results are write-once per key and readable by any node,
/// - the fault holds the first primary-phase failure only,
/// - post-run failures are collected and never turn into the fault.
#[derive(Clone)]
pub struct InvocationContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    run_id: u64,
    strategy: FaultStrategy,
    started: AtomicBool,
    results: DashMap<TaskKey, Produced>,
    states: DashMap<TaskKey, RunState>,
    fault: OnceLock<Fault>,
    post_run_failures: Mutex<Vec<Fault>>,
}

impl InvocationContext {
    pub fn new(strategy: FaultStrategy) -> Self {
        let run_id = RUN_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        Self {
            inner: Arc::new(ContextInner {
                run_id,
                strategy,
                started: AtomicBool::new(false),
                results: DashMap::new(),
                states: DashMap::new(),
                fault: OnceLock::new(),
                post_run_failures: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Process-unique identifier of this run, used in log events.
    pub fn run_id(&self) -> u64 {
        self.inner.run_id
    }

    pub fn fault_strategy(&self) -> FaultStrategy {
        self.inner.strategy
    }

    /// Value produced by `key` in this run, if it completed.
    ///
    /// Only keys declared as dependencies are guaranteed to be present while
    /// a node runs.
    pub fn result(&self, key: &str) -> Option<Produced> {
        self.inner.results.get(key).map(|entry| entry.value().clone())
    }

    /// Typed variant of [`InvocationContext::result`].
    pub fn result_as<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        let value = self
            .result(key)
            .ok_or_else(|| TaskGraphError::ResultNotFound(key.to_string()))?;
        value
            .downcast::<T>()
            .ok_or_else(|| TaskGraphError::ResultType(key.to_string()))
    }

    pub fn has_result(&self, key: &str) -> bool {
        self.inner.results.contains_key(key)
    }

    /// Keys that have a stored result, sorted.
    pub fn result_keys(&self) -> Vec<TaskKey> {
        let mut keys: Vec<TaskKey> = self
            .inner
            .results
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Final per-run state of `key`, once its phase has finished.
    pub fn run_state(&self, key: &str) -> Option<RunState> {
        self.inner.states.get(key).map(|entry| *entry.value())
    }

    pub fn is_faulted(&self) -> bool {
        self.inner.fault.get().is_some()
    }

    pub fn fault(&self) -> Option<Fault> {
        self.inner.fault.get().cloned()
    }

    /// Failures of post-run dependents and after-settlement hooks.
    pub fn post_run_failures(&self) -> Vec<Fault> {
        self.inner
            .post_run_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether an invocation has already been started with this context.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Claim the context for an invocation. Returns `false` if it was
    /// already claimed.
    pub(crate) fn start(&self) -> bool {
        !self.inner.started.swap(true, Ordering::AcqRel)
    }

    /// Store the value produced by `key`. Returns `false` if the key already
    /// had a value; the first write is kept.
    pub(crate) fn store_result(&self, key: &str, value: Produced) -> bool {
        match self.inner.results.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
            Entry::Occupied(_) => {
                warn!(
                    task = %key,
                    run_id = self.inner.run_id,
                    "result already stored for this run; keeping the first value"
                );
                false
            }
        }
    }

    /// Record a primary-phase failure. Returns `true` if this became the
    /// run's fault.
    pub(crate) fn record_fault(&self, fault: Fault) -> bool {
        let key = fault.key().to_string();
        match self.inner.fault.set(fault) {
            Ok(()) => true,
            Err(_) => {
                debug!(
                    task = %key,
                    run_id = self.inner.run_id,
                    "fault already recorded; later failure not kept as the fault"
                );
                false
            }
        }
    }

    pub(crate) fn record_post_run_failure(&self, fault: Fault) {
        self.inner
            .post_run_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fault);
    }

    pub(crate) fn record_state(&self, key: &str, state: RunState) {
        self.inner.states.insert(key.to_string(), state);
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new(FaultStrategy::default())
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("run_id", &self.inner.run_id)
            .field("strategy", &self.inner.strategy)
            .field("results", &self.result_keys())
            .field("fault", &self.inner.fault.get())
            .finish_non_exhaustive()
    }
}
