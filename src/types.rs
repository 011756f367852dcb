use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Key identifying a task item inside a task group.
pub type TaskKey = String;

/// What the scheduler does with not-yet-started nodes once a fault has been
/// recorded in the primary phase.
///
/// - `ContinueIndependent`: nodes that do not depend on the failed node keep
///   being scheduled until their branch runs out (default).
/// - `DrainInProgress`: nodes already running are allowed to finish, but no
///   new node is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStrategy {
    ContinueIndependent,
    DrainInProgress,
}

impl Default for FaultStrategy {
    fn default() -> Self {
        FaultStrategy::ContinueIndependent
    }
}

impl FromStr for FaultStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "continue_independent" => Ok(FaultStrategy::ContinueIndependent),
            "drain_in_progress" => Ok(FaultStrategy::DrainInProgress),
            other => Err(format!(
                "invalid fault_strategy: {other} (expected \"continue_independent\" or \"drain_in_progress\")"
            )),
        }
    }
}

/// Lifecycle of a task group.
///
/// `Built` accepts edges. `Running` is the primary phase, `Settled` the
/// post-run phase. `Done` means the last run completed; the group accepts
/// edges and may be invoked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Built,
    Running,
    Settled,
    Done,
}

impl GroupState {
    /// Whether edges may be added and a new run started.
    pub fn is_idle(self) -> bool {
        matches!(self, GroupState::Built | GroupState::Done)
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupState::Built => "built",
            GroupState::Running => "running",
            GroupState::Settled => "settled",
            GroupState::Done => "done",
        };
        f.write_str(s)
    }
}
