//! Runner phase machine
//!
//! `Expanding → Dispatching → Collecting → Deciding → (Expanding | Done)`,
//! with `Done` also reachable straight from `Expanding` when the chain is
//! already long enough.

use pmlda_tree::TreeError;
use std::fmt;

/// Phase of the runner's control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerPhase {
    /// Growing the speculative tree
    Expanding,
    /// Submitting missing evaluations
    Dispatching,
    /// Harvesting completed evaluations
    Collecting,
    /// Resolving nodes and advancing the root
    Deciding,
    /// Target chain length reached
    Done,
}

impl fmt::Display for RunnerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Expanding => "expanding",
            Self::Dispatching => "dispatching",
            Self::Collecting => "collecting",
            Self::Deciding => "deciding",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Phases reachable from `from`
#[must_use]
pub fn allowed_transitions(from: RunnerPhase) -> &'static [RunnerPhase] {
    match from {
        RunnerPhase::Expanding => &[RunnerPhase::Dispatching, RunnerPhase::Done],
        RunnerPhase::Dispatching => &[RunnerPhase::Collecting],
        RunnerPhase::Collecting => &[RunnerPhase::Deciding],
        RunnerPhase::Deciding => &[RunnerPhase::Expanding, RunnerPhase::Done],
        RunnerPhase::Done => &[],
    }
}

/// Validates a phase transition
///
/// # Errors
/// `InvalidTransition` if `to` is not reachable from `from`.
pub fn validate_transition(from: RunnerPhase, to: RunnerPhase) -> Result<(), TreeError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TreeError::invalid(format!(
            "runner cannot move from {from} to {to}"
        )))
    }
}
