//! Evaluation jobs and their results

use crate::error::EvaluationError;
use pmlda_tree::{Level, NodeId, State};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for one job
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an uncancelled token
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag the job as cancelled
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Check the flag
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle returned by [`submit`](crate::JobDispatcher::submit)
#[derive(Debug, Clone)]
pub struct JobHandle {
    /// Node the job evaluates
    pub node: NodeId,
    /// Level the job evaluates
    pub level: Level,
    /// Submission sequence number
    pub sequence: u64,
    token: CancelToken,
}

impl JobHandle {
    pub(crate) fn new(node: NodeId, level: Level, sequence: u64, token: CancelToken) -> Self {
        Self {
            node,
            level,
            sequence,
            token,
        }
    }

    /// Cancel only this job
    #[inline]
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check whether the job was cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Job record owned by the dispatcher between submission and completion
#[derive(Debug, Clone)]
pub(crate) struct EvaluationJob {
    pub(crate) node: NodeId,
    pub(crate) level: Level,
    pub(crate) state: State,
    pub(crate) sequence: u64,
    pub(crate) token: CancelToken,
}

/// Completed job as sent back by a worker
#[derive(Debug)]
pub(crate) struct Completed {
    pub(crate) sequence: u64,
    pub(crate) token: CancelToken,
    pub(crate) result: EvaluationResult,
}

/// Result of one evaluation, reported in completion order
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    /// Node the job was submitted for
    pub node: NodeId,
    /// Level the job was submitted for
    pub level: Level,
    /// Log-density or tagged failure
    pub outcome: Result<f64, EvaluationError>,
}

impl EvaluationResult {
    /// Check for a failed evaluation
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let handle = JobHandle::new(NodeId(1), Level(0), 0, token.clone());
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(handle.is_cancelled());
    }
}
