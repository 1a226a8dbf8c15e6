//! Error types for job dispatch and model evaluation

use pmlda_tree::{Level, NodeId};

/// Dispatcher-level errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Backlog of queued jobs is at its configured bound
    #[error("job queue full (limit: {limit})")]
    QueueFull {
        /// Configured backlog bound
        limit: usize,
    },

    /// Dispatcher was shut down
    #[error("dispatcher is shut down")]
    ShutDown,

    /// Invalid dispatcher configuration
    #[error("invalid dispatcher configuration: {0}")]
    InvalidConfig(String),
}

impl DispatchError {
    /// Check if the caller can recover by retrying later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}

/// Failure of one evaluation, tagged with the node and level it was for
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("evaluation of {node} at {level} failed: {message}")]
pub struct EvaluationError {
    /// Node the job was submitted for
    pub node: NodeId,
    /// Level the job was submitted for
    pub level: Level,
    /// Human-readable cause
    pub message: String,
}

impl EvaluationError {
    /// Create a tagged evaluation error
    #[inline]
    pub fn new(node: NodeId, level: Level, message: impl Into<String>) -> Self {
        Self {
            node,
            level,
            message: message.into(),
        }
    }
}

/// Errors raised by model implementations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Model failed to produce a value
    #[error("model failed: {0}")]
    Failed(String),

    /// Model returned NaN
    #[error("model returned NaN")]
    NotANumber,

    /// Input or output size does not match
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Requested level does not exist
    #[error("level {level} out of range ({num_levels} levels)")]
    LevelOutOfRange {
        /// Requested level
        level: Level,
        /// Number of available levels
        num_levels: usize,
    },
}
