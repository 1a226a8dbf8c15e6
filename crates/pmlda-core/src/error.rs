//! Error types for the sampler
//!
//! Classification follows how a run reacts:
//! - `Evaluation` and `Dispatch(QueueFull)` are absorbed during a run
//! - `InvalidTransition` and `Configuration` terminate it
//! - `RunAborted` hands the caller whatever was sampled before the failure

use crate::runner::RunReport;
use pmlda_dispatch::{DispatchError, EvaluationError};
use pmlda_tree::TreeError;

/// Invalid configuration, detected at construction only
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// No fidelity levels configured
    #[error("at least one fidelity level is required")]
    NoLevels,

    /// More levels than a [`Level`](pmlda_tree::Level) can address
    #[error("too many fidelity levels: {0}")]
    TooManyLevels(usize),

    /// Level cost is not a positive finite number
    #[error("level '{level}' has invalid relative cost {cost}")]
    InvalidCost {
        /// Level name
        level: String,
        /// Offending cost
        cost: f64,
    },

    /// Levels are not ordered cheapest first
    #[error("level '{finer}' is cheaper than the coarser level '{coarser}'")]
    LevelOrdering {
        /// Earlier level
        coarser: String,
        /// Later, cheaper level
        finer: String,
    },

    /// Zero worker tasks
    #[error("num_workers must be at least 1")]
    ZeroWorkers,

    /// Zero backlog bound
    #[error("backlog_limit must be at least 1")]
    ZeroBacklog,

    /// Zero in-flight width
    #[error("max_in_flight must be at least 1")]
    ZeroInFlight,

    /// Model hierarchy does not match the configured levels
    #[error("configured {configured} levels but the model provides {model}")]
    LevelCountMismatch {
        /// Levels in the configuration
        configured: usize,
        /// Levels in the model
        model: usize,
    },

    /// Sizes of vectors or matrices do not agree
    #[error("{what}: expected size {expected}, got {actual}")]
    DimensionMismatch {
        /// What was being checked
        what: &'static str,
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Covariance matrix cannot be inverted
    #[error("covariance matrix is singular")]
    SingularCovariance,

    /// Multi-chain run with zero chains
    #[error("at least one chain is required")]
    NoChains,

    /// Malformed configuration input
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Main sampler error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum SamplerError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Tree invariant violated
    #[error("invalid transition: {0}")]
    InvalidTransition(#[from] TreeError),

    /// Dispatcher refused work
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Model evaluation failed
    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// The current chain state kept failing to evaluate
    #[error("current state could not be evaluated at chain length {chain_len}: {error}")]
    CurrentStateUnavailable {
        /// Chain length when the retries ran out
        chain_len: usize,
        /// Last failure
        error: EvaluationError,
    },

    /// Nothing in flight and nothing decidable
    #[error("runner stalled at chain length {chain_len}")]
    Stalled {
        /// Chain length when the stall was detected
        chain_len: usize,
    },

    /// Chain sink failed to record a step
    #[error("chain sink failed: {0}")]
    Sink(String),

    /// Chain task panicked or was cancelled
    #[error("chain {chain} failed to complete: {reason}")]
    ChainFailed {
        /// Chain index
        chain: usize,
        /// Join error description
        reason: String,
    },
}

impl SamplerError {
    /// Check if the run must stop
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Check if the runner can absorb the error and continue
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Evaluation(_) => true,
            Self::Dispatch(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Fatal error together with the samples accepted before it
#[derive(Debug, thiserror::Error)]
#[error("run aborted after {} samples: {error}", partial.chain.len())]
pub struct RunAborted {
    /// Cause
    #[source]
    pub error: SamplerError,
    /// Report up to the failure
    pub partial: Box<RunReport>,
}
