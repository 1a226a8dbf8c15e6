//! PMLDA Dispatch - evaluation job dispatcher
//!
//! Feeds tree-node evaluations to a pool of worker tasks and hands results
//! back out of order:
//! - Non-blocking submission with a bounded backlog (backpressure)
//! - Non-blocking polling, plus an async wait for the next completion
//! - Best-effort, idempotent cancellation by node
//! - Worker failures surfaced as tagged [`EvaluationError`]s, never retried here
//!
//! # Example
//!
//! ```rust,ignore
//! use pmlda_dispatch::{DispatcherConfig, JobDispatcher};
//! use pmlda_tree::{Level, NodeId, State};
//!
//! let mut dispatcher = JobDispatcher::new(evaluator, DispatcherConfig::new(4, 64))?;
//! dispatcher.submit(NodeId(1), Level(0), State::from(vec![0.0]))?;
//! let results = dispatcher.wait().await;
//! ```

#![warn(unreachable_pub)]

pub mod dispatcher;
pub mod error;
pub mod job;
pub mod model;

pub use dispatcher::{DispatcherConfig, DispatcherStats, JobDispatcher};
pub use error::{DispatchError, EvaluationError, ModelError};
pub use job::{CancelToken, EvaluationResult, JobHandle};
pub use model::{BlockingModel, LogDensityModel, ModelEvaluator, ModelHierarchy};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
