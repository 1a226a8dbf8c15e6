//! PMLDA Core - prefetching multilevel delayed-acceptance sampler
//!
//! Drives a single Markov chain with two kinds of parallelism:
//! - Prefetching: future chain states are evaluated before the decisions they
//!   depend on are known
//! - Delayed acceptance: proposals are screened with cheap levels and rejected
//!   early whenever the coarse evidence already rules them out
//!
//! # Example
//!
//! ```rust,ignore
//! use pmlda_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(model: ModelHierarchy) -> Result<(), Box<dyn std::error::Error>> {
//! let config = SamplerConfig::new()
//!     .with_level_count(model.len())
//!     .with_workers(4)
//!     .with_target_samples(1_000);
//!
//! let runner = ParallelRunner::new(
//!     config,
//!     Arc::new(model),
//!     Arc::new(GaussianRandomWalk::new(0.2)),
//!     State::from(vec![0.0, 0.0]),
//! )?;
//! let report = runner.run().await?;
//!
//! println!("acceptance rate {:.2}", report.chain.acceptance_rate());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod multi;
pub mod phase;
pub mod posterior;
pub mod runner;
pub mod stats;

pub use chain::{Chain, ChainLink, ChainSink, NullSink, TracingSink};
pub use config::{LevelSpec, SamplerConfig};
pub use engine::{
    log_ratio, Decision, DecisionCause, DelayedAcceptance, EvaluationNeed, Resolution,
};
pub use error::{ConfigError, RunAborted, SamplerError};
pub use multi::{run_chains, ChainOutcome, ChainSetup};
pub use phase::RunnerPhase;
pub use posterior::{
    ForwardMap, GaussianLikelihood, GaussianPrior, LinearForwardMap, LogLikelihood, LogPosterior,
    LogPrior, UniformBoxPrior,
};
pub use runner::{ParallelRunner, RunReport};
pub use stats::RunStatistics;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running a sampler
    pub use crate::{
        ChainSink, ParallelRunner, RunReport, SamplerConfig, SamplerError, TracingSink,
    };
    pub use pmlda_dispatch::{BlockingModel, ModelEvaluator, ModelHierarchy};
    pub use pmlda_tree::{GaussianRandomWalk, Level, Outcome, ProposalPolicy, State};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
