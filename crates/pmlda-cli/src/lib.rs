//! PMLDA CLI - command line front end
//!
//! Samples a synthetic multilevel inverse problem with the prefetching
//! delayed-acceptance runner:
//! - TOML configuration covering sampler, proposal, problem and output
//! - JSON-lines chain output and restarts from a previous run
//! - Several independent chains in one process

#![warn(unreachable_pub)]

pub mod commands;
pub mod logging;
pub mod problem;
pub mod settings;
pub mod sink;

pub use commands::{check_config, run, simulation_config, RunOptions, RunSummary};
pub use logging::init_tracing;
pub use problem::SyntheticProblem;
pub use settings::{AppConfig, PriorKind, ProblemSettings, ProposalSettings, RunSettings};
pub use sink::{read_last_link, read_last_state, JsonLinesSink};
