//! Independent parallel chains
//!
//! Each chain gets its own runner, tree, dispatcher and worker pool, and a
//! seed derived from the shared one. Nothing is shared between chains.

use crate::chain::{ChainSink, NullSink};
use crate::config::SamplerConfig;
use crate::error::{ConfigError, RunAborted, SamplerError};
use crate::runner::{ParallelRunner, RunReport};
use futures::future::join_all;
use pmlda_dispatch::ModelEvaluator;
use pmlda_tree::{distribute_seed, ProposalPolicy, State};
use std::sync::Arc;

/// Everything one chain needs besides the shared configuration
pub struct ChainSetup {
    /// Model hierarchy evaluated by this chain's workers
    pub evaluator: Arc<dyn ModelEvaluator>,
    /// Proposal policy
    pub policy: Arc<dyn ProposalPolicy>,
    /// Initial state
    pub initial: State,
    /// Chain step of `initial`, overriding the shared configuration
    pub start_step: Option<u64>,
    /// Destination of this chain's steps
    pub sink: Box<dyn ChainSink>,
}

impl ChainSetup {
    /// Setup with a [`NullSink`]
    #[must_use]
    pub fn new(
        evaluator: Arc<dyn ModelEvaluator>,
        policy: Arc<dyn ProposalPolicy>,
        initial: State,
    ) -> Self {
        Self {
            evaluator,
            policy,
            initial,
            start_step: None,
            sink: Box::new(NullSink),
        }
    }

    /// Resume this chain at `step`
    #[must_use]
    pub fn with_start_step(mut self, step: u64) -> Self {
        self.start_step = Some(step);
        self
    }

    /// With a chain sink
    #[must_use]
    pub fn with_sink(mut self, sink: impl ChainSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }
}

/// Outcome of one chain in a multi-chain run
pub type ChainOutcome = Result<RunReport, RunAborted>;

/// Run `num_chains` independent chains concurrently
///
/// `factory` is called once per chain index, in order, before any chain
/// starts. Chain `i` runs with seed `distribute_seed(config.seed, i)`.
///
/// # Errors
/// - `Configuration` for zero chains or an invalid config
/// - any error returned by `factory` or by runner construction
/// - `ChainFailed` if a chain task panics
pub async fn run_chains<F>(
    num_chains: usize,
    config: &SamplerConfig,
    mut factory: F,
) -> Result<Vec<ChainOutcome>, SamplerError>
where
    F: FnMut(usize) -> Result<ChainSetup, SamplerError>,
{
    if num_chains == 0 {
        return Err(ConfigError::NoChains.into());
    }
    config.validate()?;

    let mut runners = Vec::with_capacity(num_chains);
    for chain in 0..num_chains {
        let setup = factory(chain)?;
        let chain_config = config
            .clone()
            .with_seed(distribute_seed(config.seed, chain))
            .with_start_step(setup.start_step.unwrap_or(config.start_step));
        let runner = ParallelRunner::new(chain_config, setup.evaluator, setup.policy, setup.initial)?
            .with_sink(setup.sink)
            .with_chain_id(chain);
        runners.push(runner);
    }

    tracing::info!(chains = num_chains, seed = config.seed, "Starting independent chains");
    let handles: Vec<_> = runners
        .into_iter()
        .map(|runner| tokio::spawn(runner.run()))
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .enumerate()
        .map(|(chain, joined)| {
            joined.map_err(|e| SamplerError::ChainFailed {
                chain,
                reason: e.to_string(),
            })
        })
        .collect()
}
