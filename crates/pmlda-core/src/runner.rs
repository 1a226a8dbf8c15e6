//! Parallel runner
//!
//! Single control task driving one chain:
//! - `Expanding` grows the speculative tree up to `max_in_flight` proposals
//! - `Dispatching` submits the next missing evaluation of every pending proposal
//! - `Collecting` merges finished evaluations, parking only when nothing is ready
//! - `Deciding` resolves proposals, advances the root and prunes dead branches
//!
//! Evaluation failures never abort a run: after the retry budget is spent the
//! failure is stored as a result and the proposal it belongs to is rejected.

use crate::chain::{Chain, ChainLink, ChainSink, NullSink};
use crate::config::SamplerConfig;
use crate::engine::{Decision, DecisionCause, DelayedAcceptance, EvaluationNeed, Resolution};
use crate::error::{ConfigError, RunAborted, SamplerError};
use crate::phase::{validate_transition, RunnerPhase};
use crate::stats::RunStatistics;
use pmlda_dispatch::{EvaluationResult, JobDispatcher, ModelEvaluator};
use pmlda_tree::{
    Level, LevelResult, NodeId, ProposalPolicy, RandomStreams, SpeculativeTree, State,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;
use ulid::Ulid;

/// Chain steps between progress messages
const PROGRESS_INTERVAL: usize = 100;

/// Minimum resubmissions of a failed current-state evaluation
const CURRENT_STATE_RETRIES: u32 = 3;

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique run identifier
    pub run_id: Ulid,
    /// Chain index within a multi-chain run
    pub chain_id: usize,
    /// Seed the run used
    pub seed: u64,
    /// Chain produced
    pub chain: Chain,
    /// Counters
    pub statistics: RunStatistics,
    /// Last chain state, for restarts
    pub final_state: State,
}

/// Drives one chain to its target length
pub struct ParallelRunner {
    config: SamplerConfig,
    chain_id: usize,
    run_id: Ulid,
    streams: RandomStreams,
    policy: Arc<dyn ProposalPolicy>,
    tree: SpeculativeTree,
    dispatcher: JobDispatcher,
    engine: DelayedAcceptance,
    sink: Box<dyn ChainSink>,
    chain: Chain,
    phase: RunnerPhase,
    outstanding: HashSet<EvaluationNeed>,
    failures: HashMap<EvaluationNeed, u32>,
    decisions: HashMap<NodeId, Decision>,
    stats: RunStatistics,
    progressed: bool,
}

impl ParallelRunner {
    /// Create a runner starting at `initial`
    ///
    /// Starts the dispatcher's workers, so it must be called inside a tokio
    /// runtime.
    ///
    /// # Errors
    /// - `Configuration` for an invalid config or a model with a different
    ///   number of levels
    /// - `Dispatch` if the worker pool cannot start
    pub fn new(
        config: SamplerConfig,
        evaluator: Arc<dyn ModelEvaluator>,
        policy: Arc<dyn ProposalPolicy>,
        initial: State,
    ) -> Result<Self, SamplerError> {
        config.validate()?;
        let num_levels = config.num_levels();
        if evaluator.num_levels() != num_levels {
            return Err(ConfigError::LevelCountMismatch {
                configured: num_levels,
                model: evaluator.num_levels(),
            }
            .into());
        }

        let streams = RandomStreams::new(config.seed);
        let dispatcher = JobDispatcher::new(evaluator, config.dispatcher())?;

        Ok(Self {
            chain_id: 0,
            run_id: Ulid::new(),
            tree: SpeculativeTree::new(initial.clone(), num_levels, config.max_in_flight)
                .with_start_step(config.start_step),
            engine: DelayedAcceptance::new(num_levels, streams.clone()),
            streams,
            policy,
            dispatcher,
            sink: Box::new(NullSink),
            chain: Chain::new(initial),
            phase: RunnerPhase::Expanding,
            outstanding: HashSet::new(),
            failures: HashMap::new(),
            decisions: HashMap::new(),
            stats: RunStatistics::new(num_levels),
            progressed: false,
            config,
        })
    }

    /// With a chain sink
    #[must_use]
    pub fn with_sink(mut self, sink: impl ChainSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// With a chain index, used for log attribution and in chain links
    #[must_use]
    pub fn with_chain_id(mut self, chain_id: usize) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> RunnerPhase {
        self.phase
    }

    /// Chain so far
    #[inline]
    #[must_use]
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Speculative tree
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &SpeculativeTree {
        &self.tree
    }

    /// Counters so far
    #[inline]
    #[must_use]
    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    /// Run until the chain reaches its target length
    ///
    /// # Errors
    /// [`RunAborted`] on a fatal error, carrying the samples accepted so far.
    pub async fn run(mut self) -> Result<RunReport, RunAborted> {
        let span = tracing::info_span!("chain", id = self.chain_id);
        async move {
            tracing::info!(
                run_id = %self.run_id,
                target = self.config.target_samples,
                levels = self.config.num_levels(),
                workers = self.config.num_workers,
                max_in_flight = self.config.max_in_flight,
                "Run started"
            );

            let outcome = match self.drive().await {
                Ok(()) => self
                    .sink
                    .finish()
                    .map_err(|e| SamplerError::Sink(e.to_string())),
                Err(e) => Err(e),
            };
            self.dispatcher.shutdown();
            self.stats.absorb(&self.dispatcher.stats());

            match outcome {
                Ok(()) => {
                    tracing::info!(
                        samples = self.chain.len(),
                        acceptance_rate = self.chain.acceptance_rate(),
                        submitted = self.stats.submitted,
                        "Run complete"
                    );
                    Ok(self.into_report())
                }
                Err(error) => {
                    tracing::error!(%error, samples = self.chain.len(), "Run aborted");
                    Err(RunAborted {
                        error,
                        partial: Box::new(self.into_report()),
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> Result<(), SamplerError> {
        loop {
            match self.phase {
                RunnerPhase::Expanding => {
                    if self.target_reached() {
                        self.transition(RunnerPhase::Done)?;
                        continue;
                    }
                    self.progressed = false;
                    let created = self.tree.expand(self.policy.as_ref(), &self.streams);
                    self.stats.max_tree_depth = self.stats.max_tree_depth.max(self.tree.max_depth());
                    if !created.is_empty() {
                        self.progressed = true;
                        tracing::debug!(created = created.len(), "Tree expanded");
                    }
                    self.transition(RunnerPhase::Dispatching)?;
                }
                RunnerPhase::Dispatching => {
                    self.dispatch()?;
                    self.transition(RunnerPhase::Collecting)?;
                }
                RunnerPhase::Collecting => {
                    self.collect().await?;
                    self.transition(RunnerPhase::Deciding)?;
                }
                RunnerPhase::Deciding => {
                    self.decide()?;
                    if self.target_reached() {
                        self.transition(RunnerPhase::Done)?;
                    } else if !self.progressed && self.dispatcher.in_flight() == 0 {
                        return Err(SamplerError::Stalled {
                            chain_len: self.chain.len(),
                        });
                    } else {
                        self.transition(RunnerPhase::Expanding)?;
                    }
                }
                RunnerPhase::Done => return Ok(()),
            }
        }
    }

    fn transition(&mut self, to: RunnerPhase) -> Result<(), SamplerError> {
        validate_transition(self.phase, to)?;
        tracing::trace!(from = %self.phase, %to, "Phase transition");
        self.phase = to;
        Ok(())
    }

    fn target_reached(&self) -> bool {
        self.chain.len() >= self.config.target_samples
    }

    /// Submit the lowest missing level of every pending proposal, shallowest first
    fn dispatch(&mut self) -> Result<(), SamplerError> {
        for id in self.tree.pending_proposals() {
            let Some(candidate) = self.tree.candidate(id) else {
                continue;
            };
            let Resolution::Incomplete(needs) = self.engine.try_resolve(&candidate) else {
                continue;
            };

            for need in needs {
                if self.outstanding.contains(&need) {
                    continue;
                }
                let Some(state) = source_state(&self.tree, id, need.source) else {
                    continue;
                };
                match self.dispatcher.submit(need.source, need.level, state) {
                    Ok(_) => {
                        self.outstanding.insert(need);
                        self.progressed = true;
                        tracing::debug!(source = %need.source, level = %need.level, "Evaluation submitted");
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::warn!(
                            error = %e,
                            in_flight = self.dispatcher.in_flight(),
                            "Backlog full, deferring submissions"
                        );
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    async fn collect(&mut self) -> Result<(), SamplerError> {
        let mut results = self.dispatcher.poll();
        if results.is_empty() && self.dispatcher.in_flight() > 0 {
            results = self.dispatcher.wait().await;
        }
        for result in results {
            self.merge(result)?;
        }
        Ok(())
    }

    /// Store one result
    ///
    /// A failed proposal evaluation is retried up to the configured budget
    /// and then stored as `Failed`, which force-rejects that proposal. The
    /// current state is never marked `Failed`: every later proposal is judged
    /// against it, so its evaluation is resubmitted until the retry budget
    /// runs out and the run aborts.
    fn merge(&mut self, result: EvaluationResult) -> Result<(), SamplerError> {
        let need = EvaluationNeed {
            source: result.node,
            level: result.level,
        };
        self.outstanding.remove(&need);
        self.progressed = true;

        match result.outcome {
            Ok(value) => {
                if !self
                    .tree
                    .record(need.source, need.level, LevelResult::LogDensity(value))
                {
                    self.stats.stale_results += 1;
                    tracing::trace!(source = %need.source, level = %need.level, "Stale result ignored");
                }
            }
            Err(error) => {
                self.stats.evaluation_failures += 1;
                let attempts = {
                    let attempts = self.failures.entry(need).or_insert(0);
                    *attempts += 1;
                    *attempts
                };

                if need.source == self.tree.root_node().source {
                    let budget = self.config.max_evaluation_retries.max(CURRENT_STATE_RETRIES);
                    if attempts > budget {
                        return Err(SamplerError::CurrentStateUnavailable {
                            chain_len: self.chain.len(),
                            error,
                        });
                    }
                    self.stats.retries += 1;
                    tracing::warn!(%error, attempt = attempts, "Current state evaluation failed, resubmitting");
                } else if attempts <= self.config.max_evaluation_retries
                    && self.tree.source_in_use(need.source)
                {
                    self.stats.retries += 1;
                    tracing::warn!(%error, attempt = attempts, "Evaluation failed, retrying");
                } else {
                    tracing::warn!(%error, "Evaluation failed, rejecting its proposal");
                    self.tree.record(need.source, need.level, LevelResult::Failed);
                }
            }
        }
        Ok(())
    }

    /// Resolve everything decidable and advance the root as far as possible
    fn decide(&mut self) -> Result<(), SamplerError> {
        loop {
            let mut decided = false;

            for id in self.tree.pending_proposals() {
                let Some(candidate) = self.tree.candidate(id) else {
                    continue;
                };
                let Resolution::Decided(decision) = self.engine.try_resolve(&candidate) else {
                    continue;
                };

                let pruned = self.tree.resolve(id, decision.outcome)?;
                self.stats.record_decision(&decision);
                if decision.cause == DecisionCause::EvaluationFailed {
                    tracing::warn!(node = %id, level = %decision.level, "Proposal force-rejected");
                }
                tracing::debug!(
                    node = %id,
                    outcome = %decision.outcome,
                    level = %decision.level,
                    pruned = pruned.nodes.len(),
                    "Proposal decided"
                );

                self.decisions.insert(id, decision);
                self.engine.release(pruned.nodes.iter().copied());
                for source in pruned.sources {
                    self.cancel_source(source);
                }
                decided = true;
            }

            while !self.target_reached() {
                let Some(next) = self.tree.decided_root_child() else {
                    break;
                };
                self.advance(next)?;
                decided = true;
            }

            if decided {
                self.progressed = true;
            }
            if !decided || self.target_reached() {
                return Ok(());
            }
        }
    }

    fn advance(&mut self, next: NodeId) -> Result<(), SamplerError> {
        let decided_at = self
            .decisions
            .remove(&next)
            .map_or(Level::COARSEST, |d| d.level);
        let advance = self.tree.advance_root(next)?;

        self.engine.release(advance.discarded.iter().copied());
        for id in &advance.discarded {
            self.decisions.remove(id);
        }
        for source in advance.released_sources {
            self.cancel_source(source);
        }

        self.stats.record_step(advance.outcome);
        let first_index = usize::try_from(self.config.start_step).unwrap_or(usize::MAX);
        let link = ChainLink {
            index: first_index.saturating_add(self.chain.len()),
            chain: self.chain_id,
            outcome: advance.outcome,
            decided_at,
            log_density: self.tree.top_log_density(advance.new_root),
            state: advance.state,
            node: next,
        };
        let record = self.sink.record(&link);
        self.chain.push(link);
        record.map_err(|e| SamplerError::Sink(e.to_string()))?;

        if self.chain.len() % PROGRESS_INTERVAL == 0 {
            tracing::info!(
                samples = self.chain.len(),
                acceptance_rate = self.chain.acceptance_rate(),
                "Chain progress"
            );
        }
        Ok(())
    }

    fn cancel_source(&mut self, source: NodeId) {
        let cancelled = self.dispatcher.cancel(source);
        self.outstanding.retain(|need| need.source != source);
        self.failures.retain(|need, _| need.source != source);
        if cancelled > 0 {
            tracing::debug!(%source, jobs = cancelled, "Cancelled evaluations of pruned branch");
        }
    }

    fn into_report(self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            chain_id: self.chain_id,
            seed: self.config.seed,
            final_state: self.chain.last_state().clone(),
            chain: self.chain,
            statistics: self.stats,
        }
    }
}

impl fmt::Debug for ParallelRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelRunner")
            .field("chain_id", &self.chain_id)
            .field("run_id", &self.run_id)
            .field("phase", &self.phase)
            .field("chain_len", &self.chain.len())
            .field("tree_nodes", &self.tree.len())
            .field("in_flight", &self.dispatcher.in_flight())
            .finish_non_exhaustive()
    }
}

/// State evaluated by `source` as seen from proposal `node`
fn source_state(tree: &SpeculativeTree, node: NodeId, source: NodeId) -> Option<State> {
    let proposal = tree.node(node)?;
    if proposal.source == source {
        return Some(proposal.state.clone());
    }
    let parent = tree.node(proposal.parent?)?;
    (parent.source == source).then(|| parent.state.clone())
}
