//! Subcommand implementations

use crate::problem::{distance, SyntheticProblem};
use crate::settings::AppConfig;
use crate::sink::{chain_path, read_last_link, JsonLinesSink, Tee};
use anyhow::{bail, Context, Result};
use pmlda_core::{
    run_chains, ChainSetup, ChainSink, NullSink, RunReport, SamplerConfig, TracingSink,
};
use pmlda_tree::{GaussianRandomWalk, ProposalPolicy, State};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Command-line overrides for `run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Output file, replacing `run.output`
    pub output: Option<PathBuf>,
    /// Start from the last state of this chain output
    pub resume: Option<PathBuf>,
    /// Chain count, replacing `run.chains`
    pub chains: Option<usize>,
}

/// Finished run: the generated problem and one report per chain
#[derive(Debug)]
pub struct RunSummary {
    /// Problem the chains sampled
    pub problem: SyntheticProblem,
    /// Reports in chain order
    pub reports: Vec<RunReport>,
    /// Files written, in chain order
    pub outputs: Vec<PathBuf>,
}

/// Load and validate a configuration file
///
/// # Errors
/// Unreadable, malformed, or inconsistent configuration.
pub fn check_config(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load(path)?;
    config
        .validate()
        .with_context(|| format!("{} is not a valid configuration", path.display()))?;
    Ok(config)
}

/// Sample the configured problem
///
/// # Errors
/// Invalid configuration, unreadable resume file, or an aborted chain.
pub async fn run(mut config: AppConfig, options: RunOptions) -> Result<RunSummary> {
    if let Some(output) = options.output {
        config.run.output = Some(output);
    }
    if let Some(chains) = options.chains {
        config.run.chains = Some(chains);
    }
    config.validate()?;

    let problem = SyntheticProblem::generate(&config.problem)?;
    let policy: Arc<dyn ProposalPolicy> = match &config.proposal.step_widths {
        Some(widths) => Arc::new(GaussianRandomWalk::with_step_widths(widths.clone())),
        None => Arc::new(GaussianRandomWalk::new(config.proposal.step_width)),
    };
    let chains = config.chains();
    let starts = match &options.resume {
        Some(resume) => resume_points(resume, chains, config.problem.dim)?,
        None => {
            let initial = State::from(
                config
                    .run
                    .initial
                    .clone()
                    .unwrap_or_else(|| vec![0.0; config.problem.dim]),
            );
            let step = config.sampler.start_step;
            vec![ResumePoint { state: initial, step }; chains]
        }
    };

    let log_every = config.run.log_every.unwrap_or(100);
    let mut outputs = Vec::new();
    let mut sinks: Vec<Option<Box<dyn ChainSink>>> = Vec::with_capacity(chains);
    for chain in 0..chains {
        let file = match &config.run.output {
            Some(path) => {
                let path = chain_path(path, chain, chains);
                let sink = JsonLinesSink::create(&path)?;
                outputs.push(path);
                Some(sink)
            }
            None => None,
        };
        let sink: Box<dyn ChainSink> = match (file, chain) {
            (Some(file), 0) => Box::new(Tee(file, TracingSink::new(log_every))),
            (Some(file), _) => Box::new(file),
            (None, 0) => Box::new(TracingSink::new(log_every)),
            (None, _) => Box::new(NullSink),
        };
        sinks.push(Some(sink));
    }

    let outcomes = run_chains(chains, &config.sampler, |chain| {
        let start = &starts[chain];
        let mut setup =
            ChainSetup::new(problem.evaluator(), Arc::clone(&policy), start.state.clone())
                .with_start_step(start.step);
        if let Some(sink) = sinks.get_mut(chain).and_then(Option::take) {
            setup = setup.with_sink(sink);
        }
        Ok(setup)
    })
    .await?;

    let mut reports = Vec::with_capacity(outcomes.len());
    for (chain, outcome) in outcomes.into_iter().enumerate() {
        let report = outcome.with_context(|| format!("chain {chain} aborted"))?;
        reports.push(report);
    }

    Ok(RunSummary {
        problem,
        reports,
        outputs,
    })
}

/// Where a chain starts
#[derive(Debug, Clone, PartialEq)]
struct ResumePoint {
    state: State,
    step: u64,
}

/// Last state and next step of every chain's previous output
///
/// Chain `i` resumes from `chain_path(resume, i, chains)`, so each chain
/// continues its own trajectory and its own random streams.
fn resume_points(resume: &Path, chains: usize, dim: usize) -> Result<Vec<ResumePoint>> {
    (0..chains)
        .map(|chain| {
            let path = chain_path(resume, chain, chains);
            let link = read_last_link(&path)
                .with_context(|| format!("cannot resume chain {chain} from {}", path.display()))?;
            if link.state.dim() != dim {
                bail!(
                    "{} holds {}-dimensional states, the problem has dimension {dim}",
                    path.display(),
                    link.state.dim()
                );
            }
            let step = u64::try_from(link.index).map_or(u64::MAX, |i| i.saturating_add(1));
            tracing::info!(chain, path = %path.display(), step, "Resuming from last recorded state");
            Ok(ResumePoint {
                state: link.state,
                step,
            })
        })
        .collect()
}

/// Built-in problem with `levels` levels, for quick experiments
///
/// Model error decreases linearly from 0.3 at the coarsest level to 0 at
/// the finest.
///
/// # Errors
/// Zero levels or zero samples requested.
pub fn simulation_config(levels: usize, samples: usize, workers: usize, seed: u64) -> Result<AppConfig> {
    if levels == 0 {
        bail!("at least one level is required");
    }
    let mut config = AppConfig {
        sampler: SamplerConfig::new()
            .with_level_count(levels)
            .with_target_samples(samples)
            .with_workers(workers)
            .with_max_in_flight(workers.max(1) * 2)
            .with_seed(seed),
        ..AppConfig::default()
    };
    config.problem.level_error = (0..levels)
        .map(|k| {
            if levels == 1 {
                0.0
            } else {
                0.3 * (levels - 1 - k) as f64 / (levels - 1) as f64
            }
        })
        .collect();
    config.validate()?;
    Ok(config)
}

/// Posterior mean over the recorded chain states
#[must_use]
pub fn chain_mean(report: &RunReport) -> Vec<f64> {
    let dim = report.chain.initial().dim();
    let mut mean = vec![0.0; dim];
    let mut count = 0usize;
    for state in report.chain.states() {
        for (m, x) in mean.iter_mut().zip(state.iter()) {
            *m += x;
        }
        count += 1;
    }
    if count > 0 {
        for m in &mut mean {
            *m /= count as f64;
        }
    }
    mean
}

/// Print a human-readable summary to stdout
pub fn print_summary(summary: &RunSummary) {
    println!("Truth: {:?}", summary.problem.truth().as_slice());
    for report in &summary.reports {
        let stats = &report.statistics;
        let mean = State::from(chain_mean(report));
        println!();
        println!("Chain {} (run {}, seed {})", report.chain_id, report.run_id, report.seed);
        println!("  Samples:          {}", report.chain.len());
        println!("  Acceptance rate:  {:.3}", report.chain.acceptance_rate());
        println!("  Rejections/level: {:?}", stats.rejections_per_level);
        println!("  Submitted/level:  {:?}", stats.submitted_per_level);
        println!("  Forced rejects:   {}", stats.forced_rejections);
        println!("  Cancelled jobs:   {}", stats.cancelled);
        println!("  Max tree depth:   {}", stats.max_tree_depth);
        println!("  Posterior mean:   {:?}", mean.as_slice());
        println!(
            "  |mean - truth|:   {:.4}",
            distance(&mean, summary.problem.truth())
        );
        println!("  Final state:      {:?}", report.final_state.as_slice());
    }
    for path in &summary.outputs {
        println!("Wrote {}", path.display());
    }
}
