//! Application configuration file
//!
//! ```toml
//! [sampler]
//! num_workers = 4
//! target_samples = 2000
//!
//! [[sampler.levels]]
//! name = "coarse"
//! relative_cost = 1.0
//!
//! [proposal]
//! step_width = 0.3
//!
//! [problem]
//! dim = 2
//! level_error = [0.2]
//!
//! [run]
//! chains = 1
//! ```

use anyhow::{bail, Context, Result};
use pmlda_core::SamplerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Random-walk proposal settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalSettings {
    /// Isotropic step width
    pub step_width: f64,
    /// Per-coordinate step widths, overriding `step_width`
    pub step_widths: Option<Vec<f64>>,
}

impl Default for ProposalSettings {
    fn default() -> Self {
        Self {
            step_width: 0.3,
            step_widths: None,
        }
    }
}

/// Prior family of the synthetic problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorKind {
    /// Standard normal
    Gaussian,
    /// Uniform on `[-prior_bound, prior_bound]^dim`
    Uniform,
}

/// Synthetic linear Gaussian inverse problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProblemSettings {
    /// Parameter dimension
    pub dim: usize,
    /// Number of observations
    pub observations: usize,
    /// Observation noise standard deviation
    pub noise_std: f64,
    /// Model error of each level's forward map, coarsest first; the finest is usually 0
    pub level_error: Vec<f64>,
    /// Parameters the data are generated from; drawn from the prior if absent
    pub truth: Option<Vec<f64>>,
    /// Prior family
    pub prior: PriorKind,
    /// Half-width of the uniform prior box
    pub prior_bound: f64,
    /// Seed for the forward maps and the data
    pub seed: u64,
    /// Evaluate on the blocking thread pool
    pub blocking: bool,
}

impl Default for ProblemSettings {
    fn default() -> Self {
        Self {
            dim: 2,
            observations: 8,
            noise_std: 0.5,
            level_error: vec![0.2, 0.0],
            truth: None,
            prior: PriorKind::Gaussian,
            prior_bound: 5.0,
            seed: 1,
            blocking: false,
        }
    }
}

/// Run settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Independent chains
    pub chains: Option<usize>,
    /// JSON-lines output file
    pub output: Option<PathBuf>,
    /// Initial state; the prior mean if absent
    pub initial: Option<Vec<f64>>,
    /// Log every n-th chain step of chain 0
    pub log_every: Option<usize>,
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Sampler
    pub sampler: SamplerConfig,
    /// Proposal
    pub proposal: ProposalSettings,
    /// Problem
    pub problem: ProblemSettings,
    /// Run
    pub run: RunSettings,
}

impl AppConfig {
    /// Parse from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("invalid configuration file")
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Check the sampler config and its consistency with the problem
    pub fn validate(&self) -> Result<()> {
        self.sampler.validate()?;
        let levels = self.sampler.num_levels();
        let problem = &self.problem;

        if problem.level_error.len() != levels {
            bail!(
                "problem.level_error has {} entries but {} levels are configured",
                problem.level_error.len(),
                levels
            );
        }
        if problem.dim == 0 || problem.observations == 0 {
            bail!("problem.dim and problem.observations must be positive");
        }
        if !(problem.noise_std.is_finite() && problem.noise_std > 0.0) {
            bail!("problem.noise_std must be positive");
        }
        if let Some(truth) = &problem.truth {
            ensure_dim("problem.truth", truth.len(), problem.dim)?;
        }
        if let Some(initial) = &self.run.initial {
            ensure_dim("run.initial", initial.len(), problem.dim)?;
        }
        if let Some(widths) = &self.proposal.step_widths {
            ensure_dim("proposal.step_widths", widths.len(), problem.dim)?;
        }
        if self.run.chains == Some(0) {
            bail!("run.chains must be at least 1");
        }
        Ok(())
    }

    /// Number of chains to run
    #[must_use]
    pub fn chains(&self) -> usize {
        self.run.chains.unwrap_or(1)
    }
}

fn ensure_dim(what: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        bail!("{what} has {actual} entries, expected {expected}");
    }
    Ok(())
}
