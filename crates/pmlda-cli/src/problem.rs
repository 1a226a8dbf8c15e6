//! Synthetic linear Gaussian inverse problem
//!
//! The finest level observes `d = G·θ + ε`. Coarser levels replace `G` with
//! `G + e_k·E`, where `E` is a fixed random perturbation and `e_k` the
//! configured model error, so cheaper levels are biased but correlated with
//! the fine posterior.

use crate::settings::{PriorKind, ProblemSettings};
use anyhow::{Context, Result};
use nalgebra::{DMatrix, DVector};
use pmlda_core::{
    ConfigError, ForwardMap, GaussianLikelihood, GaussianPrior, LinearForwardMap, LogPosterior,
    LogPrior, UniformBoxPrior,
};
use pmlda_dispatch::{BlockingModel, LogDensityModel, ModelError, ModelEvaluator, ModelHierarchy};
use pmlda_tree::{Level, State};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, StandardNormal};
use std::sync::Arc;

/// Either supported prior
#[derive(Debug, Clone)]
pub enum Prior {
    /// Independent normals
    Gaussian(GaussianPrior),
    /// Box
    Uniform(UniformBoxPrior),
}

impl LogPrior for Prior {
    fn log_prior(&self, params: &[f64]) -> Result<f64, ModelError> {
        match self {
            Prior::Gaussian(prior) => prior.log_prior(params),
            Prior::Uniform(prior) => prior.log_prior(params),
        }
    }
}

type LevelPosterior = LogPosterior<Prior, GaussianLikelihood<LinearForwardMap>>;

/// Generated problem: per-level posteriors and the data behind them
#[derive(Debug, Clone)]
pub struct SyntheticProblem {
    truth: State,
    data: Vec<f64>,
    levels: Vec<Arc<LevelPosterior>>,
    blocking: bool,
}

impl SyntheticProblem {
    /// Generate the problem from its settings
    ///
    /// # Errors
    /// Inconsistent dimensions or a non-positive noise level.
    pub fn generate(settings: &ProblemSettings) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(settings.seed);
        let dim = settings.dim;
        let observations = settings.observations;

        let forward = random_matrix(&mut rng, observations, dim);
        let perturbation = random_matrix(&mut rng, observations, dim);

        let prior = match settings.prior {
            PriorKind::Gaussian => Prior::Gaussian(GaussianPrior::standard(dim)),
            PriorKind::Uniform => Prior::Uniform(
                UniformBoxPrior::new(
                    vec![-settings.prior_bound; dim],
                    vec![settings.prior_bound; dim],
                )
                .context("invalid uniform prior")?,
            ),
        };

        let truth: Vec<f64> = match &settings.truth {
            Some(truth) => truth.clone(),
            None => match &prior {
                Prior::Gaussian(_) => (0..dim).map(|_| StandardNormal.sample(&mut rng)).collect(),
                Prior::Uniform(_) => {
                    let half = settings.prior_bound * 0.5;
                    (0..dim).map(|_| rng.gen_range(-half..=half)).collect()
                }
            },
        };

        let noise = Normal::new(0.0, settings.noise_std)
            .context("problem.noise_std must be positive")?;
        let clean = LinearForwardMap::new(forward.clone())
            .apply(&truth)
            .context("problem.truth does not match problem.dim")?;
        let data: Vec<f64> = clean.iter().map(|y| y + noise.sample(&mut rng)).collect();

        let variance = settings.noise_std * settings.noise_std;
        let levels = settings
            .level_error
            .iter()
            .map(|error| {
                let map = LinearForwardMap::new(&forward + &perturbation * *error);
                let likelihood = GaussianLikelihood::isotropic(map, data.clone(), variance)?;
                Ok(Arc::new(LogPosterior::new(prior.clone(), likelihood)))
            })
            .collect::<Result<Vec<_>, ConfigError>>()
            .context("failed to build level posteriors")?;

        tracing::debug!(
            dim,
            observations,
            levels = levels.len(),
            "Generated synthetic problem"
        );

        Ok(Self {
            truth: State::from(truth),
            data,
            levels,
            blocking: settings.blocking,
        })
    }

    /// Parameters the data were generated from
    #[must_use]
    pub fn truth(&self) -> &State {
        &self.truth
    }

    /// Observed data
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Number of levels
    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Log posterior of `state` at the finest level
    ///
    /// # Errors
    /// Dimension mismatch.
    pub fn finest_log_density(&self, state: &State) -> Result<f64, ModelError> {
        match self.levels.last() {
            Some(level) => level.log_density(state.as_slice()),
            None => Err(ModelError::LevelOutOfRange {
                level: Level::COARSEST,
                num_levels: 0,
            }),
        }
    }

    /// Model hierarchy for one chain
    #[must_use]
    pub fn evaluator(&self) -> Arc<dyn ModelEvaluator> {
        let hierarchy = self.levels.iter().fold(ModelHierarchy::new(), |h, level| {
            h.with_shared_level(Arc::clone(level) as Arc<dyn LogDensityModel>)
        });
        if self.blocking {
            Arc::new(BlockingModel::new(hierarchy))
        } else {
            Arc::new(hierarchy)
        }
    }
}

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> DMatrix<f64> {
    let scale = 1.0 / (cols as f64).sqrt();
    DMatrix::from_fn(rows, cols, |_, _| {
        let z: f64 = StandardNormal.sample(rng);
        z * scale
    })
}

/// Squared distance between a state and the truth, for reporting
#[must_use]
pub fn distance(a: &State, b: &State) -> f64 {
    let a = DVector::from_column_slice(a.as_slice());
    let b = DVector::from_column_slice(b.as_slice());
    (a - b).norm()
}
