//! Log-posterior building blocks
//!
//! Bayesian inverse problems compose a prior with a Gaussian likelihood of a
//! parameter-to-observable map. Each fidelity level typically shares the
//! prior and data and differs only in its forward map.

use crate::error::ConfigError;
use nalgebra::{DMatrix, DVector};
use pmlda_dispatch::{LogDensityModel, ModelError};

/// Parameter-to-observable map
pub trait ForwardMap: Send + Sync {
    /// Number of parameters
    fn input_dim(&self) -> usize;

    /// Number of observables
    fn output_dim(&self) -> usize;

    /// Evaluate the observables at `params`
    ///
    /// # Errors
    /// [`ModelError`] if the map cannot be evaluated.
    fn apply(&self, params: &[f64]) -> Result<DVector<f64>, ModelError>;
}

/// Affine map `G x + b`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearForwardMap {
    matrix: DMatrix<f64>,
    bias: DVector<f64>,
}

impl LinearForwardMap {
    /// Map with zero bias
    #[must_use]
    pub fn new(matrix: DMatrix<f64>) -> Self {
        let bias = DVector::zeros(matrix.nrows());
        Self { matrix, bias }
    }

    /// Map from row-major nested rows
    ///
    /// # Errors
    /// `DimensionMismatch` if the rows are ragged.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, ConfigError> {
        let ncols = rows.first().map_or(0, Vec::len);
        let mut flat = Vec::with_capacity(rows.len() * ncols);
        for row in rows {
            if row.len() != ncols {
                return Err(ConfigError::DimensionMismatch {
                    what: "forward map row",
                    expected: ncols,
                    actual: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }
        Ok(Self::new(DMatrix::from_row_slice(rows.len(), ncols, &flat)))
    }

    /// With a constant offset added to the observables
    ///
    /// # Errors
    /// `DimensionMismatch` if `bias` does not match the output size.
    pub fn with_bias(mut self, bias: Vec<f64>) -> Result<Self, ConfigError> {
        if bias.len() != self.matrix.nrows() {
            return Err(ConfigError::DimensionMismatch {
                what: "forward map bias",
                expected: self.matrix.nrows(),
                actual: bias.len(),
            });
        }
        self.bias = DVector::from_vec(bias);
        Ok(self)
    }
}

impl ForwardMap for LinearForwardMap {
    fn input_dim(&self) -> usize {
        self.matrix.ncols()
    }

    fn output_dim(&self) -> usize {
        self.matrix.nrows()
    }

    fn apply(&self, params: &[f64]) -> Result<DVector<f64>, ModelError> {
        if params.len() != self.matrix.ncols() {
            return Err(ModelError::DimensionMismatch {
                expected: self.matrix.ncols(),
                actual: params.len(),
            });
        }
        Ok(&self.matrix * DVector::from_column_slice(params) + &self.bias)
    }
}

/// Log prior density
pub trait LogPrior: Send + Sync {
    /// Evaluate at `params`; `−∞` outside the support
    ///
    /// # Errors
    /// [`ModelError`] on a dimension mismatch.
    fn log_prior(&self, params: &[f64]) -> Result<f64, ModelError>;
}

/// Log likelihood
pub trait LogLikelihood: Send + Sync {
    /// Evaluate at `params`
    ///
    /// # Errors
    /// [`ModelError`] if the underlying model fails.
    fn log_likelihood(&self, params: &[f64]) -> Result<f64, ModelError>;
}

/// Uniform prior on an axis-aligned box (unnormalised)
#[derive(Debug, Clone, PartialEq)]
pub struct UniformBoxPrior {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl UniformBoxPrior {
    /// Box `[lower, upper]`
    ///
    /// # Errors
    /// `DimensionMismatch` for bounds of different length.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, ConfigError> {
        if lower.len() != upper.len() {
            return Err(ConfigError::DimensionMismatch {
                what: "uniform prior bounds",
                expected: lower.len(),
                actual: upper.len(),
            });
        }
        Ok(Self { lower, upper })
    }
}

impl LogPrior for UniformBoxPrior {
    fn log_prior(&self, params: &[f64]) -> Result<f64, ModelError> {
        check_dim(self.lower.len(), params.len())?;
        let inside = params
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(x, (lo, hi))| lo <= x && x <= hi);
        Ok(if inside { 0.0 } else { f64::NEG_INFINITY })
    }
}

/// Independent Gaussian prior (unnormalised)
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianPrior {
    mean: Vec<f64>,
    std_dev: Vec<f64>,
}

impl GaussianPrior {
    /// Per-coordinate mean and standard deviation
    ///
    /// # Errors
    /// `DimensionMismatch` for vectors of different length.
    pub fn new(mean: Vec<f64>, std_dev: Vec<f64>) -> Result<Self, ConfigError> {
        if mean.len() != std_dev.len() {
            return Err(ConfigError::DimensionMismatch {
                what: "gaussian prior",
                expected: mean.len(),
                actual: std_dev.len(),
            });
        }
        Ok(Self { mean, std_dev })
    }

    /// Standard normal in `dim` dimensions
    #[must_use]
    pub fn standard(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            std_dev: vec![1.0; dim],
        }
    }
}

impl LogPrior for GaussianPrior {
    fn log_prior(&self, params: &[f64]) -> Result<f64, ModelError> {
        check_dim(self.mean.len(), params.len())?;
        Ok(-0.5
            * params
                .iter()
                .zip(self.mean.iter().zip(&self.std_dev))
                .map(|(x, (m, s))| ((x - m) / s).powi(2))
                .sum::<f64>())
    }
}

/// Gaussian likelihood of observed data under a forward map
///
/// `log L(x) = −½ (d − G(x))ᵀ Σ⁻¹ (d − G(x))`, with the precision `Σ⁻¹`
/// computed once at construction.
#[derive(Debug, Clone)]
pub struct GaussianLikelihood<F> {
    map: F,
    data: DVector<f64>,
    precision: DMatrix<f64>,
}

impl<F: ForwardMap> GaussianLikelihood<F> {
    /// Build from a forward map, observations and their covariance
    ///
    /// # Errors
    /// - `DimensionMismatch` if data, map output and covariance disagree
    /// - `SingularCovariance` if the covariance is not positive definite
    pub fn new(map: F, data: Vec<f64>, covariance: DMatrix<f64>) -> Result<Self, ConfigError> {
        if data.len() != map.output_dim() {
            return Err(ConfigError::DimensionMismatch {
                what: "observed data vs forward map output",
                expected: map.output_dim(),
                actual: data.len(),
            });
        }
        if !covariance.is_square() || covariance.nrows() != data.len() {
            return Err(ConfigError::DimensionMismatch {
                what: "covariance rows and columns",
                expected: data.len(),
                actual: if covariance.is_square() {
                    covariance.nrows()
                } else {
                    covariance.ncols()
                },
            });
        }
        let precision = covariance
            .cholesky()
            .ok_or(ConfigError::SingularCovariance)?
            .inverse();

        Ok(Self {
            map,
            data: DVector::from_vec(data),
            precision,
        })
    }

    /// Build with independent noise of equal variance
    ///
    /// # Errors
    /// As [`new`](Self::new).
    pub fn isotropic(map: F, data: Vec<f64>, variance: f64) -> Result<Self, ConfigError> {
        let covariance = DMatrix::from_diagonal_element(data.len(), data.len(), variance);
        Self::new(map, data, covariance)
    }

    /// Forward map
    #[inline]
    #[must_use]
    pub fn map(&self) -> &F {
        &self.map
    }
}

impl<F: ForwardMap> LogLikelihood for GaussianLikelihood<F> {
    fn log_likelihood(&self, params: &[f64]) -> Result<f64, ModelError> {
        let observed = self.map.apply(params)?;
        check_dim(self.data.len(), observed.len())?;
        let misfit = &self.data - observed;
        Ok(-0.5 * misfit.dot(&(&self.precision * &misfit)))
    }
}

/// Prior times likelihood, in log space
///
/// The likelihood is skipped wherever the prior is `−∞`, so out-of-support
/// proposals never reach the forward model.
#[derive(Debug, Clone)]
pub struct LogPosterior<P, L> {
    prior: P,
    likelihood: L,
}

impl<P: LogPrior, L: LogLikelihood> LogPosterior<P, L> {
    /// Compose a prior and a likelihood
    #[must_use]
    pub fn new(prior: P, likelihood: L) -> Self {
        Self { prior, likelihood }
    }

    /// Evaluate the log posterior
    ///
    /// # Errors
    /// Errors of the prior or the likelihood.
    pub fn evaluate(&self, params: &[f64]) -> Result<f64, ModelError> {
        let prior = self.prior.log_prior(params)?;
        if prior == f64::NEG_INFINITY {
            return Ok(prior);
        }
        Ok(prior + self.likelihood.log_likelihood(params)?)
    }
}

impl<P: LogPrior, L: LogLikelihood> LogDensityModel for LogPosterior<P, L> {
    fn log_density(&self, state: &[f64]) -> Result<f64, ModelError> {
        self.evaluate(state)
    }
}

fn check_dim(expected: usize, actual: usize) -> Result<(), ModelError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ModelError::DimensionMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn identity(dim: usize) -> LinearForwardMap {
        LinearForwardMap::new(DMatrix::identity(dim, dim))
    }

    #[test]
    fn gaussian_likelihood_is_quadratic_misfit() {
        let likelihood = GaussianLikelihood::isotropic(identity(2), vec![1.0, 2.0], 0.5).unwrap();
        // misfit (1, 2), precision 2 I
        assert!((likelihood.log_likelihood(&[0.0, 0.0]).unwrap() + 5.0).abs() < 1e-12);
        assert_eq!(likelihood.log_likelihood(&[1.0, 2.0]).unwrap(), 0.0);
    }

    #[test]
    fn likelihood_checks_sizes_at_construction() {
        let wrong_data = GaussianLikelihood::isotropic(identity(2), vec![1.0], 1.0);
        assert!(matches!(
            wrong_data,
            Err(ConfigError::DimensionMismatch { .. })
        ));

        let wrong_cov =
            GaussianLikelihood::new(identity(2), vec![0.0, 0.0], DMatrix::identity(3, 3));
        assert!(matches!(wrong_cov, Err(ConfigError::DimensionMismatch { .. })));

        let singular =
            GaussianLikelihood::new(identity(2), vec![0.0, 0.0], DMatrix::zeros(2, 2));
        assert!(matches!(singular, Err(ConfigError::SingularCovariance)));
    }

    #[test]
    fn linear_map_applies_bias() {
        let map = LinearForwardMap::from_rows(&[vec![1.0, 1.0], vec![0.0, 2.0]])
            .unwrap()
            .with_bias(vec![0.5, -0.5])
            .unwrap();
        let out = map.apply(&[1.0, 2.0]).unwrap();
        assert_eq!(out.as_slice(), &[3.5, 3.5]);
        assert!(map.apply(&[1.0]).is_err());
        assert!(LinearForwardMap::from_rows(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn priors() {
        let uniform = UniformBoxPrior::new(vec![-1.0, -1.0], vec![1.0, 1.0]).unwrap();
        assert_eq!(uniform.log_prior(&[0.0, 0.5]).unwrap(), 0.0);
        assert_eq!(uniform.log_prior(&[2.0, 0.0]).unwrap(), f64::NEG_INFINITY);
        assert!(uniform.log_prior(&[0.0]).is_err());

        let gaussian = GaussianPrior::new(vec![1.0], vec![2.0]).unwrap();
        assert_eq!(gaussian.log_prior(&[3.0]).unwrap(), -0.5);
        assert_eq!(GaussianPrior::standard(2).log_prior(&[0.0, 0.0]).unwrap(), 0.0);
    }

    struct CountingLikelihood(AtomicUsize);

    impl LogLikelihood for CountingLikelihood {
        fn log_likelihood(&self, _params: &[f64]) -> Result<f64, ModelError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(-1.0)
        }
    }

    #[test]
    fn posterior_skips_likelihood_outside_prior_support() {
        let prior = UniformBoxPrior::new(vec![0.0], vec![1.0]).unwrap();
        let posterior = LogPosterior::new(prior, CountingLikelihood(AtomicUsize::new(0)));

        assert_eq!(posterior.evaluate(&[5.0]).unwrap(), f64::NEG_INFINITY);
        assert_eq!(posterior.likelihood.0.load(Ordering::Relaxed), 0);

        assert_eq!(posterior.log_density(&[0.5]).unwrap(), -1.0);
        assert_eq!(posterior.likelihood.0.load(Ordering::Relaxed), 1);
    }
}
