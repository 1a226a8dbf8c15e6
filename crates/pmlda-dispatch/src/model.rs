//! Model boundary
//!
//! The dispatcher only knows [`ModelEvaluator`]: a hierarchy of log-density
//! functions indexed by [`Level`]. Concrete forward models plug in either
//! as an async evaluator or as plain synchronous [`LogDensityModel`]s
//! collected into a [`ModelHierarchy`].

use crate::error::ModelError;
use async_trait::async_trait;
use pmlda_tree::{Level, State};
use std::fmt;
use std::sync::Arc;

/// Hierarchy of log-density functions, one per fidelity level
#[async_trait]
pub trait ModelEvaluator: Send + Sync + 'static {
    /// Number of fidelity levels
    fn num_levels(&self) -> usize;

    /// Evaluate the log-density of `state` at `level`
    ///
    /// # Errors
    /// Any [`ModelError`]; the dispatcher reports it as a failed evaluation.
    async fn evaluate(&self, level: Level, state: &State) -> Result<f64, ModelError>;
}

/// Synchronous log-density function for a single level
pub trait LogDensityModel: Send + Sync {
    /// Evaluate the log-density at `state`
    ///
    /// # Errors
    /// Returns a [`ModelError`] when the model cannot produce a value.
    fn log_density(&self, state: &[f64]) -> Result<f64, ModelError>;
}

impl<F> LogDensityModel for F
where
    F: Fn(&[f64]) -> Result<f64, ModelError> + Send + Sync,
{
    fn log_density(&self, state: &[f64]) -> Result<f64, ModelError> {
        self(state)
    }
}

/// Ordered stack of synchronous models, coarsest first
#[derive(Clone, Default)]
pub struct ModelHierarchy {
    levels: Vec<Arc<dyn LogDensityModel>>,
}

impl ModelHierarchy {
    /// Create an empty hierarchy
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next finer level
    #[must_use]
    pub fn with_level(mut self, model: impl LogDensityModel + 'static) -> Self {
        self.levels.push(Arc::new(model));
        self
    }

    /// Append an already shared level
    #[must_use]
    pub fn with_shared_level(mut self, model: Arc<dyn LogDensityModel>) -> Self {
        self.levels.push(model);
        self
    }

    /// Number of levels
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Check for an empty hierarchy
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Model at `level`
    ///
    /// # Errors
    /// [`ModelError::LevelOutOfRange`] if the level does not exist.
    pub fn level(&self, level: Level) -> Result<&Arc<dyn LogDensityModel>, ModelError> {
        self.levels
            .get(level.index())
            .ok_or(ModelError::LevelOutOfRange {
                level,
                num_levels: self.levels.len(),
            })
    }
}

impl fmt::Debug for ModelHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHierarchy")
            .field("levels", &self.levels.len())
            .finish()
    }
}

#[async_trait]
impl ModelEvaluator for ModelHierarchy {
    fn num_levels(&self) -> usize {
        self.len()
    }

    async fn evaluate(&self, level: Level, state: &State) -> Result<f64, ModelError> {
        self.level(level)?.log_density(state.as_slice())
    }
}

/// Runs a [`ModelHierarchy`] on tokio's blocking thread pool
///
/// Use this for expensive forward models so long solves do not stall the
/// async worker tasks.
#[derive(Debug, Clone)]
pub struct BlockingModel {
    inner: ModelHierarchy,
}

impl BlockingModel {
    /// Wrap a hierarchy
    #[inline]
    #[must_use]
    pub fn new(inner: ModelHierarchy) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ModelEvaluator for BlockingModel {
    fn num_levels(&self) -> usize {
        self.inner.len()
    }

    async fn evaluate(&self, level: Level, state: &State) -> Result<f64, ModelError> {
        let model = Arc::clone(self.inner.level(level)?);
        let state = state.clone();
        tokio::task::spawn_blocking(move || model.log_density(state.as_slice()))
            .await
            .map_err(|e| ModelError::Failed(format!("blocking task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic(scale: f64) -> impl Fn(&[f64]) -> Result<f64, ModelError> {
        move |x: &[f64]| Ok(-scale * x.iter().map(|v| v * v).sum::<f64>())
    }

    #[tokio::test]
    async fn hierarchy_dispatches_by_level() {
        let model = ModelHierarchy::new()
            .with_level(quadratic(1.0))
            .with_level(quadratic(2.0));
        let state = State::from(vec![1.0, 1.0]);

        assert_eq!(model.num_levels(), 2);
        assert_eq!(model.evaluate(Level(0), &state).await, Ok(-2.0));
        assert_eq!(model.evaluate(Level(1), &state).await, Ok(-4.0));
        assert!(matches!(
            model.evaluate(Level(2), &state).await,
            Err(ModelError::LevelOutOfRange { num_levels: 2, .. })
        ));
    }

    #[tokio::test]
    async fn blocking_model_matches_inline_evaluation() {
        let hierarchy = ModelHierarchy::new().with_level(quadratic(0.5));
        let blocking = BlockingModel::new(hierarchy.clone());
        let state = State::from(vec![2.0]);

        assert_eq!(
            blocking.evaluate(Level(0), &state).await,
            hierarchy.evaluate(Level(0), &state).await
        );
    }
}
