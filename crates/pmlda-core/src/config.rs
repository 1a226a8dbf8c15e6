//! Sampler configuration
//!
//! Validated once at construction of a runner; nothing re-checks it per step.

use crate::error::ConfigError;
use pmlda_dispatch::DispatcherConfig;
use serde::{Deserialize, Serialize};

/// One fidelity level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    /// Display name
    pub name: String,
    /// Cost relative to the other levels, non-decreasing from coarsest to finest
    pub relative_cost: f64,
}

impl LevelSpec {
    /// Create a level description
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, relative_cost: f64) -> Self {
        Self {
            name: name.into(),
            relative_cost,
        }
    }
}

/// Configuration surface of a single-chain run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Maximum unresolved proposals in the tree, also its depth bound
    pub max_in_flight: usize,
    /// Worker tasks evaluating models
    pub num_workers: usize,
    /// Maximum queued evaluation jobs
    pub backlog_limit: usize,
    /// Chain length at which the run stops
    pub target_samples: usize,
    /// Seed for proposals and acceptance draws
    pub seed: u64,
    /// Resubmissions of a failed evaluation before it counts as a failure
    pub max_evaluation_retries: u32,
    /// Chain step of the initial state; a resumed chain continues numbering
    /// (and its random streams) from here
    pub start_step: u64,
    /// Fidelity levels, coarsest first
    pub levels: Vec<LevelSpec>,
}

impl SamplerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With fidelity levels
    #[must_use]
    pub fn with_levels(mut self, levels: Vec<LevelSpec>) -> Self {
        self.levels = levels;
        self
    }

    /// With `count` levels whose cost grows tenfold per level
    #[must_use]
    pub fn with_level_count(mut self, count: usize) -> Self {
        self.levels = (0..count)
            .map(|i| {
                let exponent = i32::try_from(i).unwrap_or(i32::MAX);
                LevelSpec::new(format!("level-{i}"), 10f64.powi(exponent))
            })
            .collect();
        self
    }

    /// With in-flight bound
    #[inline]
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// With worker count
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// With backlog bound
    #[inline]
    #[must_use]
    pub fn with_backlog_limit(mut self, backlog_limit: usize) -> Self {
        self.backlog_limit = backlog_limit;
        self
    }

    /// With target chain length
    #[inline]
    #[must_use]
    pub fn with_target_samples(mut self, target_samples: usize) -> Self {
        self.target_samples = target_samples;
        self
    }

    /// With seed
    #[inline]
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// With retry budget for failed evaluations
    #[inline]
    #[must_use]
    pub fn with_max_evaluation_retries(mut self, retries: u32) -> Self {
        self.max_evaluation_retries = retries;
        self
    }

    /// With the chain step of the initial state
    #[inline]
    #[must_use]
    pub fn with_start_step(mut self, start_step: u64) -> Self {
        self.start_step = start_step;
        self
    }

    /// Number of fidelity levels
    #[inline]
    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Dispatcher settings derived from this configuration
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig::new(self.num_workers, self.backlog_limit)
    }

    /// Check every bound and the level ordering
    ///
    /// # Errors
    /// The first violated constraint as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.levels.is_empty() {
            return Err(ConfigError::NoLevels);
        }
        if self.levels.len() > usize::from(u8::MAX) {
            return Err(ConfigError::TooManyLevels(self.levels.len()));
        }
        for (index, level) in self.levels.iter().enumerate() {
            if !level.relative_cost.is_finite() || level.relative_cost <= 0.0 {
                return Err(ConfigError::InvalidCost {
                    level: level.name.clone(),
                    cost: level.relative_cost,
                });
            }
            if let Some(previous) = index.checked_sub(1).map(|i| &self.levels[i]) {
                if level.relative_cost < previous.relative_cost {
                    return Err(ConfigError::LevelOrdering {
                        coarser: previous.name.clone(),
                        finer: level.name.clone(),
                    });
                }
            }
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::ZeroInFlight);
        }
        if self.num_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.backlog_limit == 0 {
            return Err(ConfigError::ZeroBacklog);
        }
        Ok(())
    }

    /// Parse from TOML
    ///
    /// # Errors
    /// [`ConfigError::Parse`] for malformed input. Does not validate.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Render as TOML
    ///
    /// # Errors
    /// [`ConfigError::Parse`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            num_workers: 4,
            backlog_limit: 64,
            target_samples: 1000,
            seed: 0,
            max_evaluation_retries: 0,
            start_step: 0,
            levels: vec![LevelSpec::new("coarse", 1.0), LevelSpec::new("fine", 10.0)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(SamplerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_empty_levels() {
        let config = SamplerConfig::new().with_levels(Vec::new());
        assert_eq!(config.validate(), Err(ConfigError::NoLevels));
    }

    #[test]
    fn rejects_decreasing_cost() {
        let config = SamplerConfig::new().with_levels(vec![
            LevelSpec::new("fine", 10.0),
            LevelSpec::new("coarse", 1.0),
        ]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LevelOrdering { .. })
        ));
    }

    #[test]
    fn rejects_non_positive_cost() {
        let config = SamplerConfig::new().with_levels(vec![LevelSpec::new("broken", 0.0)]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCost { .. })));
    }

    #[test]
    fn rejects_zero_bounds() {
        let base = SamplerConfig::new();
        assert_eq!(base.clone().with_workers(0).validate(), Err(ConfigError::ZeroWorkers));
        assert_eq!(
            base.clone().with_backlog_limit(0).validate(),
            Err(ConfigError::ZeroBacklog)
        );
        assert_eq!(
            base.with_max_in_flight(0).validate(),
            Err(ConfigError::ZeroInFlight)
        );
    }

    #[test]
    fn level_count_builder_is_ordered() {
        let config = SamplerConfig::new().with_level_count(3);
        assert_eq!(config.num_levels(), 3);
        assert!(config.validate().is_ok());
        assert_eq!(config.levels[2].relative_cost, 100.0);
    }

    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let config = SamplerConfig::from_toml_str(
            r#"
            num_workers = 2
            target_samples = 50

            [[levels]]
            name = "surrogate"
            relative_cost = 1.0
            "#,
        )
        .unwrap();

        assert_eq!(config.num_workers, 2);
        assert_eq!(config.target_samples, 50);
        assert_eq!(config.num_levels(), 1);
        assert_eq!(config.backlog_limit, SamplerConfig::default().backlog_limit);

        let rendered = config.to_toml_string().unwrap();
        assert_eq!(SamplerConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            SamplerConfig::from_toml_str("num_workers = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
