//! Testing utilities for the PMLDA workspace
//!
//! Synthetic model hierarchies, wrappers that reorder or break evaluations,
//! and sinks that keep what they receive.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pmlda_core::{ChainLink, ChainSink, LevelSpec, SamplerConfig};
use pmlda_dispatch::{ModelError, ModelEvaluator};
use pmlda_tree::{Level, State};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Same log-density for every state and level
#[derive(Debug, Clone, Copy)]
pub struct ConstantModel {
    pub levels: usize,
    pub value: f64,
}

impl ConstantModel {
    pub fn new(levels: usize, value: f64) -> Self {
        Self { levels, value }
    }
}

#[async_trait]
impl ModelEvaluator for ConstantModel {
    fn num_levels(&self) -> usize {
        self.levels
    }

    async fn evaluate(&self, _level: Level, _state: &State) -> Result<f64, ModelError> {
        Ok(self.value)
    }
}

/// Model defined by a closure of level and coordinates
pub struct FnModel<F> {
    levels: usize,
    f: F,
}

impl<F> FnModel<F>
where
    F: Fn(Level, &[f64]) -> Result<f64, ModelError> + Send + Sync + 'static,
{
    pub fn new(levels: usize, f: F) -> Self {
        Self { levels, f }
    }
}

#[async_trait]
impl<F> ModelEvaluator for FnModel<F>
where
    F: Fn(Level, &[f64]) -> Result<f64, ModelError> + Send + Sync + 'static,
{
    fn num_levels(&self) -> usize {
        self.levels
    }

    async fn evaluate(&self, level: Level, state: &State) -> Result<f64, ModelError> {
        (self.f)(level, state.as_slice())
    }
}

/// Standard-normal target whose coarse levels are shifted copies
///
/// Level `k` of `n` is centred at `0.1 · (n − 1 − k)` in every coordinate, so
/// the finest level is exact and coarser ones are increasingly biased.
pub fn gaussian_levels(
    levels: usize,
) -> FnModel<impl Fn(Level, &[f64]) -> Result<f64, ModelError> + Send + Sync + 'static> {
    FnModel::new(levels, move |level: Level, x: &[f64]| {
        let coarseness = levels.saturating_sub(1).saturating_sub(level.index());
        let shift = 0.1 * coarseness as f64;
        Ok(-0.5 * x.iter().map(|v| (v - shift).powi(2)).sum::<f64>())
    })
}

/// Sleeps a state-dependent pseudo-random time before delegating
///
/// The delay is a pure function of state and level, so completion order is
/// scrambled but reproducible.
pub struct DelayedModel<M> {
    inner: M,
    max_delay: Duration,
}

impl<M: ModelEvaluator> DelayedModel<M> {
    pub fn new(inner: M, max_delay: Duration) -> Self {
        Self { inner, max_delay }
    }

    fn delay_for(&self, level: Level, state: &State) -> Duration {
        let mut h = 0xcbf2_9ce4_8422_2325_u64 ^ u64::from(level.0);
        for v in state.iter() {
            h = (h ^ v.to_bits()).wrapping_mul(0x0100_0000_01b3);
        }
        let micros = self.max_delay.as_micros().max(1) as u64;
        Duration::from_micros(h % micros)
    }
}

#[async_trait]
impl<M: ModelEvaluator> ModelEvaluator for DelayedModel<M> {
    fn num_levels(&self) -> usize {
        self.inner.num_levels()
    }

    async fn evaluate(&self, level: Level, state: &State) -> Result<f64, ModelError> {
        tokio::time::sleep(self.delay_for(level, state)).await;
        self.inner.evaluate(level, state).await
    }
}

/// Counts evaluations per level
pub struct CountingModel<M> {
    inner: M,
    counts: Arc<Mutex<BTreeMap<Level, usize>>>,
}

impl<M: ModelEvaluator> CountingModel<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            counts: Arc::default(),
        }
    }

    /// Shared view of the counters, usable after the model moved into a runner
    pub fn counter(&self) -> EvaluationCounter {
        EvaluationCounter(Arc::clone(&self.counts))
    }
}

#[async_trait]
impl<M: ModelEvaluator> ModelEvaluator for CountingModel<M> {
    fn num_levels(&self) -> usize {
        self.inner.num_levels()
    }

    async fn evaluate(&self, level: Level, state: &State) -> Result<f64, ModelError> {
        *self.counts.lock().entry(level).or_insert(0) += 1;
        self.inner.evaluate(level, state).await
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationCounter(Arc<Mutex<BTreeMap<Level, usize>>>);

impl EvaluationCounter {
    pub fn at(&self, level: Level) -> usize {
        self.0.lock().get(&level).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.lock().values().sum()
    }
}

/// When a [`FailingModel`] fails
#[derive(Debug, Clone)]
pub enum FailureRule {
    /// Every evaluation at this level
    Level(Level),
    /// The first evaluation of any state other than this one
    FirstStateOtherThan(State),
    /// The first `n` evaluations of this state, at any level
    StateTimes(State, u32),
    /// Every evaluation at this level of any state other than this one
    LevelOtherThan(Level, State),
    /// The first `n` attempts of every (state, level) pair
    Flaky(u32),
}

/// Injects model errors according to a [`FailureRule`]
pub struct FailingModel<M> {
    inner: M,
    rule: FailureRule,
    seen: Mutex<HashMap<(Vec<u64>, Level), u32>>,
    fired: Mutex<bool>,
}

impl<M: ModelEvaluator> FailingModel<M> {
    pub fn new(inner: M, rule: FailureRule) -> Self {
        Self {
            inner,
            rule,
            seen: Mutex::new(HashMap::new()),
            fired: Mutex::new(false),
        }
    }

    fn should_fail(&self, level: Level, state: &State) -> bool {
        match &self.rule {
            FailureRule::Level(failing) => *failing == level,
            FailureRule::FirstStateOtherThan(initial) => {
                let mut fired = self.fired.lock();
                if *fired || state == initial {
                    false
                } else {
                    *fired = true;
                    true
                }
            }
            FailureRule::StateTimes(target, times) => {
                if state != target {
                    return false;
                }
                let key = (Vec::new(), Level::COARSEST);
                let mut seen = self.seen.lock();
                let attempts = seen.entry(key).or_insert(0);
                *attempts += 1;
                *attempts <= *times
            }
            FailureRule::LevelOtherThan(failing, spared) => *failing == level && state != spared,
            FailureRule::Flaky(times) => {
                let key = (state.iter().map(|v| v.to_bits()).collect(), level);
                let mut seen = self.seen.lock();
                let attempts = seen.entry(key).or_insert(0);
                *attempts += 1;
                *attempts <= *times
            }
        }
    }
}

#[async_trait]
impl<M: ModelEvaluator> ModelEvaluator for FailingModel<M> {
    fn num_levels(&self) -> usize {
        self.inner.num_levels()
    }

    async fn evaluate(&self, level: Level, state: &State) -> Result<f64, ModelError> {
        if self.should_fail(level, state) {
            return Err(ModelError::Failed(format!("injected failure at {level}")));
        }
        self.inner.evaluate(level, state).await
    }
}

/// Keeps every chain step; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    links: Arc<Mutex<Vec<ChainLink>>>,
    finished: Arc<Mutex<bool>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn links(&self) -> Vec<ChainLink> {
        self.links.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.lock().is_empty()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock()
    }
}

impl ChainSink for RecordingSink {
    fn record(&mut self, link: &ChainLink) -> io::Result<()> {
        self.links.lock().push(link.clone());
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        *self.finished.lock() = true;
        Ok(())
    }
}

/// Accepts `capacity` steps, then fails every write
#[derive(Debug, Clone)]
pub struct FailingSink {
    capacity: usize,
    written: usize,
}

impl FailingSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            written: 0,
        }
    }
}

impl ChainSink for FailingSink {
    fn record(&mut self, _link: &ChainLink) -> io::Result<()> {
        if self.written >= self.capacity {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.written += 1;
        Ok(())
    }
}

/// Small, fast configuration for tests
pub fn small_config(levels: usize, target_samples: usize) -> SamplerConfig {
    SamplerConfig::new()
        .with_levels(
            (0..levels)
                .map(|i| LevelSpec::new(format!("test-{i}"), (i + 1) as f64))
                .collect(),
        )
        .with_workers(2)
        .with_backlog_limit(32)
        .with_max_in_flight(4)
        .with_target_samples(target_samples)
        .with_seed(42)
}

/// Initial state of the given dimension at the origin
pub fn origin(dim: usize) -> State {
    State::from(vec![0.0; dim])
}
