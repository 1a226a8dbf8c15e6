//! Multilevel delayed acceptance
//!
//! Judges one proposal node from its per-level results, cheapest level
//! first. With `Δ_k = log π_k(y) − log π_k(x)` the level-local log ratio is
//! `ℓ_0 = Δ_0` and `ℓ_k = Δ_k − Δ_{k−1}`. The cumulative log acceptance
//! `A_k = Σ_{j≤k} min(0, ℓ_j)` is compared against one uniform draw `u`
//! cached per node: the proposal is rejected at the first level where
//! `ln u ≥ A_k`. `A_k` never increases, so stopping early is exact and the
//! final acceptance probability is the product `Π_k min(1, exp ℓ_k)`.

use pmlda_tree::{Candidate, Level, LevelResult, NodeId, Outcome, RandomStreams};
use std::collections::HashMap;

/// Why a decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionCause {
    /// Acceptance ratio against the cached draw
    Ratio,
    /// A required evaluation failed; unconditional reject
    EvaluationFailed,
}

/// Final decision for a proposal node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Accept or reject
    pub outcome: Outcome,
    /// Level at which the decision was reached (finest level for accepts)
    pub level: Level,
    /// Reason
    pub cause: DecisionCause,
    /// Cumulative log acceptance at `level`
    pub log_acceptance: f64,
    /// Uniform draw the node was judged against
    pub draw: f64,
}

/// Missing evaluation blocking a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvaluationNeed {
    /// Evaluation source that lacks a result
    pub source: NodeId,
    /// Level of the missing result
    pub level: Level,
}

/// Outcome of [`DelayedAcceptance::try_resolve`]
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Decision reached
    Decided(Decision),
    /// Results missing at the next required level
    Incomplete(Vec<EvaluationNeed>),
}

/// Delayed-acceptance decision procedure
///
/// Stateless apart from the draw cached per node, which is taken once and
/// reused for every level of that node's decision.
#[derive(Debug, Clone)]
pub struct DelayedAcceptance {
    num_levels: usize,
    streams: RandomStreams,
    draws: HashMap<NodeId, f64>,
}

impl DelayedAcceptance {
    /// Create an engine for `num_levels` levels
    #[must_use]
    pub fn new(num_levels: usize, streams: RandomStreams) -> Self {
        Self {
            num_levels,
            streams,
            draws: HashMap::new(),
        }
    }

    /// Number of levels consumed per decision
    #[inline]
    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    /// Cached draws currently held
    #[inline]
    #[must_use]
    pub fn cached_draws(&self) -> usize {
        self.draws.len()
    }

    /// Attempt a decision for `candidate`
    ///
    /// Walks the levels cheapest first. Returns `Incomplete` with the missing
    /// results of the first level that lacks any, so higher levels are never
    /// requested before the lower ones are in.
    pub fn try_resolve(&mut self, candidate: &Candidate<'_>) -> Resolution {
        let draw = self.draw(candidate.node, candidate.step);
        let log_u = draw.ln();
        let mut accumulated = 0.0_f64;
        let mut previous_delta = 0.0_f64;

        for index in 0..self.num_levels {
            let level = Level::from_index(index);
            let current = candidate.current.get(index).copied().flatten();
            let proposal = candidate.proposal.get(index).copied().flatten();

            if current == Some(LevelResult::Failed) || proposal == Some(LevelResult::Failed) {
                return Resolution::Decided(Decision {
                    outcome: Outcome::Reject,
                    level,
                    cause: DecisionCause::EvaluationFailed,
                    log_acceptance: f64::NEG_INFINITY,
                    draw,
                });
            }

            let mut needs = Vec::new();
            if current.is_none() {
                needs.push(EvaluationNeed {
                    source: candidate.current_source,
                    level,
                });
            }
            if proposal.is_none() {
                needs.push(EvaluationNeed {
                    source: candidate.proposal_source,
                    level,
                });
            }
            let (Some(LevelResult::LogDensity(current)), Some(LevelResult::LogDensity(proposal))) =
                (current, proposal)
            else {
                return Resolution::Incomplete(needs);
            };

            let delta = log_ratio(proposal, current);
            let local = if index == 0 {
                delta
            } else {
                log_ratio(delta, previous_delta)
            };
            accumulated += local.min(0.0);
            previous_delta = delta;

            if log_u >= accumulated {
                return Resolution::Decided(Decision {
                    outcome: Outcome::Reject,
                    level,
                    cause: DecisionCause::Ratio,
                    log_acceptance: accumulated,
                    draw,
                });
            }
        }

        Resolution::Decided(Decision {
            outcome: Outcome::Accept,
            level: Level::from_index(self.num_levels.saturating_sub(1)),
            cause: DecisionCause::Ratio,
            log_acceptance: accumulated,
            draw,
        })
    }

    /// Drop cached draws of nodes that left the tree
    pub fn release(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        for node in nodes {
            self.draws.remove(&node);
        }
    }

    fn draw(&mut self, node: NodeId, step: u64) -> f64 {
        let streams = &self.streams;
        *self
            .draws
            .entry(node)
            .or_insert_with(|| streams.acceptance_draw(step))
    }
}

/// `numer − denom` in log space with the non-finite cases pinned
///
/// A NaN or `−∞` numerator always rejects, a `−∞` (or NaN) denominator with
/// a usable numerator always passes, and equal infinities cancel.
#[must_use]
pub fn log_ratio(numer: f64, denom: f64) -> f64 {
    if numer.is_nan() || numer == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if denom.is_nan() || denom == f64::NEG_INFINITY {
        return f64::INFINITY;
    }
    if numer == denom {
        return 0.0;
    }
    numer - denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(values: &[f64]) -> Vec<Option<LevelResult>> {
        values.iter().map(|v| Some(LevelResult::LogDensity(*v))).collect()
    }

    fn candidate<'a>(
        proposal: &'a [Option<LevelResult>],
        current: &'a [Option<LevelResult>],
    ) -> Candidate<'a> {
        Candidate {
            node: NodeId(5),
            step: 3,
            proposal_source: NodeId(5),
            proposal,
            current_source: NodeId(0),
            current,
        }
    }

    #[test]
    fn log_ratio_pins_non_finite_cases() {
        assert_eq!(log_ratio(-1.0, -3.0), 2.0);
        assert_eq!(log_ratio(f64::NEG_INFINITY, -1.0), f64::NEG_INFINITY);
        assert_eq!(log_ratio(f64::NAN, -1.0), f64::NEG_INFINITY);
        assert_eq!(log_ratio(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
        assert_eq!(log_ratio(-1.0, f64::NEG_INFINITY), f64::INFINITY);
        assert_eq!(log_ratio(f64::INFINITY, f64::INFINITY), 0.0);
    }

    #[test]
    fn uphill_move_is_always_accepted() {
        let mut engine = DelayedAcceptance::new(2, RandomStreams::new(1));
        let proposal = results(&[0.0, 0.0]);
        let current = results(&[-5.0, -5.0]);
        let resolution = engine.try_resolve(&candidate(&proposal, &current));
        match resolution {
            Resolution::Decided(d) => {
                assert_eq!(d.outcome, Outcome::Accept);
                assert_eq!(d.level, Level(1));
                assert_eq!(d.log_acceptance, 0.0);
            }
            Resolution::Incomplete(_) => panic!("expected a decision"),
        }
    }

    #[test]
    fn impossible_coarse_level_rejects_without_fine_results() {
        let mut engine = DelayedAcceptance::new(2, RandomStreams::new(1));
        let proposal = vec![Some(LevelResult::LogDensity(f64::NEG_INFINITY)), None];
        let current = vec![Some(LevelResult::LogDensity(-1.0)), None];
        match engine.try_resolve(&candidate(&proposal, &current)) {
            Resolution::Decided(d) => {
                assert_eq!(d.outcome, Outcome::Reject);
                assert_eq!(d.level, Level(0));
            }
            Resolution::Incomplete(_) => panic!("expected early rejection"),
        }
    }

    #[test]
    fn missing_results_are_reported_for_the_lowest_level_only() {
        let mut engine = DelayedAcceptance::new(3, RandomStreams::new(1));
        let proposal = vec![None, None, None];
        let current = vec![Some(LevelResult::LogDensity(0.0)), None, None];
        assert_eq!(
            engine.try_resolve(&candidate(&proposal, &current)),
            Resolution::Incomplete(vec![EvaluationNeed {
                source: NodeId(5),
                level: Level(0),
            }])
        );
    }

    #[test]
    fn failure_on_either_side_rejects() {
        let mut engine = DelayedAcceptance::new(1, RandomStreams::new(1));
        let failed = vec![Some(LevelResult::Failed)];
        let fine = results(&[0.0]);
        for (proposal, current) in [(&failed, &fine), (&fine, &failed)] {
            match engine.try_resolve(&candidate(proposal, current)) {
                Resolution::Decided(d) => {
                    assert_eq!(d.outcome, Outcome::Reject);
                    assert_eq!(d.cause, DecisionCause::EvaluationFailed);
                }
                Resolution::Incomplete(_) => panic!("expected forced reject"),
            }
        }
    }

    #[test]
    fn draw_is_cached_until_released() {
        let mut engine = DelayedAcceptance::new(1, RandomStreams::new(9));
        let proposal = vec![None];
        let current = vec![None];
        engine.try_resolve(&candidate(&proposal, &current));
        assert_eq!(engine.cached_draws(), 1);
        engine.release([NodeId(5)]);
        assert_eq!(engine.cached_draws(), 0);
    }
}
