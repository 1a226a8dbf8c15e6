//! Run statistics

use crate::engine::{Decision, DecisionCause};
use pmlda_dispatch::DispatcherStats;
use pmlda_tree::{Level, Outcome};
use serde::{Deserialize, Serialize};

/// Counters collected over one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Proposal decisions made, including ones later discarded with their branch
    pub decisions: u64,
    /// Chain steps that accepted the proposal
    pub accepted: u64,
    /// Chain steps that rejected the proposal
    pub rejected: u64,
    /// Rejections by the level at which they happened (all decisions)
    pub rejections_per_level: Vec<u64>,
    /// Rejections forced by a failed evaluation
    pub forced_rejections: u64,
    /// Evaluation failures reported by the dispatcher
    pub evaluation_failures: u64,
    /// Failed evaluations resubmitted
    pub retries: u64,
    /// Evaluation jobs submitted
    pub submitted: u64,
    /// Evaluation jobs submitted per level
    pub submitted_per_level: Vec<u64>,
    /// Jobs cancelled because their branch was pruned
    pub cancelled: u64,
    /// Results dropped because their job was cancelled
    pub discarded_late: u64,
    /// Results that arrived for evaluations no longer needed
    pub stale_results: u64,
    /// Submissions refused by backpressure
    pub backpressure: u64,
    /// Deepest tree observed
    pub max_tree_depth: usize,
}

impl RunStatistics {
    /// Zeroed counters for `num_levels` levels
    #[must_use]
    pub fn new(num_levels: usize) -> Self {
        Self {
            rejections_per_level: vec![0; num_levels],
            submitted_per_level: vec![0; num_levels],
            ..Self::default()
        }
    }

    /// Count one decision
    pub fn record_decision(&mut self, decision: &Decision) {
        self.decisions += 1;
        if decision.outcome == Outcome::Reject {
            if let Some(slot) = self.rejections_per_level.get_mut(decision.level.index()) {
                *slot += 1;
            }
            if decision.cause == DecisionCause::EvaluationFailed {
                self.forced_rejections += 1;
            }
        }
    }

    /// Count one chain step
    pub fn record_step(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Accept => self.accepted += 1,
            Outcome::Reject => self.rejected += 1,
        }
    }

    /// Copy the dispatcher's counters in
    pub fn absorb(&mut self, dispatcher: &DispatcherStats) {
        self.submitted = dispatcher.submitted;
        self.cancelled = dispatcher.cancelled;
        self.discarded_late = dispatcher.discarded_late;
        self.backpressure = dispatcher.rejected_full;
        for (index, slot) in self.submitted_per_level.iter_mut().enumerate() {
            *slot = dispatcher.submitted_at(Level::from_index(index));
        }
    }

    /// Submissions at one level
    #[inline]
    #[must_use]
    pub fn submitted_at(&self, level: Level) -> u64 {
        self.submitted_per_level
            .get(level.index())
            .copied()
            .unwrap_or(0)
    }

    /// Fraction of chain steps that accepted, 0 before the first step
    #[must_use]
    pub fn acceptance_rate(&self) -> f64 {
        let steps = self.accepted + self.rejected;
        if steps == 0 {
            return 0.0;
        }
        self.accepted as f64 / steps as f64
    }
}
