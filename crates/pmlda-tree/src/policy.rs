//! Proposal policies
//!
//! The tree asks a [`ProposalPolicy`] for one candidate state per expanded
//! leaf. Policies must be pure functions of their inputs and the supplied
//! generator, and must be symmetric: the acceptance ratio carries no
//! proposal-density correction.

use crate::node::{Outcome, State};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

/// Supplies candidate states for tree expansion
pub trait ProposalPolicy: Send + Sync {
    /// Propose a successor of `parent`, which was reached under `assumed`
    fn propose(&self, parent: &State, assumed: Outcome, rng: &mut dyn RngCore) -> State;
}

/// Gaussian random walk with isotropic or per-coordinate step widths
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianRandomWalk {
    step_widths: Vec<f64>,
}

impl GaussianRandomWalk {
    /// Isotropic random walk
    #[inline]
    #[must_use]
    pub fn new(step_width: f64) -> Self {
        Self {
            step_widths: vec![step_width],
        }
    }

    /// Per-coordinate step widths; the last width is reused for any extra
    /// coordinates
    #[must_use]
    pub fn with_step_widths(step_widths: Vec<f64>) -> Self {
        if step_widths.is_empty() {
            return Self::new(1.0);
        }
        Self { step_widths }
    }

    /// Step width used for coordinate `i`
    #[inline]
    #[must_use]
    pub fn step_width(&self, i: usize) -> f64 {
        self.step_widths
            .get(i)
            .or_else(|| self.step_widths.last())
            .copied()
            .unwrap_or(1.0)
    }
}

impl ProposalPolicy for GaussianRandomWalk {
    fn propose(&self, parent: &State, _assumed: Outcome, rng: &mut dyn RngCore) -> State {
        let values = parent
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let z: f64 = StandardNormal.sample(&mut *rng);
                x + self.step_width(i) * z
            })
            .collect::<Vec<_>>();
        State::new(values)
    }
}

impl<P: ProposalPolicy + ?Sized> ProposalPolicy for std::sync::Arc<P> {
    fn propose(&self, parent: &State, assumed: Outcome, rng: &mut dyn RngCore) -> State {
        (**self).propose(parent, assumed, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn random_walk_keeps_dimension() {
        let policy = GaussianRandomWalk::new(0.1);
        let mut rng = StdRng::seed_from_u64(1);
        let parent = State::from(vec![0.0, 1.0, 2.0]);
        let child = policy.propose(&parent, Outcome::Accept, &mut rng);
        assert_eq!(child.dim(), 3);
        assert_ne!(child, parent);
    }

    #[test]
    fn zero_width_coordinates_stay_fixed() {
        let policy = GaussianRandomWalk::with_step_widths(vec![0.0, 1.0]);
        let mut rng = StdRng::seed_from_u64(2);
        let parent = State::from(vec![5.0, 5.0, 5.0]);
        let child = policy.propose(&parent, Outcome::Reject, &mut rng);
        assert_eq!(child.as_slice()[0], 5.0);
        assert_eq!(policy.step_width(2), 1.0);
    }

    #[test]
    fn same_generator_same_proposal() {
        let policy = GaussianRandomWalk::new(0.5);
        let parent = State::from(vec![0.0; 4]);
        let a = policy.propose(&parent, Outcome::Accept, &mut StdRng::seed_from_u64(9));
        let b = policy.propose(&parent, Outcome::Accept, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }
}
