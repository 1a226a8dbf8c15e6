//! Reproducible random streams
//!
//! All randomness in a chain is drawn from generators derived from one seed.
//! Streams are keyed by purpose and chain step rather than by node id: node
//! ids depend on when speculative branches were created, chain steps do not.
//! Speculative alternatives for the same step are mutually exclusive, so they
//! may share a stream, and a rerun with the same seed reproduces the chain
//! exactly regardless of worker count or completion order.

use rand::distributions::Open01;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const PROPOSAL_STREAM: u64 = 0x5052_4f50; // "PROP"
const ACCEPTANCE_STREAM: u64 = 0x4143_4350; // "ACCP"
const CHAIN_STREAM: u64 = 0x4348_4149; // "CHAI"

/// Random-stream handle passed into tree construction and the acceptance engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomStreams {
    seed: u64,
}

impl RandomStreams {
    /// Create streams rooted at `seed`
    #[inline]
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Root seed
    #[inline]
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generator for the proposal leading into chain step `step`
    #[must_use]
    pub fn proposal_rng(&self, step: u64) -> StdRng {
        StdRng::seed_from_u64(self.derive(PROPOSAL_STREAM, step))
    }

    /// Uniform draw in the open interval (0, 1) for the decision at `step`
    #[must_use]
    pub fn acceptance_draw(&self, step: u64) -> f64 {
        let mut rng = StdRng::seed_from_u64(self.derive(ACCEPTANCE_STREAM, step));
        rng.sample(Open01)
    }

    /// Independent streams for chain `chain` of a multi-chain run
    #[inline]
    #[must_use]
    pub fn for_chain(&self, chain: usize) -> Self {
        Self::new(distribute_seed(self.seed, chain))
    }

    fn derive(&self, purpose: u64, step: u64) -> u64 {
        splitmix64(self.seed ^ splitmix64(purpose.rotate_left(32) ^ step))
    }
}

/// Derive the seed of chain `chain` from a shared base seed
#[must_use]
pub fn distribute_seed(seed: u64, chain: usize) -> u64 {
    splitmix64(seed ^ splitmix64(CHAIN_STREAM.rotate_left(32) ^ chain as u64))
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
