//! PMLDA Tree - speculative proposal tree
//!
//! Holds every chain continuation that is still statistically possible while
//! evaluations are outstanding:
//! - Arena-backed nodes addressed by [`NodeId`]
//! - Accept/reject child pairs created ahead of the decisions they depend on
//! - Level results stored per evaluation source
//! - Pruning and root advance as decisions arrive
//!
//! # Example
//!
//! ```rust
//! use pmlda_tree::{GaussianRandomWalk, RandomStreams, SpeculativeTree, State};
//!
//! let mut tree = SpeculativeTree::new(State::from(vec![0.0, 0.0]), 2, 4);
//! let policy = GaussianRandomWalk::new(0.5);
//! let streams = RandomStreams::new(7);
//!
//! let created = tree.expand(&policy, &streams);
//! assert_eq!(created.len(), 4);
//! assert!(tree.max_depth() <= 4);
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod node;
pub mod policy;
pub mod rng;
pub mod tree;

pub use error::TreeError;
pub use node::{Level, LevelResult, NodeId, NodeStatus, Outcome, State, TreeNode};
pub use policy::{GaussianRandomWalk, ProposalPolicy};
pub use rng::{distribute_seed, RandomStreams};
pub use tree::{Candidate, Pruned, RootAdvance, SpeculativeTree};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
