//! Node-level types for the speculative tree
//!
//! Defines the identifiers and value types shared across the workspace:
//! - Node and fidelity-level identifiers
//! - The immutable chain state
//! - Per-level evaluation results
//! - Node status and assumed outcomes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Unique node identifier, assigned monotonically by the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Fidelity level, 0 is the cheapest/coarsest model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Level(pub u8);

impl Level {
    /// Coarsest level
    pub const COARSEST: Level = Level(0);

    /// Level as a slice index
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Level from a slice index, saturating at `u8::MAX`
    #[inline]
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(u8::try_from(index).unwrap_or(u8::MAX))
    }

    /// Next finer level
    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Chain state (parameter vector)
///
/// Immutable and cheap to clone, so snapshots can be handed to workers
/// without copying the coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(Arc<[f64]>);

impl State {
    /// Create a state from its coordinates
    #[inline]
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self(values.into())
    }

    /// Coordinates of the state
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Dimension of the parameter space
    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the coordinates
    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.0.iter()
    }
}

impl From<Vec<f64>> for State {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

impl From<&[f64]> for State {
    fn from(values: &[f64]) -> Self {
        Self(values.into())
    }
}

impl AsRef<[f64]> for State {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

/// Outcome of an accept/reject decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Proposal accepted
    Accept,
    /// Proposal rejected
    Reject,
}

impl Outcome {
    /// The opposite outcome
    #[inline]
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Outcome::Accept => Outcome::Reject,
            Outcome::Reject => Outcome::Accept,
        }
    }

    /// Check for [`Outcome::Accept`]
    #[inline]
    #[must_use]
    pub fn is_accept(self) -> bool {
        matches!(self, Outcome::Accept)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Accept => f.write_str("accept"),
            Outcome::Reject => f.write_str("reject"),
        }
    }
}

/// Evaluation result stored for one level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LevelResult {
    /// Log-density returned by the model
    LogDensity(f64),
    /// Evaluation failed permanently; treated as an unconditional reject
    Failed,
}

impl LevelResult {
    /// Log-density, if the evaluation succeeded
    #[inline]
    #[must_use]
    pub fn log_density(self) -> Option<f64> {
        match self {
            LevelResult::LogDensity(value) => Some(value),
            LevelResult::Failed => None,
        }
    }
}

/// Lifecycle status of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Awaiting results or an ancestor's decision
    Pending,
    /// Decision made
    Resolved,
    /// Invalidated by a decision, no longer reachable
    Pruned,
}

/// One candidate chain state
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// Node identifier
    pub id: NodeId,
    /// Chain state this node represents
    pub state: State,
    /// Non-owning back-reference, `None` for the root
    pub parent: Option<NodeId>,
    /// Children in exploration order: accept child first, then reject child
    pub children: Vec<NodeId>,
    /// Outcome of the parent's transition this node assumes
    pub assumes: Option<Outcome>,
    /// Node whose evaluations describe this node's state
    pub source: NodeId,
    /// Chain step this node would occupy
    pub step: u64,
    /// Lifecycle status
    pub status: NodeStatus,
    /// Decision for the transition into this node (proposal nodes only)
    pub decision: Option<Outcome>,
}

impl TreeNode {
    /// Check whether this node carries a proposal that needs evaluation
    #[inline]
    #[must_use]
    pub fn is_proposal(&self) -> bool {
        self.parent.is_some() && self.assumes == Some(Outcome::Accept)
    }

    /// Check whether this node is still reachable
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status != NodeStatus::Pruned
    }

    /// Check for leaf position
    #[inline]
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}
