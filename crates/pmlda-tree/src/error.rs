//! Error types for tree manipulation

use crate::node::NodeId;

/// Errors raised by [`SpeculativeTree`](crate::SpeculativeTree) operations.
///
/// Both variants indicate a broken invariant in the caller; no sample produced
/// after one of them is trustworthy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// Requested transition is not legal for the node's position or status
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Node is not (or no longer) stored in the tree
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
}

impl TreeError {
    /// Shorthand for an [`TreeError::InvalidTransition`] with a formatted reason
    #[inline]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidTransition(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_error_display() {
        let err = TreeError::invalid("n3 is not a child of the root");
        assert_eq!(err.to_string(), "invalid transition: n3 is not a child of the root");

        let err = TreeError::UnknownNode(NodeId(9));
        assert!(err.to_string().contains("n9"));
    }
}
