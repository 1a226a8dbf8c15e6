//! Speculative proposal tree
//!
//! Arena of [`TreeNode`]s addressed by id. Every expansion of a leaf adds an
//! accept child (a fresh proposal that needs evaluation) and a reject child
//! (the leaf's own state carried forward). Level results are kept per
//! evaluation source: a proposal node is its own source, a reject child shares
//! the source of its parent, so evaluations of a state survive any number of
//! rejections without being recomputed.
//!
//! # Invariants
//!
//! - Exactly one root, never pruned, always the definitively accepted state.
//! - Depth from the root never exceeds `max_in_flight`.
//! - Only `Pending` leaves and the root receive children.
//! - A decision on a proposal node prunes the branch it rules out.

use crate::error::TreeError;
use crate::node::{Level, LevelResult, NodeId, NodeStatus, Outcome, State, TreeNode};
use crate::policy::ProposalPolicy;
use crate::rng::RandomStreams;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Nodes invalidated by a decision or an explicit prune
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pruned {
    /// Nodes newly marked `Pruned`
    pub nodes: Vec<NodeId>,
    /// Evaluation sources no live node needs any more; their jobs can be cancelled
    pub sources: Vec<NodeId>,
}

impl Pruned {
    /// Check if nothing was pruned or released
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.sources.is_empty()
    }
}

/// Result of promoting a decided root child
#[derive(Debug, Clone, PartialEq)]
pub struct RootAdvance {
    /// Root before the advance
    pub previous_root: NodeId,
    /// Root after the advance
    pub new_root: NodeId,
    /// Decision that drove the advance
    pub outcome: Outcome,
    /// State of the new root, i.e. the next chain entry
    pub state: State,
    /// Chain step of the new root
    pub step: u64,
    /// Nodes removed from the arena
    pub discarded: Vec<NodeId>,
    /// Evaluation sources released by the advance
    pub released_sources: Vec<NodeId>,
}

/// Everything the acceptance engine needs to judge one proposal node
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Proposal node being judged
    pub node: NodeId,
    /// Chain step the proposal would occupy
    pub step: u64,
    /// Source holding the proposal's evaluations (the node itself)
    pub proposal_source: NodeId,
    /// Proposal results, indexed by level
    pub proposal: &'a [Option<LevelResult>],
    /// Source holding the current state's evaluations
    pub current_source: NodeId,
    /// Current-state results, indexed by level
    pub current: &'a [Option<LevelResult>],
}

/// Rooted tree of speculative chain continuations
#[derive(Debug, Clone, PartialEq)]
pub struct SpeculativeTree {
    nodes: BTreeMap<NodeId, TreeNode>,
    results: BTreeMap<NodeId, Vec<Option<LevelResult>>>,
    root: NodeId,
    next_id: u64,
    num_levels: usize,
    max_in_flight: usize,
}

impl SpeculativeTree {
    /// Create a tree rooted at the chain's initial state
    ///
    /// # Arguments
    /// * `initial` - Initial chain state (becomes the root)
    /// * `num_levels` - Number of fidelity levels
    /// * `max_in_flight` - Bound on unresolved proposals and on depth
    #[must_use]
    pub fn new(initial: State, num_levels: usize, max_in_flight: usize) -> Self {
        let root = NodeId(0);
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root,
            TreeNode {
                id: root,
                state: initial,
                parent: None,
                children: Vec::new(),
                assumes: None,
                source: root,
                step: 0,
                status: NodeStatus::Resolved,
                decision: None,
            },
        );
        let mut results = BTreeMap::new();
        results.insert(root, vec![None; num_levels]);

        Self {
            nodes,
            results,
            root,
            next_id: 1,
            num_levels,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Place the root at chain step `step` instead of 0
    ///
    /// Proposal and acceptance streams are keyed by step, so a chain resumed
    /// with the same seed continues with fresh random numbers.
    #[must_use]
    pub fn with_start_step(mut self, step: u64) -> Self {
        if let Some(root) = self.nodes.get_mut(&self.root) {
            root.step = step;
        }
        self
    }

    /// Current root
    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Current root node
    #[must_use]
    pub fn root_node(&self) -> &TreeNode {
        // The root is inserted at construction and never removed.
        &self.nodes[&self.root]
    }

    /// Look up a node
    #[inline]
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    /// Look up a node, failing with [`TreeError::UnknownNode`]
    pub fn get(&self, id: NodeId) -> Result<&TreeNode, TreeError> {
        self.nodes.get(&id).ok_or(TreeError::UnknownNode(id))
    }

    /// All stored nodes, including pruned ones awaiting collection
    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    /// Number of stored nodes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check for a tree holding only its root
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Number of fidelity levels
    #[inline]
    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    /// Bound on unresolved proposals and depth
    #[inline]
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Depth of a node below the current root
    #[must_use]
    pub fn depth(&self, id: NodeId) -> Option<usize> {
        let root_step = self.root_node().step;
        self.nodes
            .get(&id)
            .map(|n| usize::try_from(n.step.saturating_sub(root_step)).unwrap_or(usize::MAX))
    }

    /// Largest depth among live nodes
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.live_order()
            .into_iter()
            .filter_map(|id| self.depth(id))
            .max()
            .unwrap_or(0)
    }

    /// Check if `id` is a direct child of the root
    #[must_use]
    pub fn is_root_child(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|n| n.parent == Some(self.root))
    }

    /// Level results recorded for an evaluation source
    #[must_use]
    pub fn results(&self, source: NodeId) -> Option<&[Option<LevelResult>]> {
        self.results.get(&source).map(Vec::as_slice)
    }

    /// Result recorded for `source` at `level`
    #[must_use]
    pub fn result(&self, source: NodeId, level: Level) -> Option<LevelResult> {
        self.results
            .get(&source)
            .and_then(|r| r.get(level.index()).copied().flatten())
    }

    /// Finest-level log-density known for a node's state
    #[must_use]
    pub fn top_log_density(&self, id: NodeId) -> Option<f64> {
        let source = self.nodes.get(&id)?.source;
        let top = Level::from_index(self.num_levels.checked_sub(1)?);
        self.result(source, top).and_then(LevelResult::log_density)
    }

    /// Check whether any live node still needs evaluations of `source`
    ///
    /// A proposal that was rejected no longer needs its own evaluations.
    #[must_use]
    pub fn source_in_use(&self, source: NodeId) -> bool {
        self.nodes.values().any(|n| {
            n.source == source && n.is_live() && n.decision != Some(Outcome::Reject)
        })
    }

    /// Store an evaluation result for `source` at `level`
    ///
    /// Returns `false`, leaving the tree untouched, if the source is no longer
    /// in use, the level is out of range, or a result is already present.
    pub fn record(&mut self, source: NodeId, level: Level, result: LevelResult) -> bool {
        if !self.source_in_use(source) {
            return false;
        }
        let Some(slot) = self
            .results
            .get_mut(&source)
            .and_then(|r| r.get_mut(level.index()))
        else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(result);
        true
    }

    /// Live node ids in breadth-first order from the root
    #[must_use]
    pub fn live_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if !node.is_live() {
                continue;
            }
            order.push(id);
            queue.extend(node.children.iter().copied());
        }
        order
    }

    /// Unresolved proposal nodes, shallowest first
    #[must_use]
    pub fn pending_proposals(&self) -> Vec<NodeId> {
        self.live_order()
            .into_iter()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .is_some_and(|n| n.is_proposal() && n.status == NodeStatus::Pending)
            })
            .collect()
    }

    /// Grow the frontier up to the in-flight bound
    ///
    /// Expands eligible leaves shallowest-first until the number of unresolved
    /// proposals reaches `max_in_flight` or no leaf is eligible. Returns the
    /// newly created proposal nodes, which are the ones needing evaluation.
    pub fn expand(&mut self, policy: &dyn ProposalPolicy, streams: &RandomStreams) -> Vec<NodeId> {
        let mut created = Vec::new();
        let mut pending = self.pending_proposals().len();

        while pending < self.max_in_flight {
            let Some(leaf) = self.next_expandable_leaf() else {
                break;
            };
            let Some(child) = self.spawn_children(leaf, policy, streams) else {
                break;
            };
            created.push(child);
            pending += 1;
        }

        if !created.is_empty() {
            tracing::trace!(created = created.len(), pending, "expanded speculative tree");
        }
        created
    }

    /// Judging context for a pending proposal node
    #[must_use]
    pub fn candidate(&self, id: NodeId) -> Option<Candidate<'_>> {
        let node = self.nodes.get(&id)?;
        if !node.is_proposal() || node.status != NodeStatus::Pending {
            return None;
        }
        let parent = self.nodes.get(&node.parent?)?;
        Some(Candidate {
            node: id,
            step: node.step,
            proposal_source: node.source,
            proposal: self.results.get(&node.source)?,
            current_source: parent.source,
            current: self.results.get(&parent.source)?,
        })
    }

    /// Record the decision for a proposal node
    ///
    /// A rejection prunes everything that assumed the proposal was accepted
    /// (the node's children); an acceptance prunes the reject sibling.
    ///
    /// # Errors
    /// `InvalidTransition` if the node carries no proposal or is not `Pending`.
    pub fn resolve(&mut self, id: NodeId, outcome: Outcome) -> Result<Pruned, TreeError> {
        let node = self.get(id)?;
        if !node.is_proposal() {
            return Err(TreeError::invalid(format!("{id} does not carry a proposal")));
        }
        if node.status != NodeStatus::Pending {
            return Err(TreeError::invalid(format!(
                "{id} is {:?}, only pending proposals can be resolved",
                node.status
            )));
        }
        let parent = node.parent;
        let children = node.children.clone();

        if let Some(node) = self.nodes.get_mut(&id) {
            node.status = NodeStatus::Resolved;
            node.decision = Some(outcome);
        }

        let mut pruned = Vec::new();
        match outcome {
            Outcome::Reject => {
                for child in children {
                    self.mark_pruned(child, &mut pruned);
                }
            }
            Outcome::Accept => {
                if let Some(sibling) = parent.and_then(|p| self.child_assuming(p, Outcome::Reject)) {
                    self.mark_pruned(sibling, &mut pruned);
                }
            }
        }

        let mut released: Vec<NodeId> = pruned.clone();
        released.push(id);
        Ok(Pruned {
            sources: self.released_sources(&released),
            nodes: pruned,
        })
    }

    /// Decided proposal directly below the root, if any
    #[must_use]
    pub fn decided_root_child(&self) -> Option<NodeId> {
        self.root_node().children.iter().copied().find(|c| {
            self.nodes
                .get(c)
                .is_some_and(|n| n.is_proposal() && n.status == NodeStatus::Resolved)
        })
    }

    /// Promote the decided root child
    ///
    /// On acceptance the proposal becomes the new root. On rejection the
    /// reject sibling (created if missing) becomes the new root. Everything
    /// not reachable from the new root is removed from the arena.
    ///
    /// # Errors
    /// `InvalidTransition` if `decided` is not a resolved proposal directly
    /// below the root.
    pub fn advance_root(&mut self, decided: NodeId) -> Result<RootAdvance, TreeError> {
        let node = self.get(decided)?;
        if node.parent != Some(self.root) {
            return Err(TreeError::invalid(format!(
                "{decided} is not a direct child of root {}",
                self.root
            )));
        }
        if !node.is_proposal() || node.status != NodeStatus::Resolved {
            return Err(TreeError::invalid(format!(
                "{decided} is {:?}, root can only advance past a resolved proposal",
                node.status
            )));
        }
        let outcome = node
            .decision
            .ok_or_else(|| TreeError::invalid(format!("{decided} is resolved without a decision")))?;

        let previous_root = self.root;
        let new_root = match outcome {
            Outcome::Accept => decided,
            Outcome::Reject => self.ensure_reject_child(previous_root)?,
        };

        let keep = self.live_subtree(new_root);
        let discarded: Vec<NodeId> = self
            .nodes
            .keys()
            .copied()
            .filter(|id| !keep.contains(id))
            .collect();
        self.nodes.retain(|id, _| keep.contains(id));
        for node in self.nodes.values_mut() {
            node.children.retain(|c| keep.contains(c));
        }

        self.root = new_root;
        let (state, step) = match self.nodes.get_mut(&new_root) {
            Some(root) => {
                root.parent = None;
                root.status = NodeStatus::Resolved;
                (root.state.clone(), root.step)
            }
            None => return Err(TreeError::UnknownNode(new_root)),
        };

        let in_use: BTreeSet<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.decision != Some(Outcome::Reject))
            .map(|n| n.source)
            .collect();
        let released_sources: Vec<NodeId> = self
            .results
            .keys()
            .copied()
            .filter(|s| !in_use.contains(s))
            .collect();
        self.results.retain(|s, _| in_use.contains(s));

        tracing::trace!(
            %previous_root,
            %new_root,
            %outcome,
            discarded = discarded.len(),
            "advanced root"
        );

        Ok(RootAdvance {
            previous_root,
            new_root,
            outcome,
            state,
            step,
            discarded,
            released_sources,
        })
    }

    /// Mark a node and its subtree `Pruned`
    ///
    /// Idempotent: already pruned nodes are not reported again.
    ///
    /// # Errors
    /// `InvalidTransition` for the root, `UnknownNode` for unknown ids.
    pub fn prune(&mut self, id: NodeId) -> Result<Pruned, TreeError> {
        if id == self.root {
            return Err(TreeError::invalid("the root cannot be pruned"));
        }
        self.get(id)?;
        let mut nodes = Vec::new();
        self.mark_pruned(id, &mut nodes);
        Ok(Pruned {
            sources: self.released_sources(&nodes),
            nodes,
        })
    }

    fn mark_pruned(&mut self, id: NodeId, out: &mut Vec<NodeId>) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&current) else {
                continue;
            };
            if node.status == NodeStatus::Pruned {
                continue;
            }
            node.status = NodeStatus::Pruned;
            out.push(current);
            stack.extend(node.children.iter().copied());
        }
    }

    fn released_sources(&self, candidates: &[NodeId]) -> Vec<NodeId> {
        candidates
            .iter()
            .copied()
            .filter(|id| self.results.contains_key(id) && !self.source_in_use(*id))
            .collect()
    }

    fn live_subtree(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut keep = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            if !node.is_live() {
                continue;
            }
            keep.insert(current);
            stack.extend(node.children.iter().copied());
        }
        keep
    }

    fn child_assuming(&self, parent: NodeId, outcome: Outcome) -> Option<NodeId> {
        self.nodes.get(&parent)?.children.iter().copied().find(|c| {
            self.nodes
                .get(c)
                .is_some_and(|n| n.is_live() && n.assumes == Some(outcome))
        })
    }

    fn is_expandable(&self, node: &TreeNode) -> bool {
        let open = node.id == self.root || node.status == NodeStatus::Pending;
        open && node.is_live()
            && node.is_leaf()
            && self.depth(node.id).is_some_and(|d| d < self.max_in_flight)
    }

    fn next_expandable_leaf(&self) -> Option<NodeId> {
        self.live_order()
            .into_iter()
            .find(|id| self.nodes.get(id).is_some_and(|n| self.is_expandable(n)))
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn spawn_children(
        &mut self,
        leaf: NodeId,
        policy: &dyn ProposalPolicy,
        streams: &RandomStreams,
    ) -> Option<NodeId> {
        let (state, assumed, source, step) = {
            let node = self.nodes.get(&leaf)?;
            (
                node.state.clone(),
                node.assumes.unwrap_or(Outcome::Accept),
                node.source,
                node.step + 1,
            )
        };

        let mut rng = streams.proposal_rng(step);
        let proposal = policy.propose(&state, assumed, &mut rng);

        let accept = self.allocate_id();
        let reject = self.allocate_id();
        self.nodes.insert(
            accept,
            TreeNode {
                id: accept,
                state: proposal,
                parent: Some(leaf),
                children: Vec::new(),
                assumes: Some(Outcome::Accept),
                source: accept,
                step,
                status: NodeStatus::Pending,
                decision: None,
            },
        );
        self.results.insert(accept, vec![None; self.num_levels]);
        self.nodes.insert(
            reject,
            TreeNode {
                id: reject,
                state,
                parent: Some(leaf),
                children: Vec::new(),
                assumes: Some(Outcome::Reject),
                source,
                step,
                status: NodeStatus::Pending,
                decision: None,
            },
        );
        if let Some(node) = self.nodes.get_mut(&leaf) {
            node.children.push(accept);
            node.children.push(reject);
        }
        Some(accept)
    }

    fn ensure_reject_child(&mut self, parent: NodeId) -> Result<NodeId, TreeError> {
        if let Some(existing) = self.child_assuming(parent, Outcome::Reject) {
            return Ok(existing);
        }
        let (state, source, step) = {
            let node = self.get(parent)?;
            (node.state.clone(), node.source, node.step + 1)
        };
        let id = self.allocate_id();
        self.nodes.insert(
            id,
            TreeNode {
                id,
                state,
                parent: Some(parent),
                children: Vec::new(),
                assumes: Some(Outcome::Reject),
                source,
                step,
                status: NodeStatus::Pending,
                decision: None,
            },
        );
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(id);
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::GaussianRandomWalk;

    fn tree(max_in_flight: usize) -> SpeculativeTree {
        SpeculativeTree::new(State::from(vec![0.0]), 2, max_in_flight)
    }

    fn grow(tree: &mut SpeculativeTree) -> Vec<NodeId> {
        tree.expand(&GaussianRandomWalk::new(1.0), &RandomStreams::new(3))
    }

    #[test]
    fn root_is_resolved_and_has_no_parent() {
        let tree = tree(4);
        let root = tree.root_node();
        assert_eq!(root.status, NodeStatus::Resolved);
        assert!(root.parent.is_none());
        assert!(tree.is_empty());
    }

    #[test]
    fn expand_creates_accept_and_reject_pairs() {
        let mut tree = tree(1);
        let created = grow(&mut tree);
        assert_eq!(created.len(), 1);

        let root = tree.root_node();
        assert_eq!(root.children.len(), 2);
        let accept = tree.node(root.children[0]).unwrap();
        let reject = tree.node(root.children[1]).unwrap();
        assert_eq!(accept.assumes, Some(Outcome::Accept));
        assert_eq!(accept.source, accept.id);
        assert_eq!(reject.assumes, Some(Outcome::Reject));
        assert_eq!(reject.source, tree.root());
        assert_eq!(reject.state, root.state);
    }

    #[test]
    fn expand_is_breadth_first() {
        let mut tree = tree(3);
        let created = grow(&mut tree);
        assert_eq!(created.len(), 3);
        // Root first, then both depth-1 leaves before anything deeper.
        assert_eq!(tree.depth(created[0]), Some(1));
        assert_eq!(tree.depth(created[1]), Some(2));
        assert_eq!(tree.depth(created[2]), Some(2));
    }

    #[test]
    fn expand_respects_in_flight_bound() {
        let mut tree = tree(5);
        grow(&mut tree);
        assert_eq!(tree.pending_proposals().len(), 5);
        assert!(grow(&mut tree).is_empty());
    }

    #[test]
    fn record_rejects_duplicates_and_unknown_sources() {
        let mut tree = tree(1);
        let root = tree.root();
        assert!(tree.record(root, Level(0), LevelResult::LogDensity(-1.0)));
        assert!(!tree.record(root, Level(0), LevelResult::LogDensity(-2.0)));
        assert!(!tree.record(root, Level(5), LevelResult::LogDensity(-2.0)));
        assert!(!tree.record(NodeId(99), Level(0), LevelResult::LogDensity(0.0)));
        assert_eq!(tree.result(root, Level(0)), Some(LevelResult::LogDensity(-1.0)));
    }

    #[test]
    fn resolve_requires_pending_proposal() {
        let mut tree = tree(1);
        let created = grow(&mut tree);
        let reject_child = tree.root_node().children[1];

        assert!(matches!(
            tree.resolve(reject_child, Outcome::Accept),
            Err(TreeError::InvalidTransition(_))
        ));
        assert!(tree.resolve(created[0], Outcome::Accept).is_ok());
        assert!(matches!(
            tree.resolve(created[0], Outcome::Reject),
            Err(TreeError::InvalidTransition(_))
        ));
    }

    #[test]
    fn start_step_offsets_proposal_streams() {
        let policy = GaussianRandomWalk::new(0.5);
        let streams = RandomStreams::new(3);
        let mut fresh = tree(1);
        let mut resumed = tree(1).with_start_step(10);
        let fresh_proposal = fresh.expand(&policy, &streams)[0];
        let resumed_proposal = resumed.expand(&policy, &streams)[0];

        assert_eq!(resumed.root_node().step, 10);
        assert_eq!(resumed.node(resumed_proposal).unwrap().step, 11);
        assert_ne!(
            fresh.node(fresh_proposal).unwrap().state,
            resumed.node(resumed_proposal).unwrap().state
        );
    }

    #[test]
    fn advance_root_on_accept_promotes_proposal() {
        let mut tree = tree(1);
        let proposal = grow(&mut tree)[0];
        tree.resolve(proposal, Outcome::Accept).unwrap();

        let advance = tree.advance_root(proposal).unwrap();
        assert_eq!(advance.new_root, proposal);
        assert_eq!(advance.outcome, Outcome::Accept);
        assert_eq!(advance.step, 1);
        assert_eq!(tree.root(), proposal);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn advance_root_on_reject_keeps_root_evaluations() {
        let mut tree = tree(1);
        let old_root = tree.root();
        tree.record(old_root, Level(0), LevelResult::LogDensity(-3.0));
        let proposal = grow(&mut tree)[0];
        tree.resolve(proposal, Outcome::Reject).unwrap();

        let advance = tree.advance_root(proposal).unwrap();
        assert_eq!(advance.outcome, Outcome::Reject);
        assert_ne!(advance.new_root, proposal);
        assert_eq!(tree.root_node().source, old_root);
        assert_eq!(tree.result(old_root, Level(0)), Some(LevelResult::LogDensity(-3.0)));
        assert!(advance.released_sources.contains(&proposal));
    }

    #[test]
    fn advance_root_requires_resolved_root_child() {
        let mut tree = tree(3);
        let created = grow(&mut tree);
        assert!(tree.advance_root(created[0]).is_err());
        assert!(matches!(
            tree.advance_root(created[1]),
            Err(TreeError::InvalidTransition(_))
        ));
    }

    #[test]
    fn advance_root_creates_missing_reject_branch() {
        let mut tree = tree(1);
        let proposal = grow(&mut tree)[0];
        let reject_child = tree.root_node().children[1];
        tree.prune(reject_child).unwrap();
        tree.resolve(proposal, Outcome::Reject).unwrap();

        let advance = tree.advance_root(proposal).unwrap();
        assert_ne!(advance.new_root, reject_child);
        assert_eq!(tree.root_node().assumes, Some(Outcome::Reject));
    }

    #[test]
    fn prune_root_is_invalid() {
        let mut tree = tree(1);
        let root = tree.root();
        assert!(matches!(tree.prune(root), Err(TreeError::InvalidTransition(_))));
        assert!(matches!(tree.prune(NodeId(77)), Err(TreeError::UnknownNode(_))));
    }

    #[test]
    fn top_log_density_reads_finest_level() {
        let mut tree = tree(1);
        let root = tree.root();
        assert_eq!(tree.top_log_density(root), None);
        tree.record(root, Level(1), LevelResult::LogDensity(-0.5));
        assert_eq!(tree.top_log_density(root), Some(-0.5));
    }
}
