use pmlda_tree::{
    GaussianRandomWalk, Level, LevelResult, NodeId, NodeStatus, Outcome, RandomStreams,
    SpeculativeTree, State,
};
use proptest::prelude::*;

fn fresh_tree(max_in_flight: usize) -> SpeculativeTree {
    SpeculativeTree::new(State::from(vec![0.0, 0.0]), 2, max_in_flight)
}

fn descendants(tree: &SpeculativeTree, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = tree.node(id).map(|n| n.children.clone()).unwrap_or_default();
    while let Some(current) = stack.pop() {
        out.push(current);
        if let Some(node) = tree.node(current) {
            stack.extend(node.children.iter().copied());
        }
    }
    out
}

fn reject_sibling(tree: &SpeculativeTree, id: NodeId) -> NodeId {
    let parent = tree.node(id).unwrap().parent.unwrap();
    tree.node(parent)
        .unwrap()
        .children
        .iter()
        .copied()
        .find(|c| tree.node(*c).unwrap().assumes == Some(Outcome::Reject))
        .unwrap()
}

#[test]
fn rejection_keeps_exactly_the_reject_branch() {
    let policy = GaussianRandomWalk::new(0.3);
    let streams = RandomStreams::new(11);
    let mut tree = fresh_tree(7);
    tree.expand(&policy, &streams);

    let proposal = tree.root_node().children[0];
    let sibling = reject_sibling(&tree, proposal);
    let accepted_branch = descendants(&tree, proposal);
    let rejected_branch = descendants(&tree, sibling);
    assert!(!accepted_branch.is_empty());
    assert!(!rejected_branch.is_empty());

    let pruned = tree.resolve(proposal, Outcome::Reject).unwrap();

    for id in &accepted_branch {
        assert_eq!(tree.node(*id).unwrap().status, NodeStatus::Pruned);
        assert!(pruned.nodes.contains(id));
    }
    assert!(tree.node(sibling).unwrap().is_live());
    for id in &rejected_branch {
        assert!(tree.node(*id).unwrap().is_live());
    }
}

#[test]
fn acceptance_keeps_exactly_the_accept_branch() {
    let policy = GaussianRandomWalk::new(0.3);
    let streams = RandomStreams::new(12);
    let mut tree = fresh_tree(7);
    tree.expand(&policy, &streams);

    let proposal = tree.root_node().children[0];
    let sibling = reject_sibling(&tree, proposal);
    let accepted_branch = descendants(&tree, proposal);

    let pruned = tree.resolve(proposal, Outcome::Accept).unwrap();

    assert_eq!(tree.node(sibling).unwrap().status, NodeStatus::Pruned);
    assert!(pruned.nodes.contains(&sibling));
    for id in &accepted_branch {
        assert!(tree.node(*id).unwrap().is_live());
    }
}

#[test]
fn late_result_for_pruned_node_is_a_no_op() {
    let policy = GaussianRandomWalk::new(0.3);
    let streams = RandomStreams::new(13);
    let mut tree = fresh_tree(5);
    tree.expand(&policy, &streams);

    let proposal = tree.root_node().children[0];
    let pruned = tree.prune(proposal).unwrap();
    assert!(pruned.sources.contains(&proposal));

    let before = tree.clone();
    assert!(!tree.record(proposal, Level(0), LevelResult::LogDensity(1.0)));
    assert_eq!(tree, before);

    let again = tree.prune(proposal).unwrap();
    assert!(again.is_empty());
    assert_eq!(tree, before);
}

#[test]
fn proposals_depend_on_step_not_on_expansion_history() {
    let policy = GaussianRandomWalk::new(0.3);
    let streams = RandomStreams::new(14);

    let mut narrow = fresh_tree(1);
    let mut wide = fresh_tree(9);
    narrow.expand(&policy, &streams);
    wide.expand(&policy, &streams);

    let narrow_first = narrow.node(narrow.root_node().children[0]).unwrap().state.clone();
    let wide_first = wide.node(wide.root_node().children[0]).unwrap().state.clone();
    assert_eq!(narrow_first, wide_first);
}

#[test]
fn chain_of_rejections_reuses_root_source() {
    let policy = GaussianRandomWalk::new(0.3);
    let streams = RandomStreams::new(15);
    let mut tree = fresh_tree(2);
    let original_root = tree.root();
    tree.record(original_root, Level(0), LevelResult::LogDensity(-1.0));

    for _ in 0..5 {
        tree.expand(&policy, &streams);
        let proposal = tree.root_node().children[0];
        tree.resolve(proposal, Outcome::Reject).unwrap();
        tree.advance_root(proposal).unwrap();
        assert_eq!(tree.root_node().source, original_root);
    }
    assert_eq!(tree.root_node().step, 5);
    assert_eq!(
        tree.result(original_root, Level(0)),
        Some(LevelResult::LogDensity(-1.0))
    );
}

#[derive(Debug, Clone)]
enum Op {
    Expand,
    Resolve { pick: usize, accept: bool },
    Advance,
    Prune { pick: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Expand),
        (any::<usize>(), any::<bool>()).prop_map(|(pick, accept)| Op::Resolve { pick, accept }),
        Just(Op::Advance),
        any::<usize>().prop_map(|pick| Op::Prune { pick }),
    ]
}

proptest! {
    #[test]
    fn prop_depth_and_width_stay_bounded(
        max_in_flight in 1usize..8,
        ops in proptest::collection::vec(op_strategy(), 1..80),
    ) {
        let policy = GaussianRandomWalk::new(0.5);
        let streams = RandomStreams::new(99);
        let mut tree = fresh_tree(max_in_flight);

        for op in ops {
            match op {
                Op::Expand => {
                    tree.expand(&policy, &streams);
                }
                Op::Resolve { pick, accept } => {
                    let pending = tree.pending_proposals();
                    if !pending.is_empty() {
                        let id = pending[pick % pending.len()];
                        let outcome = if accept { Outcome::Accept } else { Outcome::Reject };
                        tree.resolve(id, outcome).unwrap();
                    }
                }
                Op::Advance => {
                    if let Some(next) = tree.decided_root_child() {
                        tree.advance_root(next).unwrap();
                    }
                }
                Op::Prune { pick } => {
                    let live: Vec<NodeId> = tree
                        .live_order()
                        .into_iter()
                        .filter(|id| *id != tree.root())
                        .collect();
                    if !live.is_empty() {
                        tree.prune(live[pick % live.len()]).unwrap();
                    }
                }
            }

            prop_assert!(tree.max_depth() <= max_in_flight);
            prop_assert!(tree.pending_proposals().len() <= max_in_flight);
            prop_assert_eq!(tree.root_node().status, NodeStatus::Resolved);
            prop_assert!(tree.root_node().parent.is_none());
        }
    }

    #[test]
    fn prop_resolution_prunes_only_the_excluded_branch(
        max_in_flight in 2usize..10,
        pick in any::<usize>(),
        accept in any::<bool>(),
    ) {
        let policy = GaussianRandomWalk::new(0.5);
        let streams = RandomStreams::new(5);
        let mut tree = fresh_tree(max_in_flight);
        tree.expand(&policy, &streams);

        let pending = tree.pending_proposals();
        let id = pending[pick % pending.len()];
        let sibling = reject_sibling(&tree, id);
        let own = descendants(&tree, id);
        let alternative = descendants(&tree, sibling);

        let outcome = if accept { Outcome::Accept } else { Outcome::Reject };
        tree.resolve(id, outcome).unwrap();

        let own_live = own.iter().all(|n| tree.node(*n).unwrap().is_live());
        let alternative_live = tree.node(sibling).unwrap().is_live()
            && alternative.iter().all(|n| tree.node(*n).unwrap().is_live());
        let own_pruned = own.iter().all(|n| !tree.node(*n).unwrap().is_live());

        if accept {
            prop_assert!(own_live);
            prop_assert!(!tree.node(sibling).unwrap().is_live());
        } else {
            prop_assert!(own_pruned);
            prop_assert!(alternative_live);
        }
    }
}
