use dagmc_core::distributions::Norm;
use dagmc_core::function::Add;
use dagmc_core::graph::{sort_nodes, Graph, GraphBuilder, NodeArena, NodeId};
use dagmc_core::ModelError;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Each entry adds one node: stochastic `dnorm(a, 1)` or logical `a + b`,
/// with parents picked among the nodes already present.
fn random_dag(plan: &[(bool, usize, usize)]) -> NodeArena {
    let mut b = GraphBuilder::new();
    let mut ids = vec![b.scalar("c0", 0.0).unwrap(), b.scalar("c1", 1.0).unwrap()];
    for (i, &(stochastic, a, c)) in plan.iter().enumerate() {
        let pa = ids[a % ids.len()];
        let pc = ids[c % ids.len()];
        let name = format!("n{}", i);
        let id = if stochastic {
            b.add_stochastic(&name, Arc::new(Norm), &[pa, ids[1]], None, None)
        } else {
            b.add_logical(&name, Arc::new(Add), &[pa, pc])
        }
        .unwrap();
        ids.push(id);
    }
    b.finish()
}

fn assert_ancestors_first(order: &[NodeId], arena: &NodeArena) {
    let position: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    for &id in order {
        let mut stack: Vec<NodeId> = arena.node(id).parents().to_vec();
        let mut seen = BTreeSet::new();
        while let Some(a) = stack.pop() {
            if !seen.insert(a) {
                continue;
            }
            if let Some(&pa) = position.get(&a) {
                assert!(pa < position[&id], "{} sorted before its ancestor {}", arena.name(id), arena.name(a));
            }
            stack.extend_from_slice(arena.node(a).parents());
        }
    }
}

fn plan() -> impl Strategy<Value = Vec<(bool, usize, usize)>> {
    prop::collection::vec((any::<bool>(), any::<usize>(), any::<usize>()), 1..30)
}

proptest! {
    #[test]
    fn prop_full_graph_sorts_parents_first(plan in plan()) {
        let arena = random_dag(&plan);
        let order = arena.full_graph().sorted_nodes(&arena).unwrap();
        prop_assert_eq!(order.len(), arena.len());
        assert_ancestors_first(&order, &arena);
    }

    #[test]
    fn prop_subset_sort_is_permutation(plan in plan(), mask in prop::collection::vec(any::<bool>(), 32)) {
        let arena = random_dag(&plan);
        let subset: BTreeSet<NodeId> = arena.ids().filter(|id| mask[id.0 % mask.len()]).collect();
        let order = sort_nodes(subset.clone(), &arena).unwrap();
        let sorted: BTreeSet<NodeId> = order.iter().copied().collect();
        prop_assert_eq!(order.len(), subset.len());
        prop_assert_eq!(sorted, subset);
        assert_ancestors_first(&order, &arena);
    }

    #[test]
    fn prop_closure_detects_missing_neighbours(plan in plan(), drop in any::<usize>()) {
        let arena = random_dag(&plan);
        prop_assert!(arena.full_graph().is_closed(&arena));

        // removing a node that has a parent or child leaves the rest open
        let removed = NodeId(drop % arena.len());
        let node = arena.node(removed);
        let connected = !node.parents().is_empty()
            || !node.stochastic_children().is_empty()
            || !node.deterministic_children().is_empty();
        let graph: Graph = arena.ids().filter(|&id| id != removed).collect();
        match graph.check_closed(&arena) {
            Err(ModelError::NotClosed { .. }) => prop_assert!(connected),
            Ok(()) => prop_assert!(!connected),
            Err(e) => prop_assert!(false, "unexpected error {}", e),
        }
    }
}
