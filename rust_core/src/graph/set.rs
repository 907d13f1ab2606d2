use super::arena::NodeArena;
use super::node::NodeId;
use crate::error::{ModelError, Relation, Result};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A set of nodes drawn from one arena.
///
/// Membership is all a graph holds; structure lives in the arena.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    members: BTreeSet<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the node was already a member.
    pub fn add(&mut self, id: NodeId) -> bool {
        self.members.insert(id)
    }

    /// Returns `false` if the node was not a member.
    pub fn remove(&mut self, id: NodeId) -> bool {
        self.members.remove(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().copied()
    }

    /// Error naming the first member with a parent or child outside the graph.
    pub fn check_closed(&self, arena: &NodeArena) -> Result<()> {
        for id in self.iter() {
            let node = arena.node(id);
            if let Some(&p) = node.parents().iter().find(|p| !self.contains(**p)) {
                return Err(ModelError::NotClosed {
                    node: p,
                    name: arena.name(p).to_string(),
                    relation: Relation::Parent,
                });
            }
            let mut children = node
                .stochastic_children()
                .iter()
                .chain(node.deterministic_children());
            if let Some(&c) = children.find(|c| !self.contains(**c)) {
                return Err(ModelError::NotClosed {
                    node: c,
                    name: arena.name(c).to_string(),
                    relation: Relation::Child,
                });
            }
        }
        Ok(())
    }

    pub fn is_closed(&self, arena: &NodeArena) -> bool {
        self.check_closed(arena).is_ok()
    }

    /// Members in an order where every node follows its ancestors.
    pub fn sorted_nodes(&self, arena: &NodeArena) -> Result<Vec<NodeId>> {
        sort_nodes(self.members.clone(), arena)
    }
}

impl FromIterator<NodeId> for Graph {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

/// Topologically sort a working set of nodes, consuming it.
///
/// Ordering follows reachability through the whole arena, so a member comes
/// after every member it descends from even when the path between them
/// leaves the set. Each pass strips the members with no descendant left in
/// the set; the removal order reversed is the result. A pass that removes
/// nothing means the structure has a cycle.
pub fn sort_nodes(mut working: BTreeSet<NodeId>, arena: &NodeArena) -> Result<Vec<NodeId>> {
    let descendants: HashMap<NodeId, Vec<NodeId>> = working
        .iter()
        .map(|&id| (id, member_descendants(id, &working, arena)))
        .collect();
    let mut sorted = Vec::with_capacity(working.len());
    while !working.is_empty() {
        let leaves: Vec<NodeId> = working
            .iter()
            .copied()
            .filter(|id| !descendants[id].iter().any(|d| working.contains(d)))
            .collect();
        if leaves.is_empty() {
            return Err(ModelError::Logic(format!(
                "cycle detected while sorting {} remaining nodes",
                working.len()
            )));
        }
        for id in leaves {
            working.remove(&id);
            sorted.push(id);
        }
    }
    sorted.reverse();
    Ok(sorted)
}

/// Members of `set` reachable from `start` by one or more child links.
fn member_descendants(start: NodeId, set: &BTreeSet<NodeId>, arena: &NodeArena) -> Vec<NodeId> {
    let children = |id: NodeId| {
        let node = arena.node(id);
        node.stochastic_children()
            .iter()
            .chain(node.deterministic_children())
            .copied()
            .collect::<Vec<_>>()
    };
    let mut seen = HashSet::new();
    let mut stack = children(start);
    let mut found = Vec::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if set.contains(&id) {
            found.push(id);
        }
        stack.extend(children(id));
    }
    found
}
