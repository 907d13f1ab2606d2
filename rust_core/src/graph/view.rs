use super::arena::{ChainState, NodeArena};
use super::node::NodeId;
use super::set::{sort_nodes, Graph};
use crate::error::{ModelError, Result};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// A sampler's window onto its target nodes and everything downstream of
/// them that could change when they do.
///
/// The descendant sets are computed once, at construction: graph structure
/// never changes afterwards.
#[derive(Debug, Clone)]
pub struct GraphView {
    arena: Arc<NodeArena>,
    nodes: Vec<NodeId>,
    stochastic_children: Vec<NodeId>,
    /// Deterministic descendants in topological order.
    deterministic_children: Vec<NodeId>,
    dependent: HashSet<NodeId>,
    length: usize,
}

impl GraphView {
    /// Build the view of `nodes` within `graph`.
    ///
    /// Targets must be stochastic members of the graph. Descendants outside
    /// the graph are ignored.
    pub fn new(nodes: &[NodeId], graph: &Graph, arena: &Arc<NodeArena>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(ModelError::Logic("graph view with no target nodes".into()));
        }
        let targets: HashSet<NodeId> = nodes.iter().copied().collect();
        if targets.len() != nodes.len() {
            return Err(ModelError::Logic("duplicate target in graph view".into()));
        }
        for &id in nodes {
            if !graph.contains(id) || !arena.node(id).is_stochastic() {
                return Err(ModelError::Logic(format!(
                    "{} is not a stochastic node of the sampling graph",
                    arena.name(id)
                )));
            }
        }

        let mut stochastic = BTreeSet::new();
        let mut deterministic = BTreeSet::new();
        let mut stack: Vec<NodeId> = nodes.to_vec();
        while let Some(id) = stack.pop() {
            let node = arena.node(id);
            for &c in node.stochastic_children() {
                if graph.contains(c) && !targets.contains(&c) {
                    stochastic.insert(c);
                }
            }
            for &c in node.deterministic_children() {
                if graph.contains(c) && deterministic.insert(c) {
                    stack.push(c);
                }
            }
        }

        let deterministic_children = sort_nodes(deterministic, arena)?;
        let dependent = nodes
            .iter()
            .chain(&deterministic_children)
            .copied()
            .collect();
        let length = nodes.iter().map(|&n| arena.node(n).length()).sum();
        Ok(Self {
            arena: Arc::clone(arena),
            nodes: nodes.to_vec(),
            stochastic_children: stochastic.into_iter().collect(),
            deterministic_children,
            dependent,
            length,
        })
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// The first target; the only one for singleton views.
    pub fn node(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn stochastic_children(&self) -> &[NodeId] {
        &self.stochastic_children
    }

    pub fn deterministic_children(&self) -> &[NodeId] {
        &self.deterministic_children
    }

    /// Total length of the target values.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Whether `id`'s value could change when the targets change.
    pub fn is_dependent(&self, id: NodeId) -> bool {
        self.dependent.contains(&id)
    }

    /// Write the targets, then bring every deterministic descendant up to
    /// date before returning.
    pub fn set_value(&self, value: &[f64], state: &mut ChainState) {
        debug_assert_eq!(value.len(), self.length);
        let mut k = 0;
        for &id in &self.nodes {
            let len = self.arena.node(id).length();
            state.set(id, &value[k..k + len]);
            k += len;
        }
        for &id in &self.deterministic_children {
            self.arena.resample(id, state);
        }
    }

    pub fn get_value(&self, value: &mut [f64], state: &ChainState) {
        let mut k = 0;
        for &id in &self.nodes {
            let v = state.value(id);
            value[k..k + v.len()].copy_from_slice(v);
            k += v.len();
        }
    }

    pub fn value_vec(&self, state: &ChainState) -> Vec<f64> {
        let mut v = vec![0.0; self.length];
        self.get_value(&mut v, state);
        v
    }

    pub fn log_prior(&self, state: &ChainState) -> f64 {
        self.nodes.iter().map(|&n| self.arena.log_density(n, state)).sum()
    }

    pub fn log_likelihood(&self, state: &ChainState) -> f64 {
        self.stochastic_children
            .iter()
            .map(|&n| self.arena.log_density(n, state))
            .sum()
    }

    /// Log density of the targets given everything else, up to a constant.
    ///
    /// A NaN result is reported against the node whose density failed.
    pub fn log_full_conditional(&self, state: &ChainState) -> Result<f64> {
        let lfc = self.log_prior(state) + self.log_likelihood(state);
        if lfc.is_nan() {
            let culprit = self
                .nodes
                .iter()
                .chain(&self.stochastic_children)
                .find(|&&n| self.arena.log_density(n, state).is_nan())
                .copied()
                .unwrap_or(self.nodes[0]);
            return Err(self.node_error(culprit, "failure to calculate log density"));
        }
        Ok(lfc)
    }

    /// Log prior plus `power` times log likelihood.
    pub fn log_tempered(&self, state: &ChainState, power: f64) -> Result<f64> {
        let lp = self.log_prior(state);
        let ll = self.log_likelihood(state);
        let v = if power == 0.0 { lp } else { lp + power * ll };
        if v.is_nan() {
            return Err(self.node_error(self.node(), "failure to calculate log density"));
        }
        Ok(v)
    }

    pub fn node_error(&self, id: NodeId, message: impl Into<String>) -> ModelError {
        ModelError::node(id, self.arena.name(id), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Norm;
    use crate::function::{Add, Multiply};
    use crate::graph::GraphBuilder;

    #[test]
    fn test_set_value_propagates_before_density() {
        let mut b = GraphBuilder::new();
        let zero = b.scalar("zero", 0.0).unwrap();
        let one = b.scalar("one", 1.0).unwrap();
        let three = b.scalar("three", 3.0).unwrap();
        let mu = b.add_stochastic("mu", Arc::new(Norm), &[zero, one], None, None).unwrap();
        let scaled = b.add_logical("scaled", Arc::new(Multiply), &[mu, three]).unwrap();
        let shifted = b.add_logical("shifted", Arc::new(Add), &[scaled, one]).unwrap();
        let y = b.add_observed("y", Arc::new(Norm), &[shifted, one], None, None, vec![7.0]).unwrap();
        let arena = Arc::new(b.finish());
        let graph = arena.full_graph();
        let view = GraphView::new(&[mu], &graph, &arena).unwrap();

        assert_eq!(view.deterministic_children(), &[scaled, shifted]);
        assert_eq!(view.stochastic_children(), &[y]);
        assert!(view.is_dependent(shifted));
        assert!(!view.is_dependent(one));
        assert!(!view.is_dependent(y));

        let mut state = arena.new_chain_state();
        view.set_value(&[2.0], &mut state);
        assert_eq!(state.value(shifted), &[7.0]);
        let lfc = view.log_full_conditional(&state).unwrap();
        let expected = -2.0 - (2.0 * std::f64::consts::PI).ln();
        assert!((lfc - expected).abs() < 1e-12, "lfc {}", lfc);
    }

    #[test]
    fn test_view_rejects_non_stochastic_targets() {
        let mut b = GraphBuilder::new();
        let c = b.scalar("c", 0.0).unwrap();
        let arena = Arc::new(b.finish());
        let graph = arena.full_graph();
        assert!(matches!(
            GraphView::new(&[c], &graph, &arena),
            Err(ModelError::Logic(_))
        ));
    }
}
