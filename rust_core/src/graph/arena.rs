use super::node::{Node, NodeId, NodeKind};
use super::set::Graph;
use crate::distributions::Bounds;
use crate::rng::ChainRng;
use smallvec::SmallVec;
use std::sync::Arc;

/// Per-chain values for every node in the arena.
///
/// Values are laid out in construction order, so every parent's value
/// lives before its child's.
#[derive(Debug, Clone)]
pub struct ChainState {
    values: Vec<f64>,
    layout: Arc<[(usize, usize)]>,
}

impl ChainState {
    pub fn value(&self, id: NodeId) -> &[f64] {
        let (offset, len) = self.layout[id.0];
        &self.values[offset..offset + len]
    }

    pub(crate) fn value_mut(&mut self, id: NodeId) -> &mut [f64] {
        let (offset, len) = self.layout[id.0];
        &mut self.values[offset..offset + len]
    }

    pub(crate) fn set(&mut self, id: NodeId, value: &[f64]) {
        self.value_mut(id).copy_from_slice(value);
    }

    /// Everything stored before `id`, and `id`'s own value.
    fn split(&mut self, id: NodeId) -> (&[f64], &mut [f64]) {
        let (offset, len) = self.layout[id.0];
        let (before, rest) = self.values.split_at_mut(offset);
        (before, &mut rest[..len])
    }
}

pub(crate) type Params<'a> = SmallVec<[&'a [f64]; 4]>;

/// Immutable store of all model nodes.
///
/// The structure never changes after [`GraphBuilder::finish`](super::GraphBuilder::finish);
/// only chain values do. The arena is shared read-only by every sampler and
/// every chain.
#[derive(Debug)]
pub struct NodeArena {
    pub(crate) nodes: Vec<Node>,
    pub(crate) layout: Arc<[(usize, usize)]>,
    /// Values of fixed nodes; other entries are NaN until initialized.
    pub(crate) template: Vec<f64>,
}

impl NodeArena {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// A graph containing every node, which is closed by construction.
    pub fn full_graph(&self) -> Graph {
        self.ids().collect()
    }

    /// A fresh chain buffer holding the fixed values.
    pub fn new_chain_state(&self) -> ChainState {
        ChainState {
            values: self.template.clone(),
            layout: self.layout.clone(),
        }
    }

    // ── Evaluation ──────────────────────────────────────────────────────────

    /// Recompute a deterministic node from its parents.
    pub fn resample(&self, id: NodeId, state: &mut ChainState) {
        let node = &self.nodes[id.0];
        let (before, out) = state.split(id);
        evaluate(&self.nodes, node, before, out);
    }

    /// Log density of a stochastic node, including truncation.
    ///
    /// Zero for non-stochastic nodes and `-inf` when the parameter values
    /// are invalid.
    pub fn log_density(&self, id: NodeId, state: &ChainState) -> f64 {
        let node = &self.nodes[id.0];
        let dist = match node.distribution() {
            Some(d) => d,
            None => return 0.0,
        };
        let params = param_values(&self.nodes, node, &state.values);
        if !dist.check_parameter_values(&params) {
            return f64::NEG_INFINITY;
        }
        let bounds = bound_values(&self.nodes, node, &state.values);
        dist.log_density(state.value(id), &params, bounds)
    }

    /// Draw a stochastic node from its (truncated) prior.
    pub fn random_sample(&self, id: NodeId, state: &mut ChainState, rng: &mut ChainRng) {
        let node = &self.nodes[id.0];
        let (before, out) = state.split(id);
        if let Some(dist) = node.distribution() {
            let params = param_values(&self.nodes, node, before);
            let bounds = bound_values(&self.nodes, node, before);
            dist.random_sample(out, &params, bounds, rng);
        }
    }

    /// Draw a stochastic node from its prior restricted to `[lower, upper]`,
    /// ignoring any truncation declared on the node itself.
    pub fn truncated_sample(
        &self,
        id: NodeId,
        state: &mut ChainState,
        lower: Option<&[f64]>,
        upper: Option<&[f64]>,
        rng: &mut ChainRng,
    ) {
        let node = &self.nodes[id.0];
        let (before, out) = state.split(id);
        if let Some(dist) = node.distribution() {
            let params = param_values(&self.nodes, node, before);
            dist.random_sample(out, &params, Bounds { lower, upper }, rng);
        }
    }

    pub fn typical_value(&self, id: NodeId, state: &mut ChainState) {
        let node = &self.nodes[id.0];
        let (before, out) = state.split(id);
        if let Some(dist) = node.distribution() {
            let params = param_values(&self.nodes, node, before);
            let bounds = bound_values(&self.nodes, node, before);
            dist.typical_value(out, &params, bounds);
        }
    }

    /// Elementwise support of a stochastic node, narrowed by its bounds.
    pub fn support(&self, id: NodeId, state: &ChainState) -> (Vec<f64>, Vec<f64>) {
        let node = &self.nodes[id.0];
        let n = node.length();
        let mut lower = vec![f64::NEG_INFINITY; n];
        let mut upper = vec![f64::INFINITY; n];
        if let Some(dist) = node.distribution() {
            let params = param_values(&self.nodes, node, &state.values);
            dist.support(&mut lower, &mut upper, &params);
            let bounds = bound_values(&self.nodes, node, &state.values);
            if let Some(l) = bounds.lower {
                for (a, b) in lower.iter_mut().zip(l) {
                    *a = a.max(*b);
                }
            }
            if let Some(u) = bounds.upper {
                for (a, b) in upper.iter_mut().zip(u) {
                    *a = a.min(*b);
                }
            }
        }
        (lower, upper)
    }

    /// Whether the support of a stochastic node depends only on fixed nodes.
    pub fn is_support_fixed(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        match &node.kind {
            NodeKind::Stochastic {
                dist, lower, upper, ..
            } => {
                let fixmask: SmallVec<[bool; 4]> = node
                    .params()
                    .iter()
                    .map(|p| self.nodes[p.0].fixed)
                    .collect();
                let bounds_fixed = lower.iter().chain(upper).all(|b| self.nodes[b.0].fixed);
                bounds_fixed && dist.is_support_fixed(&fixmask)
            }
            _ => false,
        }
    }
}

pub(crate) fn slot<'a>(nodes: &[Node], id: NodeId, values: &'a [f64]) -> &'a [f64] {
    let node = &nodes[id.0];
    &values[node.offset..node.offset + node.length()]
}

pub(crate) fn param_values<'a>(nodes: &[Node], node: &Node, values: &'a [f64]) -> Params<'a> {
    node.params().iter().map(|&p| slot(nodes, p, values)).collect()
}

fn bound_values<'a>(nodes: &[Node], node: &Node, values: &'a [f64]) -> Bounds<'a> {
    match node.kind {
        NodeKind::Stochastic { lower, upper, .. } => Bounds {
            lower: lower.map(|l| slot(nodes, l, values)),
            upper: upper.map(|u| slot(nodes, u, values)),
        },
        _ => Bounds::default(),
    }
}

/// Compute a deterministic node's value from parent values stored in `before`.
pub(crate) fn evaluate(nodes: &[Node], node: &Node, before: &[f64], out: &mut [f64]) {
    match &node.kind {
        NodeKind::Logical { func } => {
            let args = param_values(nodes, node, before);
            func.evaluate(out, &args);
        }
        NodeKind::Link { func } => {
            let eta = slot(nodes, node.parents[0], before)[0];
            out[0] = func.inverse_link(eta);
        }
        NodeKind::Aggregate { elements } => {
            for (v, &(source, offset)) in out.iter_mut().zip(elements) {
                *v = before[nodes[source.0].offset + offset];
            }
        }
        NodeKind::Constant { .. } | NodeKind::Stochastic { .. } => {}
    }
}
