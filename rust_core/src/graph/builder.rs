use super::arena::{evaluate, NodeArena};
use super::node::{Node, NodeId, NodeKind};
use crate::distributions::{is_integer, Distribution};
use crate::error::{ModelError, Result};
use crate::function::{Function, LinkFunction};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Single-threaded build phase for a model graph.
///
/// Nodes can only reference nodes added earlier, so the result is acyclic
/// by construction. [`finish`](Self::finish) freezes the structure into a
/// [`NodeArena`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    values: Vec<f64>,
    names: HashMap<String, NodeId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// A literal constant.
    pub fn add_constant(&mut self, name: &str, dim: Vec<usize>, value: Vec<f64>) -> Result<NodeId> {
        self.constant(name, dim, value, false)
    }

    /// A constant supplied as data.
    pub fn add_data(&mut self, name: &str, dim: Vec<usize>, value: Vec<f64>) -> Result<NodeId> {
        self.constant(name, dim, value, true)
    }

    /// Scalar literal constant.
    pub fn scalar(&mut self, name: &str, value: f64) -> Result<NodeId> {
        self.add_constant(name, vec![1], vec![value])
    }

    fn constant(&mut self, name: &str, dim: Vec<usize>, value: Vec<f64>, observed: bool) -> Result<NodeId> {
        if dim.iter().product::<usize>() != value.len() || value.is_empty() {
            return Err(ModelError::construction(name, "value length does not match dimension"));
        }
        let discrete = value.iter().all(|&v| is_integer(v));
        self.push(
            name,
            NodeKind::Constant { observed },
            dim,
            Vec::new(),
            true,
            discrete,
            Some(value),
        )
    }

    /// An unobserved stochastic node, optionally truncated to `[lower, upper]`.
    pub fn add_stochastic(
        &mut self,
        name: &str,
        dist: Arc<dyn Distribution>,
        params: &[NodeId],
        lower: Option<NodeId>,
        upper: Option<NodeId>,
    ) -> Result<NodeId> {
        self.stochastic(name, dist, params, lower, upper, None)
    }

    /// An observed stochastic node.
    pub fn add_observed(
        &mut self,
        name: &str,
        dist: Arc<dyn Distribution>,
        params: &[NodeId],
        lower: Option<NodeId>,
        upper: Option<NodeId>,
        value: Vec<f64>,
    ) -> Result<NodeId> {
        self.stochastic(name, dist, params, lower, upper, Some(value))
    }

    fn stochastic(
        &mut self,
        name: &str,
        dist: Arc<dyn Distribution>,
        params: &[NodeId],
        lower: Option<NodeId>,
        upper: Option<NodeId>,
        value: Option<Vec<f64>>,
    ) -> Result<NodeId> {
        self.check_parents(name, params)?;
        if !dist.check_npar(params.len()) {
            return Err(ModelError::construction(
                name,
                format!("wrong number of parameters for {}: {}", dist.name(), params.len()),
            ));
        }
        let dim = {
            let dims = self.dims(params);
            if !dist.check_parameter_dims(&dims) {
                return Err(ModelError::construction(
                    name,
                    format!("invalid parameter dimensions for {}", dist.name()),
                ));
            }
            dist.dim(&dims)
        };
        let length: usize = dim.iter().product();

        let mut parents = params.to_vec();
        for bound in lower.iter().chain(upper.iter()) {
            if !dist.can_bound() {
                return Err(ModelError::construction(
                    name,
                    format!("{} cannot be truncated", dist.name()),
                ));
            }
            self.check_parents(name, &[*bound])?;
            if self.nodes[bound.0].length() != length {
                return Err(ModelError::construction(name, "bound dimension mismatch"));
            }
            parents.push(*bound);
        }

        let observed = value.is_some();
        if let Some(v) = &value {
            if v.len() != length {
                return Err(ModelError::construction(name, "observed value length does not match dimension"));
            }
        }
        let mask: SmallVec<[bool; 4]> = params.iter().map(|p| self.nodes[p.0].discrete).collect();
        let discrete = dist.is_discrete_valued(&mask);
        let npar = params.len();
        self.push(
            name,
            NodeKind::Stochastic {
                dist,
                observed,
                npar,
                lower,
                upper,
            },
            dim,
            parents,
            observed,
            discrete,
            value,
        )
    }

    /// A logical node `func(params...)`.
    pub fn add_logical(&mut self, name: &str, func: Arc<dyn Function>, params: &[NodeId]) -> Result<NodeId> {
        self.check_parents(name, params)?;
        if !func.check_arity(params.len()) {
            return Err(ModelError::construction(
                name,
                format!("wrong number of arguments for {}", func.name()),
            ));
        }
        let dim = func.dim(&self.dims(params)).ok_or_else(|| {
            ModelError::construction(name, format!("invalid argument dimensions for {}", func.name()))
        })?;
        let mask: SmallVec<[bool; 4]> = params.iter().map(|p| self.nodes[p.0].discrete).collect();
        let discrete = func.is_discrete_valued(&mask);
        let fixed = params.iter().all(|p| self.nodes[p.0].fixed);
        self.push(
            name,
            NodeKind::Logical { func },
            dim,
            params.to_vec(),
            fixed,
            discrete,
            None,
        )
    }

    /// A link node applying `func`'s inverse link to a scalar parent.
    pub fn add_link(&mut self, name: &str, func: Arc<dyn LinkFunction>, parent: NodeId) -> Result<NodeId> {
        self.check_parents(name, &[parent])?;
        if self.nodes[parent.0].length() != 1 {
            return Err(ModelError::construction(name, "link functions take a scalar argument"));
        }
        let fixed = self.nodes[parent.0].fixed;
        self.push(name, NodeKind::Link { func }, vec![1], vec![parent], fixed, false, None)
    }

    /// An aggregate node whose element `k` is `elements[k].0[elements[k].1]`.
    ///
    /// References into another aggregate are resolved to that aggregate's
    /// own source, so aggregates never have aggregate parents.
    pub fn add_aggregate(&mut self, name: &str, dim: Vec<usize>, elements: &[(NodeId, usize)]) -> Result<NodeId> {
        if dim.iter().product::<usize>() != elements.len() || elements.is_empty() {
            return Err(ModelError::construction(name, "element count does not match dimension"));
        }
        let mut flat = Vec::with_capacity(elements.len());
        for &(source, offset) in elements {
            self.check_parents(name, &[source])?;
            let src = &self.nodes[source.0];
            if offset >= src.length() {
                return Err(ModelError::construction(
                    name,
                    format!("offset {} out of range for {}", offset, src.name),
                ));
            }
            match &src.kind {
                NodeKind::Aggregate { elements: inner } => flat.push(inner[offset]),
                _ => flat.push((source, offset)),
            }
        }

        let mut parents: Vec<NodeId> = Vec::new();
        for &(source, _) in &flat {
            if !parents.contains(&source) {
                parents.push(source);
            }
        }
        let fixed = parents.iter().all(|p| self.nodes[p.0].fixed);
        let discrete = parents.iter().all(|p| self.nodes[p.0].discrete);
        self.push(
            name,
            NodeKind::Aggregate { elements: flat },
            dim,
            parents,
            fixed,
            discrete,
            None,
        )
    }

    /// A vector subset `parent[offsets]`.
    pub fn add_subset(&mut self, name: &str, parent: NodeId, offsets: impl IntoIterator<Item = usize>) -> Result<NodeId> {
        let elements: Vec<(NodeId, usize)> = offsets.into_iter().map(|o| (parent, o)).collect();
        self.add_aggregate(name, vec![elements.len()], &elements)
    }

    /// Freeze the structure.
    pub fn finish(self) -> NodeArena {
        let layout = self
            .nodes
            .iter()
            .map(|n| (n.offset, n.length()))
            .collect::<Vec<_>>()
            .into();
        NodeArena {
            nodes: self.nodes,
            layout,
            template: self.values,
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    fn check_parents(&self, name: &str, parents: &[NodeId]) -> Result<()> {
        match parents.iter().find(|p| p.0 >= self.nodes.len()) {
            Some(p) => Err(ModelError::construction(name, format!("unknown parent {:?}", p))),
            None => Ok(()),
        }
    }

    fn dims(&self, params: &[NodeId]) -> SmallVec<[&[usize]; 4]> {
        params.iter().map(|p| self.nodes[p.0].dim.as_slice()).collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        name: &str,
        kind: NodeKind,
        dim: Vec<usize>,
        parents: Vec<NodeId>,
        fixed: bool,
        discrete: bool,
        value: Option<Vec<f64>>,
    ) -> Result<NodeId> {
        if self.names.contains_key(name) {
            return Err(ModelError::construction(name, "duplicate node name"));
        }
        let id = NodeId(self.nodes.len());
        let stochastic = matches!(kind, NodeKind::Stochastic { .. });
        let deterministic = !stochastic && !matches!(kind, NodeKind::Constant { .. });
        let offset = self.values.len();
        let length: usize = dim.iter().product();

        for &p in &parents {
            let parent = &mut self.nodes[p.0];
            let children = if stochastic {
                &mut parent.stochastic_children
            } else {
                &mut parent.deterministic_children
            };
            if !children.contains(&id) {
                children.push(id);
            }
        }

        self.nodes.push(Node {
            name: name.to_string(),
            kind,
            dim,
            parents,
            stochastic_children: Vec::new(),
            deterministic_children: Vec::new(),
            fixed,
            discrete,
            offset,
        });
        match value {
            Some(v) => self.values.extend_from_slice(&v),
            None => self.values.resize(offset + length, f64::NAN),
        }

        // Deterministic nodes with fixed parents are computed once, here.
        if deterministic && fixed {
            let (before, out) = self.values.split_at_mut(offset);
            evaluate(&self.nodes, &self.nodes[id.0], before, out);
        }
        self.names.insert(name.to_string(), id);
        Ok(id)
    }
}
