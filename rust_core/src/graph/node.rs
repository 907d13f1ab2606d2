use crate::distributions::Distribution;
use crate::function::{Function, LinkFunction};
use std::sync::Arc;

/// Unique identifier for a node in the model graph.
///
/// Identifiers follow construction order, so a parent always has a smaller
/// id than each of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Random-variable status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RvStatus {
    /// Literal constants and deterministic nodes.
    NotRandom,
    /// A stochastic parameter to be sampled.
    Unobserved,
    /// Observed data, either a stochastic node or a data constant.
    Observed,
}

/// The closed set of node kinds.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Constant {
        observed: bool,
    },
    Stochastic {
        dist: Arc<dyn Distribution>,
        observed: bool,
        /// Number of distribution parameters; bounds follow them in `parents`.
        npar: usize,
        lower: Option<NodeId>,
        upper: Option<NodeId>,
    },
    Logical {
        func: Arc<dyn Function>,
    },
    Link {
        func: Arc<dyn LinkFunction>,
    },
    /// Element `k` copies `source[offset]` for `(source, offset) = elements[k]`.
    /// Sources are never aggregates themselves.
    Aggregate {
        elements: Vec<(NodeId, usize)>,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) dim: Vec<usize>,
    pub(crate) parents: Vec<NodeId>,
    pub(crate) stochastic_children: Vec<NodeId>,
    pub(crate) deterministic_children: Vec<NodeId>,
    pub(crate) fixed: bool,
    pub(crate) discrete: bool,
    /// Start of this node's value in a chain buffer.
    pub(crate) offset: usize,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn dim(&self) -> &[usize] {
        &self.dim
    }

    pub fn length(&self) -> usize {
        self.dim.iter().product()
    }

    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    /// Distribution or function arguments, excluding truncation bounds.
    pub fn params(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Stochastic { npar, .. } => &self.parents[..*npar],
            _ => &self.parents,
        }
    }

    pub fn stochastic_children(&self) -> &[NodeId] {
        &self.stochastic_children
    }

    pub fn deterministic_children(&self) -> &[NodeId] {
        &self.deterministic_children
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn is_discrete(&self) -> bool {
        self.discrete
    }

    pub fn is_stochastic(&self) -> bool {
        matches!(self.kind, NodeKind::Stochastic { .. })
    }

    pub fn is_deterministic(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Logical { .. } | NodeKind::Link { .. } | NodeKind::Aggregate { .. }
        )
    }

    pub fn is_observed(&self) -> bool {
        match self.kind {
            NodeKind::Constant { observed } | NodeKind::Stochastic { observed, .. } => observed,
            _ => false,
        }
    }

    pub fn rv_status(&self) -> RvStatus {
        match self.kind {
            NodeKind::Stochastic { observed: false, .. } => RvStatus::Unobserved,
            NodeKind::Stochastic { observed: true, .. } | NodeKind::Constant { observed: true } => {
                RvStatus::Observed
            }
            _ => RvStatus::NotRandom,
        }
    }

    pub fn distribution(&self) -> Option<&dyn Distribution> {
        match &self.kind {
            NodeKind::Stochastic { dist, .. } => Some(dist.as_ref()),
            _ => None,
        }
    }

    /// Name of the node's distribution, if stochastic.
    pub fn dist_name(&self) -> Option<&str> {
        self.distribution().map(|d| d.name())
    }

    /// Whether the node carries truncation bounds.
    pub fn is_bounded(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Stochastic { lower, upper, .. } if lower.is_some() || upper.is_some()
        )
    }
}
