use crate::graph::NodeId;
use std::fmt;
use thiserror::Error;

/// Which side of a member node a dangling reference was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Parent,
    Child,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Parent => write!(f, "parent"),
            Relation::Child => write!(f, "child"),
        }
    }
}

/// Errors raised while building or updating a model.
///
/// Structural errors (`Node`, `NotClosed`) always carry the identity of the
/// offending node. `Logic` signals a defect in sampler construction rather
/// than a problem with the user's model.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ModelError {
    #[error("error in node {name}: {message}")]
    Node {
        node: NodeId,
        name: String,
        message: String,
    },

    #[error("graph is not closed: {relation} {name} of a member node lies outside the graph")]
    NotClosed {
        node: NodeId,
        name: String,
        relation: Relation,
    },

    #[error("logic error: {0}")]
    Logic(String),

    #[error("cannot construct node {name}: {message}")]
    Construction { name: String, message: String },

    #[error("unable to find an appropriate sampler for node {name}")]
    NoSampler { node: NodeId, name: String },

    #[error("chain {chain}: {source}")]
    Chain {
        chain: usize,
        #[source]
        source: Box<ModelError>,
    },
}

impl ModelError {
    pub fn node(node: NodeId, name: impl Into<String>, message: impl Into<String>) -> Self {
        ModelError::Node {
            node,
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn construction(name: impl Into<String>, message: impl Into<String>) -> Self {
        ModelError::Construction {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Attach the chain index to an update failure.
    pub fn in_chain(self, chain: usize) -> Self {
        match self {
            e @ ModelError::Chain { .. } => e,
            e => ModelError::Chain {
                chain,
                source: Box::new(e),
            },
        }
    }

    /// The node this error refers to, looking through chain wrappers.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            ModelError::Node { node, .. }
            | ModelError::NotClosed { node, .. }
            | ModelError::NoSampler { node, .. } => Some(*node),
            ModelError::Chain { source, .. } => source.node_id(),
            _ => None,
        }
    }
}

pub type Result<T, E = ModelError> = std::result::Result<T, E>;
