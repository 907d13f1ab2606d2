//! Model graph: node arena, membership sets, and sampler views.

mod arena;
mod builder;
pub mod closure;
mod node;
mod set;
mod view;

pub use arena::{ChainState, NodeArena};
pub use builder::GraphBuilder;
pub use closure::{check_linear, check_scale, linear_coefficients};
pub use node::{Node, NodeId, NodeKind, RvStatus};
pub use set::{sort_nodes, Graph};
pub use view::GraphView;
