//! Closure of deterministic descendants under linear and scale transforms.
//!
//! Conjugate samplers need the path from the sampled node to each child's
//! parameter to be linear (`a + B x`) or a pure scale (`B x`).

use super::arena::{ChainState, NodeArena};
use super::node::{NodeId, NodeKind};
use super::view::GraphView;
use smallvec::SmallVec;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureClass {
    Linear,
    Scale,
}

fn is_closed(
    arena: &NodeArena,
    id: NodeId,
    ancestors: &HashSet<NodeId>,
    class: ClosureClass,
    fixed: bool,
) -> bool {
    let node = arena.node(id);
    match node.kind() {
        NodeKind::Logical { func } => {
            let mask: SmallVec<[bool; 4]> =
                node.params().iter().map(|p| ancestors.contains(p)).collect();
            let fixmask: SmallVec<[bool; 4]> = node
                .params()
                .iter()
                .map(|p| arena.node(*p).is_fixed())
                .collect();
            let fix = fixed.then_some(fixmask.as_slice());
            match class {
                ClosureClass::Linear => func.is_linear(&mask, fix),
                ClosureClass::Scale => func.is_scale(&mask, fix),
            }
        }
        NodeKind::Aggregate { .. } => match class {
            ClosureClass::Linear => true,
            ClosureClass::Scale => node.parents().iter().all(|p| ancestors.contains(p)),
        },
        _ => false,
    }
}

fn check_closure(view: &GraphView, class: ClosureClass, fixed: bool) -> bool {
    let arena = view.arena();
    let mut ancestors: HashSet<NodeId> = view.nodes().iter().copied().collect();
    for &d in view.deterministic_children() {
        if !is_closed(arena, d, &ancestors, class, fixed) {
            return false;
        }
        ancestors.insert(d);
    }
    true
}

/// Every deterministic descendant is a linear function of the targets.
/// With `fixed`, the coefficients must also be constant.
pub fn check_linear(view: &GraphView, fixed: bool) -> bool {
    check_closure(view, ClosureClass::Linear, fixed)
}

/// Every deterministic descendant is a scale transform of the targets.
pub fn check_scale(view: &GraphView, fixed: bool) -> bool {
    check_closure(view, ClosureClass::Scale, fixed)
}

/// Linear coefficients of a parameter of each stochastic child with respect
/// to the targets, found by probing unit steps. `params[j]` selects the
/// parameter of child `j`.
///
/// The result is laid out child by child; within a child of parameter
/// length `m`, entry `n * k + i` is the derivative of element `k` with
/// respect to target element `i`. The chain state is restored on return.
pub fn linear_coefficients(view: &GraphView, state: &mut ChainState, params: &[usize], out: &mut Vec<f64>) {
    let arena = view.arena();
    let n = view.length();
    let x0 = view.value_vec(state);
    let params: Vec<NodeId> = view
        .stochastic_children()
        .iter()
        .zip(params)
        .map(|(&c, &k)| arena.node(c).params()[k])
        .collect();
    let base: Vec<Vec<f64>> = params.iter().map(|&p| state.value(p).to_vec()).collect();

    out.clear();
    out.resize(params.iter().map(|&p| arena.node(p).length() * n).sum(), 0.0);

    let mut x = x0.clone();
    for i in 0..n {
        x[i] += 1.0;
        view.set_value(&x, state);
        let mut offset = 0;
        for (p, b) in params.iter().zip(&base) {
            let v = state.value(*p);
            for k in 0..v.len() {
                out[offset + n * k + i] = v[k] - b[k];
            }
            offset += v.len() * n;
        }
        x[i] = x0[i];
    }
    view.set_value(&x0, state);
}
