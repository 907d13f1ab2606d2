use super::{children_unbounded, ConjugateDist, ConjugateMethod, Workspace};
use crate::distributions::multinomial_sample;
use crate::error::Result;
use crate::graph::{ChainState, GraphView, NodeId, NodeKind};
use crate::rng::ChainRng;

/// Multinomial node whose elements are the sizes of binomial children.
///
/// With `y[j] ~ dbin(q[j], x[i(j)])`, the full conditional of `x` is `y`
/// shifted by a multinomial draw of the remaining count with probabilities
/// `p[i] (1 - q[j])`.
#[derive(Debug, Clone)]
pub struct ShiftedMultinomial {
    /// Element of the target that each child's size reads.
    index: Vec<usize>,
}

fn child_size(view: &GraphView, state: &ChainState, child: NodeId) -> f64 {
    state.value(view.arena().node(child).params()[1])[0]
}

impl ShiftedMultinomial {
    /// Structural checks, then a test of which element each child reads.
    /// Returns `None` if the node is not eligible.
    pub fn new(view: &GraphView, state: &mut ChainState) -> Option<Self> {
        let arena = view.arena();
        if arena.node(view.node()).is_bounded() || !children_unbounded(view) {
            return None;
        }
        let subsets_only = view
            .deterministic_children()
            .iter()
            .all(|&d| matches!(arena.node(d).kind(), NodeKind::Aggregate { .. }));
        let binomial = view.stochastic_children().iter().all(|&c| {
            let params = arena.node(c).params();
            ConjugateDist::of(arena, c) == ConjugateDist::Bin
                && view.is_dependent(params[1])
                && !view.is_dependent(params[0])
        });
        if !subsets_only || !binomial {
            return None;
        }
        Self::make_index(view, state).map(|index| Self { index })
    }

    /// Set the target to `0` and then to `1..=n`: each child's size must
    /// follow exactly one element, and no two children may share one.
    fn make_index(view: &GraphView, state: &mut ChainState) -> Option<Vec<usize>> {
        let n = view.length();
        let x0 = view.value_vec(state);

        view.set_value(&vec![0.0; n], state);
        let offset_free = view
            .stochastic_children()
            .iter()
            .all(|&c| child_size(view, state, c) == 0.0);

        let ranks: Vec<f64> = (1..=n).map(|i| i as f64).collect();
        view.set_value(&ranks, state);
        let mut used = vec![false; n];
        let mut index = Vec::with_capacity(view.stochastic_children().len());
        for &c in view.stochastic_children() {
            let s = child_size(view, state, c);
            let k = s as usize;
            if s != k as f64 || k == 0 || k > n || used[k - 1] {
                break;
            }
            used[k - 1] = true;
            index.push(k - 1);
        }

        view.set_value(&x0, state);
        (offset_free && index.len() == view.stochastic_children().len()).then_some(index)
    }
}

impl ConjugateMethod for ShiftedMultinomial {
    fn name(&self) -> &'static str {
        "bugs::ShiftedMultinomial"
    }

    fn update(
        &self,
        view: &GraphView,
        state: &mut ChainState,
        rng: &mut ChainRng,
        _ws: &mut Workspace,
    ) -> Result<()> {
        let arena = view.arena();
        let id = view.node();
        let params = arena.node(id).params();
        let mut prob = state.value(params[0]).to_vec();
        let mut remaining = state.value(params[1])[0];
        let mut y = vec![0.0; prob.len()];

        for (&c, &j) in view.stochastic_children().iter().zip(&self.index) {
            let q = state.value(arena.node(c).params()[0])[0];
            prob[j] *= 1.0 - q;
            y[j] = state.value(c)[0];
            remaining -= y[j];
        }
        if remaining < 0.0 {
            return Err(view.node_error(id, "observed counts exceed multinomial size"));
        }
        if remaining > 0.0 && prob.iter().sum::<f64>() <= 0.0 {
            return Err(view.node_error(id, "no probability mass for remaining counts"));
        }

        let mut shift = vec![0.0; y.len()];
        multinomial_sample(&mut shift, remaining, &prob, rng);
        for (v, s) in y.iter_mut().zip(&shift) {
            *v += s;
        }
        view.set_value(&y, state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conjugate::testing::conjugate;
    use crate::distributions::{Bin, Multi};
    use crate::graph::GraphBuilder;
    use crate::sampler::testing::chains;
    use std::sync::Arc;

    #[test]
    fn test_shifted_draws() {
        let mut b = GraphBuilder::new();
        let p = b.add_constant("p", vec![3], vec![0.2, 0.3, 0.5]).unwrap();
        let total = b.scalar("N", 20.0).unwrap();
        let half = b.scalar("half", 0.5).unwrap();
        let x = b.add_stochastic("x", Arc::new(Multi), &[p, total], None, None).unwrap();
        for (i, y) in [2.0, 3.0, 4.0].into_iter().enumerate() {
            let xi = b.add_subset(&format!("x[{}]", i + 1), x, [i]).unwrap();
            b.add_observed(&format!("y[{}]", i + 1), Arc::new(Bin), &[half, xi], None, None, vec![y])
                .unwrap();
        }
        let arena = Arc::new(b.finish());
        let (mut sampler, mut state, mut rngs) = conjugate(&arena, x, 1, 21);
        assert_eq!(sampler.name(), "bugs::ShiftedMultinomial");

        // x = y + Multinomial(11, p / 2)
        let n = 5_000;
        let mut sum = [0.0; 3];
        for _ in 0..n {
            sampler.update(&mut state.chains, &mut rngs).unwrap();
            let v = state.chains[0].value(x);
            assert_eq!(v.iter().sum::<f64>(), 20.0);
            assert!(v[0] >= 2.0 && v[1] >= 3.0 && v[2] >= 4.0, "draw {:?}", v);
            for (s, v) in sum.iter_mut().zip(v) {
                *s += v;
            }
        }
        for (i, expected) in [4.2, 6.3, 9.5].into_iter().enumerate() {
            let m = sum[i] / n as f64;
            assert!((m - expected).abs() < 0.1, "x[{}] mean {} expected {}", i + 1, m, expected);
        }
    }

    #[test]
    fn test_shared_element_rejected() {
        let mut b = GraphBuilder::new();
        let p = b.add_constant("p", vec![2], vec![0.5, 0.5]).unwrap();
        let total = b.scalar("N", 10.0).unwrap();
        let half = b.scalar("half", 0.5).unwrap();
        let x = b.add_stochastic("x", Arc::new(Multi), &[p, total], None, None).unwrap();
        let x1 = b.add_subset("x[1]", x, [0]).unwrap();
        b.add_observed("y1", Arc::new(Bin), &[half, x1], None, None, vec![1.0]).unwrap();
        b.add_observed("y2", Arc::new(Bin), &[half, x1], None, None, vec![1.0]).unwrap();
        let arena = Arc::new(b.finish());
        let view = GraphView::new(&[x], &arena.full_graph(), &arena).unwrap();
        let (mut states, _) = chains(&arena, 1, 0);
        let before = states[0].value(x).to_vec();
        assert!(ShiftedMultinomial::new(&view, &mut states[0]).is_none());
        assert_eq!(states[0].value(x), before.as_slice());
    }
}
