use super::{children_unbounded, ConjugateDist, ConjugateMethod, Workspace};
use crate::distributions::wishart_sample;
use crate::error::Result;
use crate::graph::{ChainState, GraphView};
use crate::rng::ChainRng;
use nalgebra::{DMatrix, DVector};

/// Wishart prior on the precision of multivariate normal children.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConjugateWishart;

impl ConjugateWishart {
    pub fn can_sample(view: &GraphView) -> bool {
        let arena = view.arena();
        let id = view.node();
        if arena.node(id).is_bounded() || !view.deterministic_children().is_empty() {
            return false;
        }
        let ok = view.stochastic_children().iter().all(|&c| {
            let params = arena.node(c).params();
            ConjugateDist::of(arena, c) == ConjugateDist::MNorm
                && params[1] == id
                && !view.is_dependent(params[0])
        });
        ok && children_unbounded(view)
    }
}

impl ConjugateMethod for ConjugateWishart {
    fn name(&self) -> &'static str {
        "bugs::ConjugateWishart"
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
        let p = arena.node(id).dim()[0];
        let mut r = DMatrix::from_column_slice(p, p, state.value(params[0]));
        let mut k = state.value(params[1])[0];

        for &c in view.stochastic_children() {
            let y = state.value(c);
            let mu = state.value(arena.node(c).params()[0]);
            let delta = DVector::from_iterator(p, y.iter().zip(mu).map(|(y, mu)| y - mu));
            r += &delta * delta.transpose();
            k += 1.0;
        }

        let w = wishart_sample(&r, k, rng)
            .ok_or_else(|| view.node_error(id, "posterior scale matrix is not positive definite"))?;
        view.set_value(w.as_slice(), state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conjugate::testing::conjugate;
    use crate::distributions::{MNorm, Wish};
    use crate::graph::GraphBuilder;
    use std::sync::Arc;

    #[test]
    fn test_posterior_mean() {
        let mut b = GraphBuilder::new();
        let zero = b.add_constant("zero", vec![2], vec![0.0, 0.0]).unwrap();
        let r = b.add_constant("R", vec![2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let k = b.scalar("k", 3.0).unwrap();
        let omega = b.add_stochastic("omega", Arc::new(Wish), &[r, k], None, None).unwrap();
        b.add_observed("y1", Arc::new(MNorm), &[zero, omega], None, None, vec![1.0, 0.0])
            .unwrap();
        b.add_observed("y2", Arc::new(MNorm), &[zero, omega], None, None, vec![0.0, 2.0])
            .unwrap();
        let arena = Arc::new(b.finish());
        let (mut sampler, mut state, mut rngs) = conjugate(&arena, omega, 1, 12);
        assert_eq!(sampler.name(), "bugs::ConjugateWishart");

        // R' = diag(2, 5), k' = 5, E = k' R'^{-1}
        let n = 10_000;
        let mut sum = [0.0; 4];
        for _ in 0..n {
            sampler.update(&mut state.chains, &mut rngs).unwrap();
            for (s, v) in sum.iter_mut().zip(state.chains[0].value(omega)) {
                *s += v;
            }
        }
        let m: Vec<f64> = sum.iter().map(|s| s / n as f64).collect();
        assert!((m[0] - 2.5).abs() < 0.1, "mean {:?}", m);
        assert!((m[3] - 1.0).abs() < 0.05, "mean {:?}", m);
        assert!(m[1].abs() < 0.05, "mean {:?}", m);
    }
}
