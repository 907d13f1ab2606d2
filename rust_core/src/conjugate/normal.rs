use super::{children_unbounded, Coefficients, ConjugateDist, ConjugateMethod, Workspace};
use crate::error::Result;
use crate::graph::closure::{check_linear, ClosureClass};
use crate::graph::{ChainState, GraphView};
use crate::rng::{normal, ChainRng};
use nalgebra::{DMatrix, DVector};

/// Children are normal or multivariate normal, unbounded, with the target
/// reaching them only through their mean along a linear path.
pub(crate) fn normal_children(view: &GraphView) -> bool {
    let arena = view.arena();
    let ok = view.stochastic_children().iter().all(|&c| {
        matches!(ConjugateDist::of(arena, c), ConjugateDist::Norm | ConjugateDist::MNorm)
            && !view.is_dependent(arena.node(c).params()[1])
    });
    ok && children_unbounded(view) && check_linear(view, false)
}

/// Add the likelihood terms of normal children to the posterior precision
/// `a` and the shift `b`, centered at the current target value.
///
/// For each child with mean `mu + beta (x' - x)` and precision `T`, this adds
/// `beta' T beta` to `a` and `beta' T (y - mu)` to `b`.
pub(crate) fn accumulate_children(
    view: &GraphView,
    state: &ChainState,
    coef: Option<&[f64]>,
    a: &mut DMatrix<f64>,
    b: &mut DVector<f64>,
) {
    let arena = view.arena();
    let n = view.length();
    let mut offset = 0;
    for &c in view.stochastic_children() {
        let params = arena.node(c).params();
        let y = state.value(c);
        let mu = state.value(params[0]);
        let m = y.len();
        let t = DMatrix::from_column_slice(m, m, state.value(params[1]));
        let beta = match coef {
            Some(coef) => DMatrix::from_fn(m, n, |k, i| coef[offset + n * k + i]),
            None => DMatrix::identity(m, n),
        };
        offset += m * n;
        let r = DVector::from_iterator(m, y.iter().zip(mu).map(|(y, mu)| y - mu));
        let bt = beta.transpose() * t;
        *a += &bt * &beta;
        *b += bt * r;
    }
}

/// Normal prior with normal children.
#[derive(Debug, Clone)]
pub struct ConjugateNormal {
    coef: Coefficients,
}

impl ConjugateNormal {
    pub fn can_sample(view: &GraphView) -> bool {
        let arena = view.arena();
        view.length() == 1 && !arena.node(view.node()).is_bounded() && normal_children(view)
    }

    pub fn new(view: &GraphView, state: &mut ChainState) -> Self {
        let params = vec![0; view.stochastic_children().len()];
        Self {
            coef: Coefficients::new(view, state, params, ClosureClass::Linear),
        }
    }

    /// Mean and precision of the full conditional.
    pub fn posterior(&self, view: &GraphView, state: &mut ChainState, ws: &mut Workspace) -> Result<(f64, f64)> {
        let id = view.node();
        let params = view.arena().node(id).params();
        let x = state.value(id)[0];
        let mu0 = state.value(params[0])[0];
        let tau0 = state.value(params[1])[0];

        let mut a = DMatrix::from_element(1, 1, tau0);
        let mut b = DVector::from_element(1, tau0 * (mu0 - x));
        let coef = self.coef.get(view, state, ws);
        accumulate_children(view, state, coef, &mut a, &mut b);

        let precision = a[(0, 0)];
        if !(precision > 0.0) || !precision.is_finite() {
            return Err(view.node_error(id, "non-positive posterior precision"));
        }
        Ok((x + b[0] / precision, precision))
    }
}

impl ConjugateMethod for ConjugateNormal {
    fn name(&self) -> &'static str {
        "bugs::ConjugateNormal"
    }

    fn update(
        &self,
        view: &GraphView,
        state: &mut ChainState,
        rng: &mut ChainRng,
        ws: &mut Workspace,
    ) -> Result<()> {
        let (mean, precision) = self.posterior(view, state, ws)?;
        let x = mean + normal(rng) / precision.sqrt();
        view.set_value(&[x], state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conjugate::testing::{conjugate, mean};
    use crate::distributions::Norm;
    use crate::function::{Add, Multiply};
    use crate::graph::GraphBuilder;
    use crate::sampler::testing::{chains, trace};
    use std::sync::Arc;

    #[test]
    fn test_posterior_is_exact() {
        let (mu0, tau0) = (0.3, 2.0);
        for &(beta, tau1, y) in &[(2.5, 1.0, 3.0), (-1.0, 4.0, 0.2), (0.5, 0.25, -7.0)] {
            // y ~ dnorm(beta * x + 1, tau1)
            let mut b = GraphBuilder::new();
            let m0 = b.scalar("mu0", mu0).unwrap();
            let t0 = b.scalar("tau0", tau0).unwrap();
            let bt = b.scalar("beta", beta).unwrap();
            let one = b.scalar("one", 1.0).unwrap();
            let t1 = b.scalar("tau1", tau1).unwrap();
            let x = b.add_stochastic("x", Arc::new(Norm), &[m0, t0], None, None).unwrap();
            let bx = b.add_logical("bx", Arc::new(Multiply), &[bt, x]).unwrap();
            let m = b.add_logical("m", Arc::new(Add), &[bx, one]).unwrap();
            let _y = b.add_observed("y", Arc::new(Norm), &[m, t1], None, None, vec![y]).unwrap();
            let arena = Arc::new(b.finish());
            let graph = arena.full_graph();
            let view = GraphView::new(&[x], &graph, &arena).unwrap();
            let (mut states, _) = chains(&arena, 1, 0);

            assert!(ConjugateNormal::can_sample(&view));
            let method = ConjugateNormal::new(&view, &mut states[0]);
            assert!(matches!(method.coef, Coefficients::Fixed(_)));
            let (mean, precision) = method
                .posterior(&view, &mut states[0], &mut Workspace::default())
                .unwrap();

            let expected_precision = tau0 + beta * beta * tau1;
            let expected_mean = (tau0 * mu0 + beta * tau1 * (y - 1.0)) / expected_precision;
            assert!((precision - expected_precision).abs() < 1e-10, "precision {}", precision);
            assert!((mean - expected_mean).abs() < 1e-10, "mean {} expected {}", mean, expected_mean);
        }
    }

    #[test]
    fn test_varying_coefficient_draws() {
        // y ~ dnorm(w * x, 1) with w stochastic: coefficients recomputed per update
        let mut b = GraphBuilder::new();
        let zero = b.scalar("zero", 0.0).unwrap();
        let one = b.scalar("one", 1.0).unwrap();
        let x = b.add_stochastic("x", Arc::new(Norm), &[zero, one], None, None).unwrap();
        let w = b.add_stochastic("w", Arc::new(Norm), &[one, one], None, None).unwrap();
        let wx = b.add_logical("wx", Arc::new(Multiply), &[w, x]).unwrap();
        let _y = b.add_observed("y", Arc::new(Norm), &[wx, one], None, None, vec![2.0]).unwrap();
        let arena = Arc::new(b.finish());
        let (mut sampler, mut state, mut rngs) = conjugate(&arena, x, 1, 3);
        state.chains[0].set(w, &[2.0]);
        arena.resample(wx, &mut state.chains[0]);

        // w = 2: precision 1 + 4 = 5, mean 2 * 2 / 5
        let draws = trace(sampler.as_mut(), &mut state.chains, &mut rngs, x, 20_000).remove(0);
        assert!((mean(&draws) - 0.8).abs() < 0.015, "mean {}", mean(&draws));
    }

    #[test]
    fn test_shared_parent_of_mean_and_precision_rejected() {
        let mut b = GraphBuilder::new();
        let zero = b.scalar("zero", 0.0).unwrap();
        let one = b.scalar("one", 1.0).unwrap();
        let x = b.add_stochastic("x", Arc::new(Norm), &[zero, one], None, None).unwrap();
        let xx = b.add_logical("xx", Arc::new(Multiply), &[x, x]).unwrap();
        let _y = b.add_observed("y", Arc::new(Norm), &[x, xx], None, None, vec![1.0]).unwrap();
        let arena = Arc::new(b.finish());
        let view = GraphView::new(&[x], &arena.full_graph(), &arena).unwrap();
        assert!(!ConjugateNormal::can_sample(&view));
    }
}
