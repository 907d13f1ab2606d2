use super::{children_unbounded, Coefficients, ConjugateDist, ConjugateMethod, Workspace};
use crate::error::Result;
use crate::graph::closure::{check_scale, ClosureClass};
use crate::graph::{ChainState, GraphView, NodeArena, NodeId};
use crate::rng::ChainRng;
use rand_distr::Distribution as _;

/// Gamma or exponential prior on a rate or precision.
///
/// Children may be normal (through the precision), Poisson or exponential
/// (through the rate), or gamma (through the rate), each reached by a
/// scale transform of the target.
#[derive(Debug, Clone)]
pub struct ConjugateGamma {
    coef: Coefficients,
}

/// Index of the child parameter the target scales.
fn scaled_param(arena: &NodeArena, child: NodeId) -> Option<usize> {
    match ConjugateDist::of(arena, child) {
        ConjugateDist::Norm | ConjugateDist::Gamma => Some(1),
        ConjugateDist::Pois | ConjugateDist::Exp => Some(0),
        _ => None,
    }
}

impl ConjugateGamma {
    pub fn can_sample(view: &GraphView) -> bool {
        let arena = view.arena();
        if view.length() != 1 || arena.node(view.node()).is_bounded() {
            return false;
        }
        let ok = view.stochastic_children().iter().all(|&c| {
            let params = arena.node(c).params();
            match scaled_param(arena, c) {
                // the other parameter of a two-parameter child must not move
                Some(k) => params
                    .iter()
                    .enumerate()
                    .all(|(i, &p)| i == k || !view.is_dependent(p)),
                None => false,
            }
        });
        ok && children_unbounded(view) && check_scale(view, false)
    }

    pub fn new(view: &GraphView, state: &mut ChainState) -> Self {
        let arena = view.arena();
        let params = view
            .stochastic_children()
            .iter()
            .map(|&c| scaled_param(arena, c).unwrap_or(0))
            .collect();
        Self {
            coef: Coefficients::new(view, state, params, ClosureClass::Scale),
        }
    }

    /// Shape and rate of the full conditional.
    pub fn posterior(&self, view: &GraphView, state: &mut ChainState, ws: &mut Workspace) -> Result<(f64, f64)> {
        let arena = view.arena();
        let id = view.node();
        let params = arena.node(id).params();
        let (mut shape, mut rate) = match ConjugateDist::of(arena, id) {
            ConjugateDist::Exp => (1.0, state.value(params[0])[0]),
            _ => (state.value(params[0])[0], state.value(params[1])[0]),
        };

        let coef = self.coef.get(view, state, ws);
        for (j, &c) in view.stochastic_children().iter().enumerate() {
            let scale = coef.map_or(1.0, |coef| coef[j]);
            if scale == 0.0 {
                continue;
            }
            let cp = arena.node(c).params();
            let y = state.value(c)[0];
            match ConjugateDist::of(arena, c) {
                ConjugateDist::Norm => {
                    let m = state.value(cp[0])[0];
                    shape += 0.5;
                    rate += 0.5 * scale * (y - m) * (y - m);
                }
                ConjugateDist::Pois => {
                    shape += y;
                    rate += scale;
                }
                ConjugateDist::Exp => {
                    shape += 1.0;
                    rate += scale * y;
                }
                ConjugateDist::Gamma => {
                    shape += state.value(cp[0])[0];
                    rate += scale * y;
                }
                _ => return Err(view.node_error(c, "unexpected child of gamma conjugate node")),
            }
        }
        Ok((shape, rate))
    }
}

impl ConjugateMethod for ConjugateGamma {
    fn name(&self) -> &'static str {
        "bugs::ConjugateGamma"
    }

    fn update(
        &self,
        view: &GraphView,
        state: &mut ChainState,
        rng: &mut ChainRng,
        ws: &mut Workspace,
    ) -> Result<()> {
        let (shape, rate) = self.posterior(view, state, ws)?;
        let dist = rand_distr::Gamma::new(shape, 1.0 / rate)
            .map_err(|_| view.node_error(view.node(), "invalid posterior gamma parameters"))?;
        let x = dist.sample(rng);
        view.set_value(&[x], state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conjugate::testing::{conjugate, mean};
    use crate::distributions::{Exp, Gamma, Norm, Pois};
    use crate::function::Multiply;
    use crate::graph::GraphBuilder;
    use crate::sampler::testing::trace;
    use std::sync::Arc;

    #[test]
    fn test_normal_precision() {
        let mut b = GraphBuilder::new();
        let zero = b.scalar("zero", 0.0).unwrap();
        let one = b.scalar("one", 1.0).unwrap();
        let two = b.scalar("two", 2.0).unwrap();
        let tau = b.add_stochastic("tau", Arc::new(Gamma), &[two, one], None, None).unwrap();
        for (i, y) in [1.0, -2.0, 0.5].into_iter().enumerate() {
            b.add_observed(&format!("y{}", i), Arc::new(Norm), &[zero, tau], None, None, vec![y])
                .unwrap();
        }
        let arena = Arc::new(b.finish());
        let (mut sampler, mut state, mut rngs) = conjugate(&arena, tau, 1, 4);

        // shape 2 + 3/2, rate 1 + (1 + 4 + 0.25) / 2
        let draws = trace(sampler.as_mut(), &mut state.chains, &mut rngs, tau, 20_000).remove(0);
        let expected = 3.5 / 3.625;
        assert!((mean(&draws) - expected).abs() < 0.02, "mean {} expected {}", mean(&draws), expected);
    }

    #[test]
    fn test_scaled_poisson_rate() {
        // y ~ dpois(2 * lambda), lambda ~ dexp(1)
        let mut b = GraphBuilder::new();
        let one = b.scalar("one", 1.0).unwrap();
        let two = b.scalar("two", 2.0).unwrap();
        let lambda = b.add_stochastic("lambda", Arc::new(Exp), &[one], None, None).unwrap();
        let rate = b.add_logical("rate", Arc::new(Multiply), &[two, lambda]).unwrap();
        let _y = b.add_observed("y", Arc::new(Pois), &[rate], None, None, vec![5.0]).unwrap();
        let arena = Arc::new(b.finish());
        let (mut sampler, mut state, mut rngs) = conjugate(&arena, lambda, 1, 5);

        // Gamma(1 + 5, 1 + 2)
        let draws = trace(sampler.as_mut(), &mut state.chains, &mut rngs, lambda, 20_000).remove(0);
        assert!((mean(&draws) - 2.0).abs() < 0.03, "mean {}", mean(&draws));
    }

    #[test]
    fn test_offset_breaks_scale() {
        use crate::function::Add;
        let mut b = GraphBuilder::new();
        let one = b.scalar("one", 1.0).unwrap();
        let lambda = b.add_stochastic("lambda", Arc::new(Exp), &[one], None, None).unwrap();
        let rate = b.add_logical("rate", Arc::new(Add), &[one, lambda]).unwrap();
        let _y = b.add_observed("y", Arc::new(Pois), &[rate], None, None, vec![5.0]).unwrap();
        let arena = Arc::new(b.finish());
        let view = GraphView::new(&[lambda], &arena.full_graph(), &arena).unwrap();
        assert!(!ConjugateGamma::can_sample(&view));
    }
}
