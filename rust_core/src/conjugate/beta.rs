use super::{children_unbounded, ConjugateDist, ConjugateMethod, Workspace};
use crate::error::Result;
use crate::graph::{ChainState, GraphView};
use crate::rng::ChainRng;
use rand_distr::Distribution as _;

/// Beta prior on the success probability of Bernoulli or binomial children.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConjugateBeta;

impl ConjugateBeta {
    pub fn can_sample(view: &GraphView) -> bool {
        let arena = view.arena();
        let id = view.node();
        if arena.node(id).is_bounded() || !view.deterministic_children().is_empty() {
            return false;
        }
        let ok = view.stochastic_children().iter().all(|&c| {
            let params = arena.node(c).params();
            match ConjugateDist::of(arena, c) {
                ConjugateDist::Bern => params[0] == id,
                ConjugateDist::Bin => params[0] == id && !view.is_dependent(params[1]),
                _ => false,
            }
        });
        ok && children_unbounded(view)
    }
}

impl ConjugateMethod for ConjugateBeta {
    fn name(&self) -> &'static str {
        "bugs::ConjugateBeta"
    }

    fn update(
        &self,
        view: &GraphView,
        state: &mut ChainState,
        rng: &mut ChainRng,
        _ws: &mut Workspace,
    ) -> Result<()> {
        let arena = view.arena();
        let params = arena.node(view.node()).params();
        let mut a = state.value(params[0])[0];
        let mut b = state.value(params[1])[0];
        for &c in view.stochastic_children() {
            let y = state.value(c)[0];
            let size = match ConjugateDist::of(arena, c) {
                ConjugateDist::Bin => state.value(arena.node(c).params()[1])[0],
                _ => 1.0,
            };
            a += y;
            b += size - y;
        }
        let dist = rand_distr::Beta::new(a, b)
            .map_err(|_| view.node_error(view.node(), "invalid posterior beta parameters"))?;
        let p = dist.sample(rng);
        view.set_value(&[p], state);
        Ok(())
    }
}
