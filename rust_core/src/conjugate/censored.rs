use super::{ConjugateDist, ConjugateMethod, Workspace};
use crate::error::Result;
use crate::graph::{ChainState, GraphView};
use crate::rng::ChainRng;
use std::slice;

/// Node observed only through an interval-censoring child: draw from the
/// prior truncated to the interval the child reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct Censored;

impl Censored {
    pub fn can_sample(view: &GraphView) -> bool {
        let arena = view.arena();
        let id = view.node();
        let node = arena.node(id);
        let can_bound = node.distribution().map_or(false, |d| d.can_bound());
        if !can_bound || node.is_bounded() || node.length() != 1 {
            return false;
        }
        if !view.deterministic_children().is_empty() {
            return false;
        }
        match view.stochastic_children() {
            [child] => {
                let params = arena.node(*child).params();
                ConjugateDist::of(arena, *child) == ConjugateDist::Interval
                    && params[0] == id
                    && !view.is_dependent(params[1])
            }
            _ => false,
        }
    }
}

impl ConjugateMethod for Censored {
    fn name(&self) -> &'static str {
        "bugs::Censored"
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
        let child = view.stochastic_children()[0];
        let y = state.value(child)[0];
        let cut = state.value(arena.node(child).params()[1]);
        let k = y as usize;
        if y < 0.0 || y != k as f64 || k > cut.len() {
            return Err(view.node_error(child, "interval index out of range"));
        }
        let lower = (k > 0).then(|| cut[k - 1]);
        let upper = (k < cut.len()).then(|| cut[k]);

        arena.truncated_sample(
            id,
            state,
            lower.as_ref().map(slice::from_ref),
            upper.as_ref().map(slice::from_ref),
            rng,
        );
        let draw = state.value(id)[0];
        if draw.is_nan() {
            return Err(view.node_error(id, "truncated sample failed"));
        }
        view.set_value(&[draw], state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conjugate::testing::{conjugate, mean};
    use crate::distributions::{Interval, Norm};
    use crate::function::Add;
    use crate::graph::GraphBuilder;
    use crate::sampler::testing::{chains, trace};
    use std::sync::Arc;

    #[test]
    fn test_draws_stay_in_interval() {
        let mut b = GraphBuilder::new();
        let zero = b.scalar("zero", 0.0).unwrap();
        let one = b.scalar("one", 1.0).unwrap();
        let cut = b.add_constant("cut", vec![2], vec![0.0, 1.0]).unwrap();
        let x = b.add_stochastic("x", Arc::new(Norm), &[zero, one], None, None).unwrap();
        let _y = b.add_observed("y", Arc::new(Interval), &[x, cut], None, None, vec![1.0]).unwrap();
        let arena = Arc::new(b.finish());
        let (mut sampler, mut state, mut rngs) = conjugate(&arena, x, 1, 2);
        assert_eq!(sampler.name(), "bugs::Censored");

        let draws = trace(sampler.as_mut(), &mut state.chains, &mut rngs, x, 10_000).remove(0);
        assert!(draws.iter().all(|&v| (0.0..=1.0).contains(&v)));
        // mean of N(0, 1) truncated to [0, 1]
        assert!((mean(&draws) - 0.4599).abs() < 0.02, "mean {}", mean(&draws));
    }

    #[test]
    fn test_draw_refreshes_descendants() {
        let mut b = GraphBuilder::new();
        let zero = b.scalar("zero", 0.0).unwrap();
        let one = b.scalar("one", 1.0).unwrap();
        let cut = b.add_constant("cut", vec![1], vec![0.0]).unwrap();
        let x = b.add_stochastic("x", Arc::new(Norm), &[zero, one], None, None).unwrap();
        let shifted = b.add_logical("shifted", Arc::new(Add), &[x, one]).unwrap();
        b.add_observed("y", Arc::new(Interval), &[x, cut], None, None, vec![1.0]).unwrap();
        let arena = Arc::new(b.finish());
        let view = GraphView::new(&[x], &arena.full_graph(), &arena).unwrap();
        assert!(!Censored::can_sample(&view));

        let (mut states, mut rngs) = chains(&arena, 1, 4);
        let mut ws = Workspace::default();
        for _ in 0..20 {
            Censored.update(&view, &mut states[0], &mut rngs[0], &mut ws).unwrap();
            let v = states[0].value(x)[0];
            assert!(v >= 0.0);
            assert_eq!(states[0].value(shifted)[0], v + 1.0);
        }
    }

    #[test]
    fn test_open_upper_interval() {
        let mut b = GraphBuilder::new();
        let zero = b.scalar("zero", 0.0).unwrap();
        let one = b.scalar("one", 1.0).unwrap();
        let cut = b.add_constant("cut", vec![1], vec![2.0]).unwrap();
        let x = b.add_stochastic("x", Arc::new(Norm), &[zero, one], None, None).unwrap();
        let _y = b.add_observed("y", Arc::new(Interval), &[x, cut], None, None, vec![1.0]).unwrap();
        let arena = Arc::new(b.finish());
        let (mut sampler, mut state, mut rngs) = conjugate(&arena, x, 1, 2);
        let draws = trace(sampler.as_mut(), &mut state.chains, &mut rngs, x, 2_000).remove(0);
        assert!(draws.iter().all(|&v| v >= 2.0));
    }
}
