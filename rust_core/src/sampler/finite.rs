use super::{ImmutableMethod, ImmutableSampler, ModelState, Sampler, SamplerFactory};
use crate::error::Result;
use crate::graph::{ChainState, Graph, GraphView, NodeId};
use crate::rng::{uniform, ChainRng};

/// Largest support the enumeration sampler will take on.
const MAX_SUPPORT: usize = 20;

/// Exact draw from the full conditional of a discrete scalar with a small,
/// fixed support, by enumerating every value.
#[derive(Debug, Clone)]
pub struct FiniteMethod {
    lower: i64,
    upper: i64,
}

impl FiniteMethod {
    pub fn new(lower: i64, upper: i64) -> Self {
        Self { lower, upper }
    }

    /// Whether `[lower, upper]` is a finite support the method can enumerate.
    pub fn can_enumerate(lower: f64, upper: f64) -> bool {
        if !lower.is_finite() || !upper.is_finite() {
            return false;
        }
        let size = upper - lower + 1.0;
        size > 1.0 && size <= MAX_SUPPORT as f64
    }
}

impl ImmutableMethod for FiniteMethod {
    fn update(&self, view: &GraphView, state: &mut ChainState, rng: &mut ChainRng) -> Result<()> {
        let size = (self.upper - self.lower + 1) as usize;
        let mut lik = Vec::with_capacity(size);
        for i in 0..size {
            view.set_value(&[(self.lower + i as i64) as f64], state);
            lik.push(view.log_full_conditional(state)?);
        }

        // Normalize on the log scale before exponentiating.
        let lmax = lik.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !lmax.is_finite() {
            return Err(view.node_error(view.node(), "cannot normalize density"));
        }
        let mut sum = 0.0;
        for l in lik.iter_mut() {
            *l = (*l - lmax).exp();
            sum += *l;
        }

        let mut u = uniform(rng) * sum;
        let mut pick = size - 1;
        for (i, p) in lik.iter().enumerate() {
            if u < *p {
                pick = i;
                break;
            }
            u -= p;
        }
        view.set_value(&[(self.lower + pick as i64) as f64], state);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FiniteFactory;

impl SamplerFactory for FiniteFactory {
    fn name(&self) -> &str {
        "base::Finite"
    }

    fn can_sample(&self, nodes: &[NodeId], graph: &Graph, state: &mut ModelState) -> bool {
        let [id] = nodes else { return false };
        let arena = &state.arena;
        let node = arena.node(*id);
        if !graph.contains(*id)
            || !node.is_stochastic()
            || node.is_observed()
            || !node.is_discrete()
            || node.length() != 1
            || !arena.is_support_fixed(*id)
        {
            return false;
        }
        let (l, u) = arena.support(*id, &state.chains[0]);
        FiniteMethod::can_enumerate(l[0], u[0])
    }

    fn make_sampler(
        &self,
        nodes: &[NodeId],
        graph: &Graph,
        state: &mut ModelState,
    ) -> Result<Option<Box<dyn Sampler>>> {
        let view = GraphView::new(nodes, graph, &state.arena)?;
        let (l, u) = state.arena.support(nodes[0], &state.chains[0]);
        let method = FiniteMethod::new(l[0] as i64, u[0] as i64);
        Ok(Some(Box::new(ImmutableSampler::new(view, Box::new(method), "base::Finite"))))
    }
}
