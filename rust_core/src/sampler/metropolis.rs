use super::{ModelState, ParallelSampler, SampleMethod, Sampler, SamplerFactory};
use crate::config::MetropolisConfig;
use crate::error::Result;
use crate::graph::{ChainState, Graph, GraphView, NodeArena, NodeId};
use crate::rng::{normal, uniform, ChainRng};

/// Largest tolerated |logit(mean acceptance) - logit(target)| at the end of
/// adaptation.
const MAX_LOGIT_DEVIATION: f64 = 0.5;

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

// ── Step adaptation ─────────────────────────────────────────────────────────

/// Robbins-Monro tuning of a log step size toward a target acceptance rate.
///
/// The gain shrinks each time the acceptance rate crosses the target.
#[derive(Debug, Clone)]
pub struct StepAdapter {
    prob: f64,
    lstep: f64,
    above_target: bool,
    n: f64,
}

impl StepAdapter {
    pub fn new(step: f64, prob: f64) -> Self {
        Self {
            prob,
            lstep: step.ln(),
            above_target: true,
            n: 10.0,
        }
    }

    /// Update with the acceptance probability of the latest proposal and
    /// return the new step size.
    pub fn rescale(&mut self, p: f64) -> f64 {
        self.lstep += (p - self.prob) / self.n;
        if (p > self.prob) != self.above_target {
            self.above_target = !self.above_target;
            self.n += 1.0;
        }
        self.lstep.exp()
    }

    pub fn step_size(&self) -> f64 {
        self.lstep.exp()
    }

    pub fn logit_deviation(&self, p: f64) -> f64 {
        (logit(p) - logit(self.prob)).abs()
    }
}

/// Running mean of acceptance probabilities, weighted toward recent ones.
#[derive(Debug, Clone)]
pub(crate) struct AcceptanceMean {
    mean: f64,
    niter: f64,
}

impl AcceptanceMean {
    pub(crate) fn new() -> Self {
        Self {
            mean: 0.0,
            niter: 2.0,
        }
    }

    pub(crate) fn record(&mut self, p: f64) {
        self.mean += 2.0 * (p - self.mean) / self.niter;
        self.niter += 1.0;
    }

    pub(crate) fn converged(&self, adapter: &StepAdapter) -> bool {
        self.mean > 0.0
            && self.mean < 1.0
            && adapter.logit_deviation(self.mean) <= MAX_LOGIT_DEVIATION
    }
}

// ── Transforms ──────────────────────────────────────────────────────────────

/// Map from a (possibly bounded) support to the real line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Identity,
    Log { lower: f64 },
    NegLog { upper: f64 },
    Logit { lower: f64, upper: f64 },
}

impl Transform {
    pub fn from_support(lower: f64, upper: f64) -> Self {
        match (lower.is_finite(), upper.is_finite()) {
            (true, true) => Transform::Logit { lower, upper },
            (true, false) => Transform::Log { lower },
            (false, true) => Transform::NegLog { upper },
            (false, false) => Transform::Identity,
        }
    }

    /// One transform per element of a node, from its current support.
    pub fn for_node(arena: &NodeArena, id: NodeId, state: &ChainState) -> Vec<Self> {
        let (lower, upper) = arena.support(id, state);
        lower
            .iter()
            .zip(&upper)
            .map(|(&l, &u)| Self::from_support(l, u))
            .collect()
    }

    pub fn to_real(&self, x: f64) -> f64 {
        match *self {
            Transform::Identity => x,
            Transform::Log { lower } => (x - lower).ln(),
            Transform::NegLog { upper } => (upper - x).ln(),
            Transform::Logit { lower, upper } => logit((x - lower) / (upper - lower)),
        }
    }

    pub fn from_real(&self, y: f64) -> f64 {
        match *self {
            Transform::Identity => y,
            Transform::Log { lower } => lower + y.exp(),
            Transform::NegLog { upper } => upper - y.exp(),
            Transform::Logit { lower, upper } => lower + (upper - lower) / (1.0 + (-y).exp()),
        }
    }

    /// Log of |dx/dy| at `y`.
    pub fn log_jacobian(&self, y: f64) -> f64 {
        match *self {
            Transform::Identity => 0.0,
            Transform::Log { .. } | Transform::NegLog { .. } => y,
            Transform::Logit { lower, upper } => {
                (upper - lower).ln() - y.abs() - 2.0 * (1.0 + (-y.abs()).exp()).ln()
            }
        }
    }
}

/// One random-walk Metropolis step on the real-line scale, targeting
/// `log prior + power * log likelihood`. Returns the acceptance probability.
///
/// Draws one normal per element, then one uniform.
pub(crate) fn random_walk_step(
    view: &GraphView,
    state: &mut ChainState,
    rng: &mut ChainRng,
    transforms: &[Transform],
    step: f64,
    power: f64,
) -> Result<f64> {
    let x0 = view.value_vec(state);
    let y0: Vec<f64> = x0.iter().zip(transforms).map(|(&x, t)| t.to_real(x)).collect();
    let jac0: f64 = y0.iter().zip(transforms).map(|(&y, t)| t.log_jacobian(y)).sum();
    let lp0 = view.log_tempered(state, power)? + jac0;

    let y1: Vec<f64> = y0.iter().map(|&y| y + step * normal(rng)).collect();
    let x1: Vec<f64> = y1.iter().zip(transforms).map(|(&y, t)| t.from_real(y)).collect();
    let jac1: f64 = y1.iter().zip(transforms).map(|(&y, t)| t.log_jacobian(y)).sum();
    view.set_value(&x1, state);
    let lp1 = view.log_tempered(state, power)? + jac1;

    let mut prob = (lp1 - lp0).exp().min(1.0);
    if prob.is_nan() {
        prob = 0.0;
    }
    if uniform(rng) >= prob {
        view.set_value(&x0, state);
    }
    Ok(prob)
}

// ── Random-walk Metropolis ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RWMetropolis {
    adapter: StepAdapter,
    acceptance: AcceptanceMean,
    adapt: bool,
    transforms: Option<Vec<Transform>>,
}

impl RWMetropolis {
    pub fn new(config: &MetropolisConfig) -> Self {
        Self {
            adapter: StepAdapter::new(config.initial_step, config.target_accept),
            acceptance: AcceptanceMean::new(),
            adapt: true,
            transforms: None,
        }
    }

    pub fn step_size(&self) -> f64 {
        self.adapter.step_size()
    }

    /// A single step; returns the acceptance probability.
    pub fn step(&mut self, view: &GraphView, state: &mut ChainState, rng: &mut ChainRng) -> Result<f64> {
        let transforms = self
            .transforms
            .get_or_insert_with(|| Transform::for_node(view.arena(), view.node(), state));
        let p = random_walk_step(view, state, rng, transforms, self.adapter.step_size(), 1.0)?;
        if self.adapt {
            self.adapter.rescale(p);
            self.acceptance.record(p);
        }
        Ok(p)
    }
}

impl SampleMethod for RWMetropolis {
    fn update(&mut self, view: &GraphView, state: &mut ChainState, rng: &mut ChainRng) -> Result<()> {
        self.step(view, state, rng).map(|_| ())
    }
    fn is_adaptive(&self) -> bool {
        self.adapt
    }
    fn adapt_off(&mut self) {
        self.adapt = false;
    }
    fn check_adaptation(&self) -> bool {
        self.acceptance.converged(&self.adapter)
    }
}

/// Random-walk Metropolis for continuous nodes nothing else claimed,
/// notably vector-valued ones.
#[derive(Debug, Clone, Default)]
pub struct MetropolisFactory {
    config: MetropolisConfig,
}

impl MetropolisFactory {
    pub fn new(config: MetropolisConfig) -> Self {
        Self { config }
    }
}

impl SamplerFactory for MetropolisFactory {
    fn name(&self) -> &str {
        "base::Metropolis"
    }

    fn can_sample(&self, nodes: &[NodeId], graph: &Graph, state: &mut ModelState) -> bool {
        let [id] = nodes else { return false };
        let node = state.arena.node(*id);
        graph.contains(*id)
            && node.is_stochastic()
            && !node.is_observed()
            && !node.is_discrete()
            && state.arena.is_support_fixed(*id)
    }

    fn make_sampler(
        &self,
        nodes: &[NodeId],
        graph: &Graph,
        state: &mut ModelState,
    ) -> Result<Option<Box<dyn Sampler>>> {
        let view = GraphView::new(nodes, graph, &state.arena)?;
        let methods: Vec<Box<dyn SampleMethod>> = (0..state.num_chains())
            .map(|_| Box::new(RWMetropolis::new(&self.config)) as Box<dyn SampleMethod>)
            .collect();
        Ok(Some(Box::new(ParallelSampler::new(view, methods, "base::RWMetropolis"))))
    }
}
