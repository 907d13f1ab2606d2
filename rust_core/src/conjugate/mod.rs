//! Closed-form updates for nodes whose full conditional belongs to the same
//! family as their prior.
//!
//! Every method here draws directly from the full conditional, so none of
//! them adapt. Scratch space for coefficient probing lives in a
//! [`Workspace`] owned by each chain.

mod beta;
mod censored;
mod gamma;
mod mnormal;
mod multinomial;
mod normal;
mod wishart;

pub use beta::ConjugateBeta;
pub use censored::Censored;
pub use gamma::ConjugateGamma;
pub use mnormal::ConjugateMNormal;
pub use multinomial::ShiftedMultinomial;
pub use normal::ConjugateNormal;
pub use wishart::ConjugateWishart;

use crate::error::Result;
use crate::graph::closure::{check_linear, check_scale, linear_coefficients, ClosureClass};
use crate::graph::{ChainState, Graph, GraphView, NodeArena, NodeId};
use crate::rng::ChainRng;
use crate::sampler::{guarded, ModelState, Sampler, SamplerFactory};
use rayon::prelude::*;

/// Distribution families recognized by the conjugate methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConjugateDist {
    Bern,
    Beta,
    Bin,
    Exp,
    Gamma,
    Interval,
    MNorm,
    Multi,
    Norm,
    Pois,
    Wish,
    Other,
}

impl ConjugateDist {
    pub fn of(arena: &NodeArena, id: NodeId) -> Self {
        match arena.node(id).dist_name() {
            Some("dbern") => Self::Bern,
            Some("dbeta") => Self::Beta,
            Some("dbin") => Self::Bin,
            Some("dexp") => Self::Exp,
            Some("dgamma") => Self::Gamma,
            Some("dinterval") => Self::Interval,
            Some("dmnorm") => Self::MNorm,
            Some("dmulti") => Self::Multi,
            Some("dnorm") => Self::Norm,
            Some("dpois") => Self::Pois,
            Some("dwish") => Self::Wish,
            _ => Self::Other,
        }
    }
}

/// Per-chain scratch buffers.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub coef: Vec<f64>,
}

pub trait ConjugateMethod: Send + Sync {
    fn name(&self) -> &'static str;

    fn update(
        &self,
        view: &GraphView,
        state: &mut ChainState,
        rng: &mut ChainRng,
        ws: &mut Workspace,
    ) -> Result<()>;
}

/// Coefficients linking the target to one parameter of each stochastic
/// child.
#[derive(Debug, Clone)]
pub(crate) enum Coefficients {
    /// Children take the target directly as the parameter.
    Identity,
    /// Measured once at construction.
    Fixed(Vec<f64>),
    /// Measured again on every update; holds the parameter index per child.
    Varying(Vec<usize>),
}

impl Coefficients {
    pub(crate) fn new(
        view: &GraphView,
        state: &mut ChainState,
        params: Vec<usize>,
        class: ClosureClass,
    ) -> Self {
        if view.deterministic_children().is_empty() {
            return Self::Identity;
        }
        let fixed = match class {
            ClosureClass::Linear => check_linear(view, true),
            ClosureClass::Scale => check_scale(view, true),
        };
        if fixed {
            let mut coef = Vec::new();
            linear_coefficients(view, state, &params, &mut coef);
            Self::Fixed(coef)
        } else {
            Self::Varying(params)
        }
    }

    /// Current coefficients, or `None` for the identity.
    pub(crate) fn get<'a>(
        &'a self,
        view: &GraphView,
        state: &mut ChainState,
        ws: &'a mut Workspace,
    ) -> Option<&'a [f64]> {
        match self {
            Self::Identity => None,
            Self::Fixed(coef) => Some(coef),
            Self::Varying(params) => {
                linear_coefficients(view, state, params, &mut ws.coef);
                Some(&ws.coef)
            }
        }
    }
}

/// No stochastic child of the view is truncated.
pub(crate) fn children_unbounded(view: &GraphView) -> bool {
    let arena = view.arena();
    view.stochastic_children()
        .iter()
        .all(|&c| !arena.node(c).is_bounded())
}

/// A conjugate method driving every chain, each with its own workspace.
pub struct ConjugateSampler {
    view: GraphView,
    method: Box<dyn ConjugateMethod>,
    workspaces: Vec<Workspace>,
}

impl ConjugateSampler {
    pub fn new(view: GraphView, method: Box<dyn ConjugateMethod>, num_chains: usize) -> Self {
        Self {
            view,
            method,
            workspaces: vec![Workspace::default(); num_chains],
        }
    }
}

impl Sampler for ConjugateSampler {
    fn name(&self) -> &str {
        self.method.name()
    }

    fn view(&self) -> &GraphView {
        &self.view
    }

    fn update(&mut self, chains: &mut [ChainState], rngs: &mut [ChainRng]) -> Result<()> {
        let view = &self.view;
        let method = self.method.as_ref();
        self.workspaces
            .par_iter_mut()
            .zip(chains.par_iter_mut())
            .zip(rngs.par_iter_mut())
            .enumerate()
            .try_for_each(|(chain, ((ws, state), rng))| {
                guarded(view, state, chain, |state| method.update(view, state, rng, ws))
            })
    }

    fn is_adaptive(&self) -> bool {
        false
    }

    fn adapt_off(&mut self) {}

    fn check_adaptation(&self) -> bool {
        true
    }
}

/// Chooses a closed-form method for single stochastic nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConjugateFactory;

impl ConjugateFactory {
    fn method_for(view: &GraphView, state: &mut ModelState) -> Option<Box<dyn ConjugateMethod>> {
        let id = view.node();
        let chain0 = state.chains.first_mut()?;
        let censored = || Censored::can_sample(view).then(|| Box::new(Censored) as Box<dyn ConjugateMethod>);
        match ConjugateDist::of(view.arena(), id) {
            ConjugateDist::Norm if ConjugateNormal::can_sample(view) => {
                Some(Box::new(ConjugateNormal::new(view, chain0)))
            }
            ConjugateDist::MNorm if ConjugateMNormal::can_sample(view) => {
                Some(Box::new(ConjugateMNormal::new(view, chain0)))
            }
            ConjugateDist::Beta if ConjugateBeta::can_sample(view) => Some(Box::new(ConjugateBeta)),
            ConjugateDist::Gamma | ConjugateDist::Exp if ConjugateGamma::can_sample(view) => {
                Some(Box::new(ConjugateGamma::new(view, chain0)))
            }
            ConjugateDist::Wish if ConjugateWishart::can_sample(view) => Some(Box::new(ConjugateWishart)),
            ConjugateDist::Multi => {
                ShiftedMultinomial::new(view, chain0).map(|m| Box::new(m) as Box<dyn ConjugateMethod>)
            }
            _ => censored(),
        }
    }
}

impl SamplerFactory for ConjugateFactory {
    fn name(&self) -> &str {
        "bugs::Conjugate"
    }

    fn can_sample(&self, nodes: &[NodeId], graph: &Graph, state: &mut ModelState) -> bool {
        let [id] = nodes else { return false };
        let node = state.arena.node(*id);
        if !graph.contains(*id) || !node.is_stochastic() || node.is_observed() {
            return false;
        }
        match GraphView::new(nodes, graph, &state.arena) {
            Ok(view) => Self::method_for(&view, state).is_some(),
            Err(_) => false,
        }
    }

    fn make_sampler(
        &self,
        nodes: &[NodeId],
        graph: &Graph,
        state: &mut ModelState,
    ) -> Result<Option<Box<dyn Sampler>>> {
        let view = GraphView::new(nodes, graph, &state.arena)?;
        let num_chains = state.num_chains();
        Ok(Self::method_for(&view, state)
            .map(|method| Box::new(ConjugateSampler::new(view, method, num_chains)) as Box<dyn Sampler>))
    }
}
