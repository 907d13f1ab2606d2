//! Sampler contract and the per-chain orchestration wrappers.
//!
//! A [`Sampler`] owns one [`GraphView`] and advances every chain by one MCMC
//! step per call. Chains share only the immutable arena, so each sampler
//! updates its chains in parallel with no synchronization.

pub mod dsum;
mod factory;
pub mod finite;
pub mod metropolis;
pub mod slice;
pub mod tempered;

pub use factory::{FactoryRegistry, SamplerFactory};

use crate::error::Result;
use crate::graph::{ChainState, GraphView, NodeArena, NodeId};
use crate::rng::ChainRng;
use rayon::prelude::*;
use std::sync::Arc;

/// Structure plus per-chain values, handed to factories during the
/// single-threaded assignment phase.
#[derive(Debug, Clone)]
pub struct ModelState {
    pub arena: Arc<NodeArena>,
    pub chains: Vec<ChainState>,
}

impl ModelState {
    pub fn num_chains(&self) -> usize {
        self.chains.len()
    }
}

pub trait Sampler: Send {
    fn name(&self) -> &str;
    fn view(&self) -> &GraphView;

    /// Advance every chain by one step, each with its own RNG.
    fn update(&mut self, chains: &mut [ChainState], rngs: &mut [ChainRng]) -> Result<()>;

    fn is_adaptive(&self) -> bool;
    /// End the adaptive phase. Irreversible.
    fn adapt_off(&mut self);
    /// Whether adaptation has reached its targets.
    fn check_adaptation(&self) -> bool;

    fn nodes(&self) -> &[NodeId] {
        self.view().nodes()
    }
}

/// Per-chain algorithm state for a [`ParallelSampler`].
pub trait SampleMethod: Send {
    fn update(&mut self, view: &GraphView, state: &mut ChainState, rng: &mut ChainRng) -> Result<()>;
    fn is_adaptive(&self) -> bool;
    fn adapt_off(&mut self);
    fn check_adaptation(&self) -> bool;
}

/// A fixed-form update shared by all chains.
pub trait ImmutableMethod: Send + Sync {
    fn update(&self, view: &GraphView, state: &mut ChainState, rng: &mut ChainRng) -> Result<()>;
}

/// Run `f` on one chain, restoring the targets if it fails.
pub(crate) fn guarded<F>(view: &GraphView, state: &mut ChainState, chain: usize, f: F) -> Result<()>
where
    F: FnOnce(&mut ChainState) -> Result<()>,
{
    let saved = view.value_vec(state);
    f(state).map_err(|e| {
        view.set_value(&saved, state);
        tracing::warn!(chain, node = view.arena().name(view.node()), error = %e, "update failed");
        e.in_chain(chain)
    })
}

// ── Parallel sampler ────────────────────────────────────────────────────────

/// One mutable method instance per chain.
pub struct ParallelSampler {
    view: GraphView,
    methods: Vec<Box<dyn SampleMethod>>,
    name: String,
}

impl ParallelSampler {
    pub fn new(view: GraphView, methods: Vec<Box<dyn SampleMethod>>, name: impl Into<String>) -> Self {
        Self {
            view,
            methods,
            name: name.into(),
        }
    }
}

impl Sampler for ParallelSampler {
    fn name(&self) -> &str {
        &self.name
    }

    fn view(&self) -> &GraphView {
        &self.view
    }

    fn update(&mut self, chains: &mut [ChainState], rngs: &mut [ChainRng]) -> Result<()> {
        let view = &self.view;
        self.methods
            .par_iter_mut()
            .zip(chains.par_iter_mut())
            .zip(rngs.par_iter_mut())
            .enumerate()
            .try_for_each(|(chain, ((method, state), rng))| {
                guarded(view, state, chain, |state| method.update(view, state, rng))
            })
    }

    fn is_adaptive(&self) -> bool {
        self.methods.iter().any(|m| m.is_adaptive())
    }

    fn adapt_off(&mut self) {
        for m in &mut self.methods {
            m.adapt_off();
        }
    }

    fn check_adaptation(&self) -> bool {
        self.methods.iter().all(|m| m.check_adaptation())
    }
}

// ── Immutable sampler ───────────────────────────────────────────────────────

/// Non-adaptive wrapper: a single method shared read-only by all chains.
pub struct ImmutableSampler {
    view: GraphView,
    method: Box<dyn ImmutableMethod>,
    name: String,
}

impl ImmutableSampler {
    pub fn new(view: GraphView, method: Box<dyn ImmutableMethod>, name: impl Into<String>) -> Self {
        Self {
            view,
            method,
            name: name.into(),
        }
    }
}

impl Sampler for ImmutableSampler {
    fn name(&self) -> &str {
        &self.name
    }

    fn view(&self) -> &GraphView {
        &self.view
    }

    fn update(&mut self, chains: &mut [ChainState], rngs: &mut [ChainRng]) -> Result<()> {
        let view = &self.view;
        let method = self.method.as_ref();
        chains
            .par_iter_mut()
            .zip(rngs.par_iter_mut())
            .enumerate()
            .try_for_each(|(chain, (state, rng))| {
                guarded(view, state, chain, |state| method.update(view, state, rng))
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

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::rng::chain_rngs;

    /// Chains and RNGs for an arena, with every unobserved node at its
    /// typical value and deterministic nodes evaluated.
    pub fn chains(arena: &Arc<NodeArena>, n: usize, seed: u64) -> (Vec<ChainState>, Vec<ChainRng>) {
        let order = arena.full_graph().sorted_nodes(arena).unwrap();
        let chains = (0..n)
            .map(|_| {
                let mut s = arena.new_chain_state();
                for &id in &order {
                    let node = arena.node(id);
                    if node.is_fixed() {
                        continue;
                    }
                    if node.is_stochastic() {
                        arena.typical_value(id, &mut s);
                    } else {
                        arena.resample(id, &mut s);
                    }
                }
                s
            })
            .collect();
        (chains, chain_rngs(seed, n))
    }

    /// Run `n` updates and collect the first element of `node` per chain.
    pub fn trace(
        sampler: &mut dyn Sampler,
        chains: &mut [ChainState],
        rngs: &mut [ChainRng],
        node: NodeId,
        n: usize,
    ) -> Vec<Vec<f64>> {
        let mut out = vec![Vec::with_capacity(n); chains.len()];
        for _ in 0..n {
            sampler.update(chains, rngs).unwrap();
            for (c, s) in chains.iter().enumerate() {
                out[c].push(s.value(node)[0]);
            }
        }
        out
    }
}
