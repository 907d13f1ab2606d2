//! Block updates for the stochastic parents of an observed `dsum` node.
//!
//! Once their sum is observed, no parent can move on its own. The sampler
//! claims all of them together and proposes moving an amount from one
//! parent to another, so every proposal keeps the sum.

use super::metropolis::{AcceptanceMean, StepAdapter};
use super::{ModelState, ParallelSampler, SampleMethod, Sampler, SamplerFactory};
use crate::config::MetropolisConfig;
use crate::error::Result;
use crate::graph::{ChainState, Graph, GraphView, NodeArena, NodeId};
use crate::rng::{normal, uniform, ChainRng};
use std::collections::HashSet;

const REAL_STEP: f64 = 0.1;
const DISCRETE_STEP: f64 = 1.0;

/// Uniform index in `0..n`.
fn pick(n: usize, rng: &mut ChainRng) -> usize {
    ((uniform(rng) * n as f64) as usize).min(n - 1)
}

/// Random-walk Metropolis over the parents of one `dsum` node.
#[derive(Debug, Clone)]
pub struct DSumMetropolis {
    discrete: bool,
    adapter: StepAdapter,
    acceptance: AcceptanceMean,
    adapt: bool,
}

impl DSumMetropolis {
    pub fn new(discrete: bool, config: &MetropolisConfig) -> Self {
        let step = if discrete { DISCRETE_STEP } else { REAL_STEP };
        Self {
            discrete,
            adapter: StepAdapter::new(step, config.target_accept),
            acceptance: AcceptanceMean::new(),
            adapt: true,
        }
    }

    /// Add a random amount to one element and take it from another.
    /// Integer moves are at least one in size.
    fn propose(&self, x: &mut [f64], rng: &mut ChainRng) {
        let n = x.len();
        let from = pick(n, rng);
        let mut to = pick(n - 1, rng);
        if to >= from {
            to += 1;
        }
        let eps = normal(rng) * self.adapter.step_size();
        let delta = if self.discrete { eps.abs().floor() + 1.0 } else { eps };
        x[from] += delta;
        x[to] -= delta;
    }
}

impl SampleMethod for DSumMetropolis {
    fn update(&mut self, view: &GraphView, state: &mut ChainState, rng: &mut ChainRng) -> Result<()> {
        let x0 = view.value_vec(state);
        let lp0 = view.log_full_conditional(state)?;
        if lp0 == f64::NEG_INFINITY {
            return Err(view.node_error(view.node(), "current value is inconsistent with data"));
        }
        let mut x1 = x0.clone();
        self.propose(&mut x1, rng);
        view.set_value(&x1, state);
        let lp1 = view.log_full_conditional(state)?;

        let mut prob = (lp1 - lp0).exp().min(1.0);
        if prob.is_nan() {
            prob = 0.0;
        }
        if uniform(rng) >= prob {
            view.set_value(&x0, state);
        }
        if self.adapt {
            self.adapter.rescale(prob);
            self.acceptance.record(prob);
        }
        Ok(())
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

/// The first observed `dsum` child of a node.
fn dsum_child(arena: &NodeArena, id: NodeId) -> Option<NodeId> {
    arena
        .node(id)
        .stochastic_children()
        .iter()
        .copied()
        .find(|&c| arena.node(c).is_observed() && arena.node(c).dist_name() == Some("dsum"))
}

/// Move the parents onto the observed sum if they are off it.
///
/// The whole difference goes to the first parent that can take it without
/// leaving the support. Failing that, the sum is split evenly.
fn satisfy_constraint(view: &GraphView, dsum: NodeId, state: &mut ChainState) -> Result<()> {
    let target = state.value(dsum)[0];
    let x0 = view.value_vec(state);
    let diff = target - x0.iter().sum::<f64>();
    if diff == 0.0 {
        return Ok(());
    }
    for i in 0..x0.len() {
        let mut x = x0.clone();
        x[i] += diff;
        view.set_value(&x, state);
        if view.log_full_conditional(state)? > f64::NEG_INFINITY {
            return Ok(());
        }
    }

    let n = x0.len();
    let discrete = view.arena().node(view.node()).is_discrete();
    let x: Vec<f64> = if discrete {
        let base = (target / n as f64).floor();
        let extra = (target - base * n as f64) as usize;
        (0..n).map(|i| if i < extra { base + 1.0 } else { base }).collect()
    } else {
        vec![target / n as f64; n]
    };
    view.set_value(&x, state);
    Ok(())
}

/// Claims the scalar stochastic parents of an observed `dsum` node as one
/// block.
#[derive(Debug, Clone, Default)]
pub struct DSumFactory {
    config: MetropolisConfig,
}

impl DSumFactory {
    pub fn new(config: MetropolisConfig) -> Self {
        Self { config }
    }
}

impl SamplerFactory for DSumFactory {
    fn name(&self) -> &str {
        "bugs::DSum"
    }

    /// `nodes` must be exactly the parameters of one observed scalar `dsum`
    /// node, all unobserved scalar stochastic nodes of the same kind.
    fn can_sample(&self, nodes: &[NodeId], graph: &Graph, state: &mut ModelState) -> bool {
        let arena = &state.arena;
        if nodes.len() < 2 || nodes.iter().collect::<HashSet<_>>().len() != nodes.len() {
            return false;
        }
        let discrete = arena.node(nodes[0]).is_discrete();
        let eligible = nodes.iter().all(|&id| {
            let node = arena.node(id);
            graph.contains(id)
                && node.is_stochastic()
                && !node.is_observed()
                && node.length() == 1
                && node.is_discrete() == discrete
        });
        eligible
            && dsum_child(arena, nodes[0]).map_or(false, |d| {
                arena.node(d).params() == nodes && arena.node(d).length() == 1 && graph.contains(d)
            })
    }

    fn make_sampler(
        &self,
        nodes: &[NodeId],
        graph: &Graph,
        state: &mut ModelState,
    ) -> Result<Option<Box<dyn Sampler>>> {
        let Some(dsum) = dsum_child(&state.arena, nodes[0]) else {
            return Ok(None);
        };
        let view = GraphView::new(nodes, graph, &state.arena)?;
        for chain in &mut state.chains {
            satisfy_constraint(&view, dsum, chain)?;
        }
        let discrete = state.arena.node(nodes[0]).is_discrete();
        let methods: Vec<Box<dyn SampleMethod>> = (0..state.num_chains())
            .map(|_| Box::new(DSumMetropolis::new(discrete, &self.config)) as Box<dyn SampleMethod>)
            .collect();
        let name = if discrete { "bugs::DiscreteDSum" } else { "bugs::RealDSum" };
        Ok(Some(Box::new(ParallelSampler::new(view, methods, name))))
    }

    /// Walk the pool for nodes with an observed `dsum` child and claim that
    /// child's parents together once all of them are still unclaimed.
    fn make_samplers(
        &self,
        pool: &[NodeId],
        graph: &Graph,
        state: &mut ModelState,
    ) -> Result<Vec<Box<dyn Sampler>>> {
        let available: HashSet<NodeId> = pool.iter().copied().collect();
        let mut claimed: HashSet<NodeId> = HashSet::new();
        let mut samplers = Vec::new();
        for &id in pool {
            if claimed.contains(&id) {
                continue;
            }
            let Some(dsum) = dsum_child(&state.arena, id) else {
                continue;
            };
            let block = state.arena.node(dsum).params().to_vec();
            if block.iter().any(|p| !available.contains(p) || claimed.contains(p)) {
                continue;
            }
            if !self.can_sample(&block, graph, state) {
                continue;
            }
            if let Some(sampler) = self.make_sampler(&block, graph, state)? {
                claimed.extend(block);
                samplers.push(sampler);
            }
        }
        Ok(samplers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{DSum, Norm, Pois};
    use crate::graph::GraphBuilder;
    use crate::sampler::testing::chains;
    use std::sync::Arc;

    /// Three parents of one observed `dsum`, either `dnorm(0, 1)` or
    /// `dpois(2)`.
    fn dsum_model(discrete: bool, total: f64) -> (Arc<NodeArena>, Vec<NodeId>, NodeId) {
        let mut b = GraphBuilder::new();
        let zero = b.scalar("zero", 0.0).unwrap();
        let one = b.scalar("one", 1.0).unwrap();
        let two = b.scalar("two", 2.0).unwrap();
        let parents: Vec<NodeId> = (0..3)
            .map(|i| {
                let name = format!("x{}", i);
                if discrete {
                    b.add_stochastic(&name, Arc::new(Pois), &[two], None, None)
                } else {
                    b.add_stochastic(&name, Arc::new(Norm), &[zero, one], None, None)
                }
                .unwrap()
            })
            .collect();
        let s = b.add_observed("s", Arc::new(DSum), &parents, None, None, vec![total]).unwrap();
        (Arc::new(b.finish()), parents, s)
    }

    fn block_sampler(
        arena: &Arc<NodeArena>,
        parents: &[NodeId],
        seed: u64,
    ) -> (Box<dyn Sampler>, ModelState, Vec<ChainRng>) {
        let (states, rngs) = chains(arena, 2, seed);
        let mut state = ModelState { arena: arena.clone(), chains: states };
        let graph = arena.full_graph();
        let factory = DSumFactory::default();
        let mut samplers = factory.make_samplers(parents, &graph, &mut state).unwrap();
        assert_eq!(samplers.len(), 1);
        let sampler = samplers.remove(0);
        assert_eq!(sampler.nodes(), parents);
        (sampler, state, rngs)
    }

    #[test]
    fn test_real_parents_keep_their_sum() {
        let (arena, parents, _) = dsum_model(false, 3.0);
        let (mut sampler, mut state, mut rngs) = block_sampler(&arena, &parents, 6);
        assert_eq!(sampler.name(), "bugs::RealDSum");

        // x | sum = 3 is normal with mean 1 and variance 2/3 per element
        let n = 20_000;
        let (mut sum, mut sum_sq) = (0.0, 0.0);
        for _ in 0..n {
            sampler.update(&mut state.chains, &mut rngs).unwrap();
            for s in &state.chains {
                let total: f64 = parents.iter().map(|&p| s.value(p)[0]).sum();
                assert!((total - 3.0).abs() < 1e-9, "sum drifted to {}", total);
                let v = s.value(parents[0])[0];
                sum += v;
                sum_sq += v * v;
            }
        }
        let count = 2.0 * n as f64;
        let mean = sum / count;
        let var = sum_sq / count - mean * mean;
        assert!((mean - 1.0).abs() < 0.08, "mean {}", mean);
        assert!((var - 2.0 / 3.0).abs() < 0.08, "variance {}", var);
    }

    #[test]
    fn test_integer_parents_stay_integer() {
        let (arena, parents, _) = dsum_model(true, 9.0);
        let (mut sampler, mut state, mut rngs) = block_sampler(&arena, &parents, 13);
        assert_eq!(sampler.name(), "bugs::DiscreteDSum");

        // equal Poisson rates: x | sum = 9 is multinomial(9, 1/3 each)
        let n = 20_000;
        let mut sum = 0.0;
        for _ in 0..n {
            sampler.update(&mut state.chains, &mut rngs).unwrap();
            for s in &state.chains {
                let values: Vec<f64> = parents.iter().map(|&p| s.value(p)[0]).collect();
                assert_eq!(values.iter().sum::<f64>(), 9.0);
                assert!(values.iter().all(|v| *v >= 0.0 && v.fract() == 0.0), "{:?}", values);
                sum += values[2];
            }
        }
        let mean = sum / (2 * n) as f64;
        assert!((mean - 3.0).abs() < 0.15, "mean {}", mean);
    }

    #[test]
    fn test_partial_pool_is_not_claimed() {
        let (arena, parents, _) = dsum_model(false, 1.0);
        let (states, _) = chains(&arena, 1, 0);
        let mut state = ModelState { arena: arena.clone(), chains: states };
        let graph = arena.full_graph();
        let factory = DSumFactory::default();
        let samplers = factory.make_samplers(&parents[..2], &graph, &mut state).unwrap();
        assert!(samplers.is_empty());
        assert!(!factory.can_sample(&[parents[0], parents[0]], &graph, &mut state));
        assert!(!factory.can_sample(&parents[1..], &graph, &mut state));
    }
}
