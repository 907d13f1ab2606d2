//! Multi-chain driver: initializes chains, assigns samplers and runs
//! sweeps.

use crate::config::{InitStrategy, ModelConfig};
use crate::error::{ModelError, Result};
use crate::graph::{ChainState, GraphBuilder, NodeArena, NodeId};
use crate::rng::{chain_rngs, ChainRng, RngState};
use crate::sampler::{FactoryRegistry, ModelState, Sampler};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Draws collected by [`Model::sample`].
#[derive(Debug, Clone)]
pub struct SampleResult {
    /// samples[chain][draw][param]
    pub samples: Vec<Vec<Vec<f64>>>,
    /// One label per scalar element of the monitored nodes.
    pub param_names: Vec<String>,
}

impl SampleResult {
    /// Posterior mean of each parameter over all chains.
    pub fn mean(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.param_names.len()];
        let mut count = 0usize;
        for draw in self.samples.iter().flatten() {
            for (s, v) in sums.iter_mut().zip(draw) {
                *s += v;
            }
            count += 1;
        }
        sums.iter().map(|s| s / count as f64).collect()
    }

    /// Posterior standard deviation of each parameter over all chains.
    pub fn std(&self) -> Vec<f64> {
        let means = self.mean();
        let mut sum_sq = vec![0.0; self.param_names.len()];
        let mut count = 0usize;
        for draw in self.samples.iter().flatten() {
            for ((s, v), m) in sum_sq.iter_mut().zip(draw).zip(&means) {
                *s += (v - m) * (v - m);
            }
            count += 1;
        }
        sum_sq.iter().map(|s| (s / count as f64).sqrt()).collect()
    }

    /// Split R-hat of each parameter: every chain is cut in half and the
    /// halves compared as separate chains. NaN when a parameter does not
    /// vary or there are fewer than four draws per chain.
    pub fn r_hat(&self) -> Vec<f64> {
        (0..self.param_names.len())
            .map(|p| {
                let traces: Vec<Vec<f64>> = self
                    .samples
                    .iter()
                    .map(|chain| chain.iter().map(|draw| draw[p]).collect())
                    .collect();
                split_r_hat(&traces)
            })
            .collect()
    }

    /// Draws of one parameter, chain by chain.
    pub fn trace(&self, name: &str) -> Option<Vec<Vec<f64>>> {
        let p = self.param_names.iter().position(|n| n == name)?;
        Some(
            self.samples
                .iter()
                .map(|chain| chain.iter().map(|draw| draw[p]).collect())
                .collect(),
        )
    }
}

fn split_r_hat(traces: &[Vec<f64>]) -> f64 {
    let n = traces.first().map_or(0, |t| t.len()) / 2;
    if n < 2 {
        return f64::NAN;
    }
    let halves: Vec<&[f64]> = traces
        .iter()
        .flat_map(|t| [&t[..n], &t[t.len() - n..]])
        .collect();
    let m = halves.len() as f64;
    let nf = n as f64;
    let means: Vec<f64> = halves.iter().map(|h| h.iter().sum::<f64>() / nf).collect();
    let grand = means.iter().sum::<f64>() / m;
    let between = nf / (m - 1.0) * means.iter().map(|c| (c - grand).powi(2)).sum::<f64>();
    let within = halves
        .iter()
        .zip(&means)
        .map(|(h, c)| h.iter().map(|x| (x - c).powi(2)).sum::<f64>() / (nf - 1.0))
        .sum::<f64>()
        / m;
    if within < 1e-30 {
        return f64::NAN;
    }
    let var_hat = (nf - 1.0) / nf * within + between / nf;
    (var_hat / within).sqrt()
}

fn no_chain(chain: usize) -> ModelError {
    ModelError::Logic(format!("no chain {}", chain))
}

/// A compiled model with its chains.
pub struct Model {
    state: ModelState,
    rngs: Vec<ChainRng>,
    /// Every node in topological order.
    order: Vec<NodeId>,
    samplers: Vec<Box<dyn Sampler>>,
    /// Non-fixed deterministic nodes no sampler keeps up to date.
    extra: Vec<NodeId>,
    samplers_chosen: bool,
    adapting: bool,
    iteration: u64,
    pool: rayon::ThreadPool,
}

impl Model {
    /// Freeze the graph, seed one RNG per chain and give every unobserved
    /// node a starting value.
    pub fn new(builder: GraphBuilder, config: ModelConfig) -> Result<Self> {
        if config.num_chains == 0 {
            return Err(ModelError::Logic("a model needs at least one chain".into()));
        }
        let arena = Arc::new(builder.finish());
        let order = arena.full_graph().sorted_nodes(&arena)?;
        let mut rngs = chain_rngs(config.seed, config.num_chains);
        let chains = rngs
            .iter_mut()
            .map(|rng| initial_state(&arena, &order, config.init, rng))
            .collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build()
            .map_err(|e| ModelError::Logic(format!("cannot build thread pool: {}", e)))?;

        tracing::info!(
            nodes = arena.len(),
            chains = config.num_chains,
            seed = config.seed,
            "model initialized"
        );
        Ok(Self {
            state: ModelState { arena, chains },
            rngs,
            order,
            samplers: Vec::new(),
            extra: Vec::new(),
            samplers_chosen: false,
            adapting: true,
            iteration: 0,
            pool,
        })
    }

    pub fn arena(&self) -> &Arc<NodeArena> {
        &self.state.arena
    }

    pub fn num_chains(&self) -> usize {
        self.state.num_chains()
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Assign a sampler to every unobserved stochastic node.
    ///
    /// Factories are tried in registry order, each claiming what it can from
    /// the nodes still unclaimed, in topological order. Samplers then run in
    /// the topological order of their first node.
    pub fn choose_samplers(&mut self, registry: &FactoryRegistry) -> Result<()> {
        if self.samplers_chosen {
            return Err(ModelError::Logic("samplers already chosen".into()));
        }
        let arena = self.state.arena.clone();
        let graph = arena.full_graph();
        let mut pool: Vec<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|&id| arena.node(id).is_stochastic() && !arena.node(id).is_observed())
            .collect();

        let mut samplers: Vec<Box<dyn Sampler>> = Vec::new();
        for factory in registry.enabled() {
            if pool.is_empty() {
                break;
            }
            for sampler in factory.make_samplers(&pool, &graph, &mut self.state)? {
                let claimed: HashSet<NodeId> = sampler.nodes().iter().copied().collect();
                pool.retain(|id| !claimed.contains(id));
                tracing::debug!(
                    factory = factory.name(),
                    sampler = sampler.name(),
                    nodes = ?sampler.nodes().iter().map(|&n| arena.name(n)).collect::<Vec<_>>(),
                    "sampler assigned"
                );
                samplers.push(sampler);
            }
        }
        if let Some(&id) = pool.first() {
            return Err(ModelError::NoSampler {
                node: id,
                name: arena.name(id).to_string(),
            });
        }

        let position: HashMap<NodeId, usize> =
            self.order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        samplers.sort_by_key(|s| s.nodes().iter().map(|n| position[n]).min().unwrap_or(0));

        let covered: HashSet<NodeId> = samplers
            .iter()
            .flat_map(|s| s.view().deterministic_children().iter().copied())
            .collect();
        self.extra = self
            .order
            .iter()
            .copied()
            .filter(|&id| {
                let node = arena.node(id);
                node.is_deterministic() && !node.is_fixed() && !covered.contains(&id)
            })
            .collect();

        tracing::info!(samplers = samplers.len(), extra = self.extra.len(), "samplers chosen");
        self.samplers = samplers;
        self.samplers_chosen = true;
        Ok(())
    }

    /// Names of the assigned samplers with the nodes each one updates.
    pub fn sampler_names(&self) -> Vec<(String, Vec<String>)> {
        self.samplers
            .iter()
            .map(|s| {
                let nodes = s.nodes().iter().map(|&n| self.state.arena.name(n).to_string());
                (s.name().to_string(), nodes.collect())
            })
            .collect()
    }

    /// Run `n` sweeps. Each sweep applies every sampler to every chain, then
    /// refreshes deterministic nodes outside all sampler views.
    pub fn update(&mut self, n: usize) -> Result<()> {
        if !self.samplers_chosen {
            return Err(ModelError::Logic("samplers have not been chosen".into()));
        }
        let Self {
            pool,
            samplers,
            state,
            rngs,
            extra,
            iteration,
            ..
        } = self;
        let arena = &state.arena;
        let chains = &mut state.chains;
        for _ in 0..n {
            pool.install(|| -> Result<()> {
                for sampler in samplers.iter_mut() {
                    sampler.update(chains, rngs)?;
                }
                if !extra.is_empty() {
                    chains.par_iter_mut().for_each(|chain| {
                        for &id in extra.iter() {
                            arena.resample(id, chain);
                        }
                    });
                }
                Ok(())
            })?;
            *iteration += 1;
        }
        Ok(())
    }

    /// Run `n` adaptive sweeps and report whether every sampler has reached
    /// its adaptation targets.
    pub fn adapt(&mut self, n: usize) -> Result<bool> {
        if !self.adapting {
            return Err(ModelError::Logic("adaptation is already off".into()));
        }
        self.update(n)?;
        Ok(self.check_adaptation())
    }

    /// End adaptation for every sampler. Irreversible.
    pub fn adapt_off(&mut self) {
        for s in &mut self.samplers {
            s.adapt_off();
        }
        self.adapting = false;
        tracing::info!(iteration = self.iteration, "adaptation off");
    }

    pub fn check_adaptation(&self) -> bool {
        self.samplers.iter().all(|s| s.check_adaptation())
    }

    /// Whether any sampler is still in its adaptive phase.
    pub fn is_adapting(&self) -> bool {
        self.adapting && self.samplers.iter().any(|s| s.is_adaptive())
    }

    pub fn value(&self, node: NodeId, chain: usize) -> Result<&[f64]> {
        self.check_node(node)?;
        let state = self.state.chains.get(chain).ok_or_else(|| no_chain(chain))?;
        Ok(state.value(node))
    }

    fn check_node(&self, node: NodeId) -> Result<()> {
        if node.0 >= self.state.arena.len() {
            return Err(ModelError::Logic(format!("no node {:?}", node)));
        }
        Ok(())
    }

    /// Overwrite an unobserved stochastic node in one chain and recompute
    /// the deterministic nodes that depend on it.
    pub fn set_value(&mut self, node: NodeId, chain: usize, value: &[f64]) -> Result<()> {
        self.check_node(node)?;
        let arena = self.state.arena.clone();
        let n = arena.node(node);
        if !n.is_stochastic() || n.is_observed() {
            return Err(ModelError::node(node, n.name(), "only unobserved stochastic nodes can be set"));
        }
        if value.len() != n.length() {
            return Err(ModelError::node(node, n.name(), "value length does not match dimension"));
        }
        let state = self
            .state
            .chains
            .get_mut(chain)
            .ok_or_else(|| no_chain(chain))?;
        state.set(node, value);
        for &id in &self.order {
            let d = arena.node(id);
            if d.is_deterministic() && !d.is_fixed() {
                arena.resample(id, state);
            }
        }
        Ok(())
    }

    pub fn rng_state(&self, chain: usize) -> Result<RngState> {
        self.rngs
            .get(chain)
            .map(RngState::capture)
            .ok_or_else(|| no_chain(chain))
    }

    pub fn set_rng_state(&mut self, chain: usize, state: &RngState) -> Result<()> {
        let rng = self.rngs.get_mut(chain).ok_or_else(|| no_chain(chain))?;
        *rng = state.restore();
        Ok(())
    }

    /// Run `n` sweeps, recording the monitored nodes after each one.
    pub fn sample(&mut self, n: usize, monitored: &[NodeId]) -> Result<SampleResult> {
        let arena = self.state.arena.clone();
        let param_names = monitored
            .iter()
            .flat_map(|&id| {
                let node = arena.node(id);
                let len = node.length();
                (0..len).map(move |i| {
                    if len == 1 {
                        node.name().to_string()
                    } else {
                        format!("{}[{}]", node.name(), i + 1)
                    }
                })
            })
            .collect();

        let mut samples = vec![Vec::with_capacity(n); self.num_chains()];
        for _ in 0..n {
            self.update(1)?;
            for (chain, out) in self.state.chains.iter().zip(samples.iter_mut()) {
                out.push(monitored.iter().flat_map(|&id| chain.value(id).iter().copied()).collect());
            }
        }
        Ok(SampleResult { samples, param_names })
    }
}

/// Starting values for one chain, assigned in topological order so every
/// node sees initialized parents.
fn initial_state(arena: &NodeArena, order: &[NodeId], init: InitStrategy, rng: &mut ChainRng) -> ChainState {
    let mut state = arena.new_chain_state();
    for &id in order {
        let node = arena.node(id);
        if node.is_fixed() {
            continue;
        }
        if node.is_stochastic() {
            match init {
                InitStrategy::Prior => arena.random_sample(id, &mut state, rng),
                InitStrategy::Typical => arena.typical_value(id, &mut state),
            }
        } else {
            arena.resample(id, &mut state);
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplerSettings;
    use crate::distributions::{Gamma, Norm};
    use crate::function::Add;

    fn normal_model() -> (GraphBuilder, NodeId, NodeId) {
        let mut b = GraphBuilder::new();
        let zero = b.scalar("zero", 0.0).unwrap();
        let one = b.scalar("one", 1.0).unwrap();
        let mu = b.add_stochastic("mu", Arc::new(Norm), &[zero, one], None, None).unwrap();
        let tau = b.add_stochastic("tau", Arc::new(Gamma), &[one, one], None, None).unwrap();
        let shifted = b.add_logical("shifted", Arc::new(Add), &[mu, one]).unwrap();
        for (i, y) in [0.5, 1.5, 1.0].into_iter().enumerate() {
            b.add_observed(&format!("y{}", i), Arc::new(Norm), &[mu, tau], None, None, vec![y])
                .unwrap();
        }
        (b, mu, shifted)
    }

    fn config(chains: usize) -> ModelConfig {
        ModelConfig {
            num_chains: chains,
            seed: 11,
            num_threads: 2,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_update_requires_samplers() {
        let (b, _, _) = normal_model();
        let mut model = Model::new(b, config(2)).unwrap();
        assert!(matches!(model.update(1), Err(ModelError::Logic(_))));
    }

    #[test]
    fn test_extra_nodes_follow_samplers() {
        let (b, mu, shifted) = normal_model();
        let mut model = Model::new(b, config(2)).unwrap();
        model
            .choose_samplers(&FactoryRegistry::with_defaults(&SamplerSettings::default()))
            .unwrap();
        model.update(5).unwrap();
        for chain in 0..2 {
            assert_eq!(model.value(shifted, chain).unwrap()[0], model.value(mu, chain).unwrap()[0] + 1.0);
        }
        assert_eq!(model.iteration(), 5);
    }

    #[test]
    fn test_same_seed_same_draws() {
        let run = || {
            let (b, mu, _) = normal_model();
            let mut model = Model::new(b, config(3)).unwrap();
            model
                .choose_samplers(&FactoryRegistry::with_defaults(&SamplerSettings::default()))
                .unwrap();
            model.sample(50, &[mu]).unwrap()
        };
        assert_eq!(run().samples, run().samples);
    }

    #[test]
    fn test_rng_state_replays() {
        let (b, mu, _) = normal_model();
        let mut model = Model::new(b, config(1)).unwrap();
        model
            .choose_samplers(&FactoryRegistry::with_defaults(&SamplerSettings::default()))
            .unwrap();
        model.update(10).unwrap();
        let rng = model.rng_state(0).unwrap();
        let saved = model.value(mu, 0).unwrap().to_vec();
        let tau = model.arena().find("tau").unwrap();
        let saved_tau = model.value(tau, 0).unwrap().to_vec();
        let first = model.sample(5, &[mu]).unwrap();

        model.set_value(mu, 0, &saved).unwrap();
        model.set_value(tau, 0, &saved_tau).unwrap();
        model.set_rng_state(0, &rng).unwrap();
        let second = model.sample(5, &[mu]).unwrap();
        assert_eq!(first.samples, second.samples);
    }

    #[test]
    fn test_set_value_rejects_observed() {
        let (b, _, _) = normal_model();
        let mut model = Model::new(b, config(1)).unwrap();
        let y = model.arena().find("y0").unwrap();
        assert!(model.set_value(y, 0, &[2.0]).is_err());
    }

    #[test]
    fn test_bad_chain_index_is_an_error() {
        let (b, mu, _) = normal_model();
        let mut model = Model::new(b, config(2)).unwrap();
        assert!(matches!(model.value(mu, 2), Err(ModelError::Logic(_))));
        assert!(matches!(model.rng_state(2), Err(ModelError::Logic(_))));
        let rng = model.rng_state(1).unwrap();
        assert!(matches!(model.set_rng_state(5, &rng), Err(ModelError::Logic(_))));
        assert!(matches!(model.set_value(mu, 2, &[0.0]), Err(ModelError::Logic(_))));
        assert!(model.value(NodeId(99), 0).is_err());
        assert!(model.value(mu, 1).is_ok());
    }

    #[test]
    fn test_summaries() {
        let result = SampleResult {
            samples: vec![
                vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]],
                vec![vec![2.0], vec![3.0], vec![4.0], vec![5.0]],
            ],
            param_names: vec!["x".into()],
        };
        assert_eq!(result.mean(), vec![3.0]);
        assert!((result.std()[0] - 1.5f64.sqrt()).abs() < 1e-12);
        assert!(result.r_hat()[0] > 1.0);
        assert_eq!(result.trace("x").unwrap()[1], vec![2.0, 3.0, 4.0, 5.0]);
    }
}
