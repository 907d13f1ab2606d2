//! Tempered transitions for multimodal targets.
//!
//! The ladder runs from the target density (level 0) through flattened
//! densities `prior * likelihood^pwr(t)`, with `pwr(t) = exp(-t * delta)`.
//! A sweep climbs to the top, descends back to level 0, and the whole path
//! is accepted or rejected as a single Metropolis move. On the way up the
//! likelihood is read before each level's update, on the way down after it.

use super::metropolis::{random_walk_step, AcceptanceMean, StepAdapter, Transform};
use super::{ModelState, ParallelSampler, SampleMethod, Sampler, SamplerFactory};
use crate::config::{MetropolisConfig, TemperedConfig};
use crate::error::Result;
use crate::graph::{ChainState, Graph, GraphView, NodeId};
use crate::rng::{uniform, ChainRng};

#[derive(Debug, Clone)]
pub struct TemperedMetropolis {
    max_level: usize,
    delta: f64,
    nrep: usize,
    /// One adapter per level, level 0 included.
    adapters: Vec<StepAdapter>,
    acceptance: Vec<AcceptanceMean>,
    adapt: bool,
    transforms: Option<Vec<Transform>>,
}

impl TemperedMetropolis {
    pub fn new(config: &TemperedConfig, metropolis: &MetropolisConfig) -> Self {
        let levels = config.max_level + 1;
        Self {
            max_level: config.max_level,
            delta: config.delta,
            nrep: config.nrep,
            adapters: vec![StepAdapter::new(metropolis.initial_step, metropolis.target_accept); levels],
            acceptance: vec![AcceptanceMean::new(); levels],
            adapt: true,
            transforms: None,
        }
    }

    /// Inverse temperature of a level.
    pub fn power(&self, level: usize) -> f64 {
        (-(level as f64) * self.delta).exp()
    }

    /// `nrep` random-walk steps at one level.
    fn level_update(
        &mut self,
        level: usize,
        view: &GraphView,
        state: &mut ChainState,
        rng: &mut ChainRng,
    ) -> Result<()> {
        let power = self.power(level);
        let transforms = self
            .transforms
            .get_or_insert_with(|| Transform::for_node(view.arena(), view.node(), state));
        for _ in 0..self.nrep {
            let step = self.adapters[level].step_size();
            let p = random_walk_step(view, state, rng, transforms, step, power)?;
            if self.adapt {
                self.adapters[level].rescale(p);
                self.acceptance[level].record(p);
            }
        }
        Ok(())
    }

    fn log_likelihood(view: &GraphView, state: &ChainState) -> Result<f64> {
        let ll = view.log_likelihood(state);
        if ll.is_nan() {
            return Err(view.node_error(view.node(), "failure to calculate log likelihood"));
        }
        Ok(ll)
    }
}

impl SampleMethod for TemperedMetropolis {
    fn update(&mut self, view: &GraphView, state: &mut ChainState, rng: &mut ChainRng) -> Result<()> {
        if self.max_level > 0 {
            let x0 = view.value_vec(state);
            let mut log_global = 0.0;
            for t in 1..=self.max_level {
                let gap = self.power(t) - self.power(t - 1);
                log_global += gap * Self::log_likelihood(view, state)?;
                self.level_update(t, view, state, rng)?;
            }
            for t in (1..=self.max_level).rev() {
                self.level_update(t, view, state, rng)?;
                let gap = self.power(t) - self.power(t - 1);
                log_global -= gap * Self::log_likelihood(view, state)?;
            }
            if log_global.is_nan() || uniform(rng).ln() >= log_global {
                view.set_value(&x0, state);
            }
        }
        self.level_update(0, view, state, rng)
    }

    fn is_adaptive(&self) -> bool {
        self.adapt
    }

    fn adapt_off(&mut self) {
        self.adapt = false;
    }

    fn check_adaptation(&self) -> bool {
        self.acceptance
            .iter()
            .zip(&self.adapters)
            .all(|(a, s)| a.converged(s))
    }
}

/// Tempered transitions for continuous scalar nodes of the configured
/// families.
#[derive(Debug, Clone, Default)]
pub struct TemperedFactory {
    config: TemperedConfig,
    metropolis: MetropolisConfig,
}

impl TemperedFactory {
    pub fn new(config: TemperedConfig, metropolis: MetropolisConfig) -> Self {
        Self { config, metropolis }
    }
}

impl SamplerFactory for TemperedFactory {
    fn name(&self) -> &str {
        "mix::TemperedMix"
    }

    fn can_sample(&self, nodes: &[NodeId], graph: &Graph, state: &mut ModelState) -> bool {
        let [id] = nodes else { return false };
        let node = state.arena.node(*id);
        let family = match node.dist_name() {
            Some(name) => self.config.families.iter().any(|f| f == name),
            None => false,
        };
        family
            && graph.contains(*id)
            && !node.is_observed()
            && !node.is_discrete()
            && node.length() == 1
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
            .map(|_| {
                Box::new(TemperedMetropolis::new(&self.config, &self.metropolis)) as Box<dyn SampleMethod>
            })
            .collect();
        Ok(Some(Box::new(ParallelSampler::new(view, methods, "mix::TemperedMetropolis"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Norm;
    use crate::function::Multiply;
    use crate::graph::GraphBuilder;
    use crate::rng::chain_rngs;
    use crate::sampler::metropolis::RWMetropolis;
    use crate::sampler::testing::chains;
    use std::sync::Arc;

    /// Vague prior on `x` with `y ~ dnorm(x * x, 4)` observed at 16: the
    /// likelihood has two narrow modes at -4 and 4.
    fn bimodal() -> (Arc<crate::graph::NodeArena>, NodeId) {
        let mut b = GraphBuilder::new();
        let zero = b.scalar("zero", 0.0).unwrap();
        let vague = b.scalar("vague", 0.01).unwrap();
        let four = b.scalar("four", 4.0).unwrap();
        let x = b.add_stochastic("x", Arc::new(Norm), &[zero, vague], None, None).unwrap();
        let x2 = b.add_logical("x2", Arc::new(Multiply), &[x, x]).unwrap();
        let _y = b.add_observed("y", Arc::new(Norm), &[x2, four], None, None, vec![16.0]).unwrap();
        (Arc::new(b.finish()), x)
    }

    #[test]
    fn test_zero_levels_matches_random_walk() {
        let (arena, x) = bimodal();
        let graph = arena.full_graph();
        let view = GraphView::new(&[x], &graph, &arena).unwrap();
        let (mut a_states, _) = chains(&arena, 1, 0);
        let mut b_states = a_states.clone();
        let mut rng_a = chain_rngs(2024, 1).remove(0);
        let mut rng_b = chain_rngs(2024, 1).remove(0);

        let config = TemperedConfig {
            max_level: 0,
            nrep: 1,
            ..TemperedConfig::default()
        };
        let metropolis = MetropolisConfig::default();
        let mut tempered = TemperedMetropolis::new(&config, &metropolis);
        let mut plain = RWMetropolis::new(&metropolis);

        for _ in 0..500 {
            let before = a_states[0].value(x)[0];
            tempered.update(&view, &mut a_states[0], &mut rng_a).unwrap();
            plain.update(&view, &mut b_states[0], &mut rng_b).unwrap();
            let (va, vb) = (a_states[0].value(x)[0], b_states[0].value(x)[0]);
            assert_eq!(va, vb);
            assert_eq!(va == before, vb == before);
        }
    }

    #[test]
    fn test_tempering_visits_both_modes() {
        let (arena, x) = bimodal();
        let graph = arena.full_graph();
        let (mut states, mut rngs) = chains(&arena, 1, 8);
        states[0].set(x, &[4.0]);
        arena.resample(arena.find("x2").unwrap(), &mut states[0]);
        let mut state = ModelState { arena: arena.clone(), chains: states };
        let config = TemperedConfig {
            max_level: 30,
            delta: 0.25,
            nrep: 4,
            families: vec!["dnorm".into()],
        };
        let factory = TemperedFactory::new(config, MetropolisConfig::default());
        assert!(factory.can_sample(&[x], &graph, &mut state));
        let mut sampler = factory.make_sampler(&[x], &graph, &mut state).unwrap().unwrap();

        let (mut left, mut right) = (0, 0);
        for _ in 0..3000 {
            sampler.update(&mut state.chains, &mut rngs).unwrap();
            if state.chains[0].value(x)[0] < 0.0 {
                left += 1;
            } else {
                right += 1;
            }
        }
        assert!(left > 150 && right > 150, "left {} right {}", left, right);
    }

    #[test]
    fn test_tempered_path_keeps_posterior_variance() {
        // x ~ dnorm(0, 0.01), y ~ dnorm(x, 1), y = 3: x | y ~ N(3 / 1.01, 1 / 1.01)
        let mut b = GraphBuilder::new();
        let zero = b.scalar("zero", 0.0).unwrap();
        let vague = b.scalar("vague", 0.01).unwrap();
        let one = b.scalar("one", 1.0).unwrap();
        let x = b.add_stochastic("x", Arc::new(Norm), &[zero, vague], None, None).unwrap();
        b.add_observed("y", Arc::new(Norm), &[x, one], None, None, vec![3.0]).unwrap();
        let arena = Arc::new(b.finish());
        let graph = arena.full_graph();
        let (states, mut rngs) = chains(&arena, 4, 31);
        let mut state = ModelState { arena: arena.clone(), chains: states };
        let config = TemperedConfig {
            max_level: 10,
            delta: 0.6,
            nrep: 2,
            families: vec!["dnorm".into()],
        };
        let factory = TemperedFactory::new(config, MetropolisConfig::default());
        let mut sampler = factory.make_sampler(&[x], &graph, &mut state).unwrap().unwrap();

        for _ in 0..2_000 {
            sampler.update(&mut state.chains, &mut rngs).unwrap();
        }
        sampler.adapt_off();

        let (mut n, mut sum, mut sum_sq) = (0.0, 0.0, 0.0);
        for _ in 0..40_000 {
            sampler.update(&mut state.chains, &mut rngs).unwrap();
            for s in &state.chains {
                let v = s.value(x)[0];
                n += 1.0;
                sum += v;
                sum_sq += v * v;
            }
        }
        let mean = sum / n;
        let var = sum_sq / n - mean * mean;
        assert!((mean - 3.0 / 1.01).abs() < 0.03, "mean {}", mean);
        assert!((var - 1.0 / 1.01).abs() < 0.035, "variance {}", var);
    }

    #[test]
    fn test_power_ladder() {
        let t = TemperedMetropolis::new(&TemperedConfig::default(), &MetropolisConfig::default());
        assert_eq!(t.power(0), 1.0);
        assert!((t.power(10) - (-1.0f64).exp()).abs() < 1e-12);
    }
}
