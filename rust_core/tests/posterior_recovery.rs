use dagmc_core::distributions::{DSum, Gamma, Norm};
use dagmc_core::{FactoryRegistry, GraphBuilder, Model, ModelConfig, ModelError, NodeId, SamplerSettings};
use std::sync::Arc;

/// mu ~ dnorm(0, 1), y ~ dnorm(mu, 1) with y = 2: the posterior is normal
/// with mean 1 and precision 2.
fn normal_normal() -> (GraphBuilder, NodeId) {
    let mut b = GraphBuilder::new();
    let zero = b.scalar("zero", 0.0).unwrap();
    let one = b.scalar("one", 1.0).unwrap();
    let mu = b.add_stochastic("mu", Arc::new(Norm), &[zero, one], None, None).unwrap();
    b.add_observed("y", Arc::new(Norm), &[mu, one], None, None, vec![2.0]).unwrap();
    (b, mu)
}

fn run(registry: &FactoryRegistry, burn_in: usize, draws: usize) -> (Model, dagmc_core::SampleResult) {
    let (b, mu) = normal_normal();
    let config = ModelConfig {
        num_chains: 4,
        seed: 2024,
        ..ModelConfig::default()
    };
    let mut model = Model::new(b, config).unwrap();
    model.choose_samplers(registry).unwrap();
    if burn_in > 0 {
        model.adapt(burn_in).unwrap();
    }
    model.adapt_off();
    let result = model.sample(draws, &[mu]).unwrap();
    (model, result)
}

#[test]
fn test_conjugate_recovery() {
    let registry = FactoryRegistry::with_defaults(&SamplerSettings::default());
    let (model, result) = run(&registry, 0, 2_500);
    assert_eq!(model.sampler_names(), vec![("bugs::ConjugateNormal".to_string(), vec!["mu".to_string()])]);

    let (mean, std) = (result.mean()[0], result.std()[0]);
    assert!((mean - 1.0).abs() < 0.05, "mean {}", mean);
    let precision = 1.0 / (std * std);
    assert!((precision - 2.0).abs() < 0.1, "precision {}", precision);
    assert!(result.r_hat()[0] < 1.05, "r_hat {}", result.r_hat()[0]);
}

#[test]
fn test_slice_recovery() {
    let mut registry = FactoryRegistry::with_defaults(&SamplerSettings::default());
    assert!(registry.set_enabled("bugs::Conjugate", false));
    let (model, result) = run(&registry, 500, 5_000);
    assert_eq!(model.sampler_names()[0].0, "base::RealSlicer");
    assert!(!model.is_adapting());

    let mean = result.mean()[0];
    assert!((mean - 1.0).abs() < 0.05, "mean {}", mean);
    assert!((result.std()[0] - 0.5f64.sqrt()).abs() < 0.03, "std {}", result.std()[0]);
}

#[test]
fn test_metropolis_recovery() {
    let mut registry = FactoryRegistry::with_defaults(&SamplerSettings::default());
    for name in ["bugs::Conjugate", "base::Slice"] {
        assert!(registry.set_enabled(name, false));
    }
    let (model, result) = run(&registry, 2_000, 10_000);
    assert_eq!(model.sampler_names()[0].0, "base::RWMetropolis");

    let mean = result.mean()[0];
    assert!((mean - 1.0).abs() < 0.08, "mean {}", mean);
    assert!(result.r_hat()[0] < 1.05, "r_hat {}", result.r_hat()[0]);
}

#[test]
fn test_unsampled_node_is_reported() {
    let (b, mu) = normal_normal();
    let mut model = Model::new(b, ModelConfig::default()).unwrap();
    let registry = FactoryRegistry::new();
    match model.choose_samplers(&registry) {
        Err(ModelError::NoSampler { node, name }) => {
            assert_eq!(node, mu);
            assert_eq!(name, "mu");
        }
        other => panic!("expected NoSampler, got {:?}", other.err()),
    }
}

#[test]
fn test_hierarchical_model_runs() {
    // mu ~ dnorm(0, 0.01), tau ~ dgamma(1, 1), theta[i] ~ dnorm(mu, tau),
    // y[i] ~ dnorm(theta[i], 1)
    let mut b = GraphBuilder::new();
    let zero = b.scalar("zero", 0.0).unwrap();
    let vague = b.scalar("vague", 0.01).unwrap();
    let one = b.scalar("one", 1.0).unwrap();
    let mu = b.add_stochastic("mu", Arc::new(Norm), &[zero, vague], None, None).unwrap();
    let tau = b.add_stochastic("tau", Arc::new(Gamma), &[one, one], None, None).unwrap();
    for (i, y) in [2.1, 1.4, 3.3, 2.6, 1.9].into_iter().enumerate() {
        let theta = b
            .add_stochastic(&format!("theta[{}]", i + 1), Arc::new(Norm), &[mu, tau], None, None)
            .unwrap();
        b.add_observed(&format!("y[{}]", i + 1), Arc::new(Norm), &[theta, one], None, None, vec![y])
            .unwrap();
    }
    let config = ModelConfig {
        num_chains: 2,
        seed: 5,
        ..ModelConfig::default()
    };
    let mut model = Model::new(b, config).unwrap();
    model
        .choose_samplers(&FactoryRegistry::with_defaults(&SamplerSettings::default()))
        .unwrap();
    let names = model.sampler_names();
    assert_eq!(names.len(), 7);
    assert!(names.iter().all(|(s, _)| s.starts_with("bugs::Conjugate")));
    // samplers run in topological order of their nodes
    assert_eq!(names[0].1, vec!["mu".to_string()]);

    let result = model.sample(4_000, &[mu, tau]).unwrap();
    let mean = result.mean();
    assert!((mean[0] - 2.26).abs() < 0.3, "mu mean {}", mean[0]);
    assert!(mean[1] > 0.0);
}

#[test]
fn test_observed_sum_is_sampled_as_a_block() {
    // a, b ~ dnorm(0, 1) with a + b = 2 observed: a | sum ~ N(1, 1/2)
    let mut b = GraphBuilder::new();
    let zero = b.scalar("zero", 0.0).unwrap();
    let one = b.scalar("one", 1.0).unwrap();
    let a = b.add_stochastic("a", Arc::new(Norm), &[zero, one], None, None).unwrap();
    let c = b.add_stochastic("b", Arc::new(Norm), &[zero, one], None, None).unwrap();
    b.add_observed("s", Arc::new(DSum), &[a, c], None, None, vec![2.0]).unwrap();
    let config = ModelConfig {
        num_chains: 2,
        seed: 77,
        ..ModelConfig::default()
    };
    let mut model = Model::new(b, config).unwrap();
    model
        .choose_samplers(&FactoryRegistry::with_defaults(&SamplerSettings::default()))
        .unwrap();
    assert_eq!(
        model.sampler_names(),
        vec![("bugs::RealDSum".to_string(), vec!["a".to_string(), "b".to_string()])]
    );

    model.adapt(1_000).unwrap();
    model.adapt_off();
    let result = model.sample(10_000, &[a, c]).unwrap();
    for chain in &result.samples {
        for draw in chain {
            assert!((draw[0] + draw[1] - 2.0).abs() < 1e-9, "draw {:?}", draw);
        }
    }
    let mean = result.mean();
    assert!((mean[0] - 1.0).abs() < 0.08, "mean {:?}", mean);
    assert!((result.std()[0] - 0.5f64.sqrt()).abs() < 0.05, "std {:?}", result.std());
}
