use serde::{Deserialize, Serialize};

/// How unobserved stochastic nodes get their starting values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitStrategy {
    /// Draw from the prior, chain by chain.
    Prior,
    /// Use the distribution's typical value (mean or mode).
    Typical,
}

/// Configuration for a multi-chain model run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub num_chains: usize,
    pub seed: u64,
    /// Number of threads. 0 means use Rayon's default (all cores).
    pub num_threads: usize,
    pub init: InitStrategy,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_chains: 4,
            seed: 42,
            num_threads: 0,
            init: InitStrategy::Prior,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceMethod {
    StepOut,
    Doubling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceConfig {
    /// Initial interval width.
    pub width: f64,
    /// Maximum number of steps (stepping out) or doublings.
    pub max_steps: usize,
    pub method: SliceMethod,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            width: 1.0,
            max_steps: 10,
            method: SliceMethod::StepOut,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetropolisConfig {
    pub initial_step: f64,
    pub target_accept: f64,
}

impl Default for MetropolisConfig {
    fn default() -> Self {
        Self {
            initial_step: 0.1,
            target_accept: 0.234,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperedConfig {
    /// Number of rungs above the target density.
    pub max_level: usize,
    /// Log-temperature increment between rungs.
    pub delta: f64,
    /// Random-walk updates per rung.
    pub nrep: usize,
    /// Distribution families the tempered factory claims.
    pub families: Vec<String>,
}

impl Default for TemperedConfig {
    fn default() -> Self {
        Self {
            max_level: 50,
            delta: 0.10,
            nrep: 4,
            families: vec!["dnormmix".to_string()],
        }
    }
}

/// Settings for the default factory registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplerSettings {
    pub slice: SliceConfig,
    pub metropolis: MetropolisConfig,
    pub tempered: TemperedConfig,
}
