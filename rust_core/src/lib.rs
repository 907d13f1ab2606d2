pub mod config;
pub mod conjugate;
pub mod distributions;
pub mod error;
pub mod function;
pub mod graph;
pub mod model;
pub mod rng;
pub mod sampler;

pub use config::{ModelConfig, SamplerSettings};
pub use error::{ModelError, Result};
pub use graph::{GraphBuilder, NodeId};
pub use model::{Model, SampleResult};
pub use sampler::FactoryRegistry;
