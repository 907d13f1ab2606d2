use super::dsum::DSumFactory;
use super::finite::FiniteFactory;
use super::metropolis::MetropolisFactory;
use super::slice::SliceFactory;
use super::tempered::TemperedFactory;
use super::{ModelState, Sampler};
use crate::config::SamplerSettings;
use crate::conjugate::ConjugateFactory;
use crate::error::Result;
use crate::graph::{Graph, NodeId};

/// Decides which nodes an algorithm applies to and builds samplers for them.
///
/// `can_sample` must be conservative: rejecting an applicable node costs
/// efficiency, accepting an inapplicable one breaks correctness.
pub trait SamplerFactory: Send + Sync {
    fn name(&self) -> &str;

    fn can_sample(&self, nodes: &[NodeId], graph: &Graph, state: &mut ModelState) -> bool;

    /// Build a sampler for `nodes`, or `None` if the factory declines.
    fn make_sampler(
        &self,
        nodes: &[NodeId],
        graph: &Graph,
        state: &mut ModelState,
    ) -> Result<Option<Box<dyn Sampler>>>;

    /// Claim what this factory can from the pool of unclaimed nodes.
    ///
    /// The default tries each node on its own. Block samplers override this
    /// to claim several nodes at once.
    fn make_samplers(
        &self,
        pool: &[NodeId],
        graph: &Graph,
        state: &mut ModelState,
    ) -> Result<Vec<Box<dyn Sampler>>> {
        let mut samplers = Vec::new();
        for &node in pool {
            if self.can_sample(&[node], graph, state) {
                if let Some(s) = self.make_sampler(&[node], graph, state)? {
                    samplers.push(s);
                }
            }
        }
        Ok(samplers)
    }
}

/// Ordered list of factories, tried in priority order during sampler
/// assignment.
#[derive(Default)]
pub struct FactoryRegistry {
    entries: Vec<(Box<dyn SamplerFactory>, bool)>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closed-form samplers first, generic ones last.
    pub fn with_defaults(settings: &SamplerSettings) -> Self {
        let mut registry = Self::new();
        registry.push(Box::new(ConjugateFactory));
        registry.push(Box::new(DSumFactory::new(settings.metropolis.clone())));
        registry.push(Box::new(FiniteFactory));
        registry.push(Box::new(TemperedFactory::new(
            settings.tempered.clone(),
            settings.metropolis.clone(),
        )));
        registry.push(Box::new(SliceFactory::new(settings.slice.clone())));
        registry.push(Box::new(MetropolisFactory::new(settings.metropolis.clone())));
        registry
    }

    /// Append a factory at the lowest priority, enabled.
    pub fn push(&mut self, factory: Box<dyn SamplerFactory>) {
        self.entries.push((factory, true));
    }

    /// Returns `false` if no factory has that name.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let mut found = false;
        for (factory, flag) in &mut self.entries {
            if factory.name() == name {
                *flag = enabled;
                found = true;
            }
        }
        found
    }

    pub fn names(&self) -> Vec<(&str, bool)> {
        self.entries.iter().map(|(f, e)| (f.name(), *e)).collect()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &dyn SamplerFactory> + '_ {
        self.entries
            .iter()
            .filter(|(_, enabled)| *enabled)
            .map(|(f, _)| f.as_ref())
    }
}
