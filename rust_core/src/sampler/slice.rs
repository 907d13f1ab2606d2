use super::{ModelState, ParallelSampler, SampleMethod, Sampler, SamplerFactory};
use crate::config::{SliceConfig, SliceMethod};
use crate::error::{ModelError, Result};
use crate::graph::{ChainState, Graph, GraphView, NodeId};
use crate::rng::{exponential, uniform, ChainRng};

/// Updates before the interval width is retuned.
const MIN_ADAPT: usize = 10;

/// A univariate density the slicer can move along.
trait SliceTarget {
    fn value(&self) -> f64;
    fn set_value(&mut self, x: f64);
    fn log_density(&self) -> Result<f64>;
    fn limits(&self) -> (f64, f64);
    fn error(&self, message: &str) -> ModelError;
}

/// Univariate slice sampler with stepping-out or doubling.
#[derive(Debug, Clone)]
pub struct Slicer {
    width: f64,
    max: usize,
    method: SliceMethod,
    adapt: bool,
    sumdiff: f64,
    iter: usize,
}

impl Slicer {
    pub fn new(config: &SliceConfig) -> Self {
        Self {
            width: config.width,
            max: config.max_steps,
            method: config.method,
            adapt: true,
            sumdiff: 0.0,
            iter: 0,
        }
    }

    fn update<T: SliceTarget>(&mut self, target: &mut T, rng: &mut ChainRng) -> Result<()> {
        let g0 = target.log_density()?;
        if g0 == f64::INFINITY {
            return Ok(());
        }
        if g0 == f64::NEG_INFINITY || g0.is_nan() {
            return Err(target.error("current value is inconsistent with data"));
        }
        let z = g0 - exponential(rng);
        let xold = target.value();
        let xnew = match self.method {
            SliceMethod::StepOut => self.step_out(target, xold, z, rng)?,
            SliceMethod::Doubling => self.doubling(target, xold, z, rng)?,
        };
        if self.adapt {
            self.sumdiff += self.iter as f64 * (xnew - xold).abs();
            self.iter += 1;
            if self.iter > MIN_ADAPT {
                self.width = 2.0 * self.sumdiff / self.iter as f64 / (self.iter - 1) as f64;
                tracing::trace!(width = self.width, "slice width retuned");
            }
        }
        Ok(())
    }

    fn step_out<T: SliceTarget>(&self, target: &mut T, xold: f64, z: f64, rng: &mut ChainRng) -> Result<f64> {
        let (lower, upper) = target.limits();
        let mut left = xold - uniform(rng) * self.width;
        let mut right = left + self.width;

        // Split the step budget at random between the two directions.
        let mut j = (uniform(rng) * self.max as f64) as usize;
        let mut k = self.max.saturating_sub(1 + j);

        if left < lower {
            left = lower;
        } else {
            target.set_value(left);
            while j > 0 && target.log_density()? > z {
                j -= 1;
                left -= self.width;
                if left < lower {
                    left = lower;
                    break;
                }
                target.set_value(left);
            }
        }
        if right > upper {
            right = upper;
        } else {
            target.set_value(right);
            while k > 0 && target.log_density()? > z {
                k -= 1;
                right += self.width;
                if right > upper {
                    right = upper;
                    break;
                }
                target.set_value(right);
            }
        }

        self.shrink(target, xold, z, left, right, rng, |_, _, _| Ok(true))
    }

    fn doubling<T: SliceTarget>(&self, target: &mut T, xold: f64, z: f64, rng: &mut ChainRng) -> Result<f64> {
        let (lower, upper) = target.limits();
        let mut left = xold - uniform(rng) * self.width;
        let mut right = left + self.width;

        let (mut left_ok, mut right_ok) = (false, false);
        for _ in 0..self.max {
            if uniform(rng) < 0.5 {
                if left >= lower {
                    left = 2.0 * left - right;
                    if left < lower {
                        left_ok = true;
                    } else {
                        target.set_value(left);
                        left_ok = target.log_density()? < z;
                    }
                } else {
                    left_ok = true;
                }
            } else if right <= upper {
                right = 2.0 * right - left;
                if right > upper {
                    right_ok = true;
                } else {
                    target.set_value(right);
                    right_ok = target.log_density()? < z;
                }
            } else {
                right_ok = true;
            }
            if left_ok && right_ok {
                break;
            }
        }

        let (width, l0, r0) = (self.width, left, right);
        self.shrink(target, xold, z, left, right, rng, move |t, xnew, _| {
            Self::accept(t, width, xold, xnew, z, l0, r0, lower, upper)
        })
    }

    /// Shrink `[left, right]` toward `xold` until a candidate lands in the
    /// slice and passes `accept`.
    #[allow(clippy::too_many_arguments)]
    fn shrink<T, F>(
        &self,
        target: &mut T,
        xold: f64,
        z: f64,
        mut left: f64,
        mut right: f64,
        rng: &mut ChainRng,
        mut accept: F,
    ) -> Result<f64>
    where
        T: SliceTarget,
        F: FnMut(&mut T, f64, f64) -> Result<bool>,
    {
        let (lower, upper) = target.limits();
        loop {
            let xnew = left + uniform(rng) * (right - left);
            if xnew >= lower && xnew <= upper {
                target.set_value(xnew);
                let g = target.log_density()?;
                if g >= z - f64::EPSILON && accept(target, xnew, g)? {
                    target.set_value(xnew);
                    return Ok(xnew);
                }
            }
            if xnew < xold {
                left = xnew;
            } else {
                right = xnew;
            }
            if right - left <= f64::EPSILON * xold.abs().max(1.0) {
                target.set_value(xold);
                return Ok(xold);
            }
        }
    }

    /// Whether doubling from `xnew` could have produced the same interval.
    #[allow(clippy::too_many_arguments)]
    fn accept<T: SliceTarget>(
        target: &mut T,
        width: f64,
        xold: f64,
        xnew: f64,
        z: f64,
        mut left: f64,
        mut right: f64,
        lower: f64,
        upper: f64,
    ) -> Result<bool> {
        let mut differ = false;
        while right - left > 1.1 * width {
            let mid = 0.5 * (left + right);
            if (xold < mid && xnew >= mid) || (xold >= mid && xnew < mid) {
                differ = true;
            }
            if xnew < mid {
                right = mid;
            } else {
                left = mid;
            }
            if differ {
                let mut right_ok = true;
                if right <= upper {
                    target.set_value(right);
                    right_ok = target.log_density()? < z;
                }
                let mut left_ok = true;
                if left >= lower {
                    target.set_value(left);
                    left_ok = target.log_density()? < z;
                }
                if left_ok && right_ok {
                    target.set_value(xnew);
                    return Ok(false);
                }
            }
        }
        target.set_value(xnew);
        Ok(true)
    }

    pub fn adapt_off(&mut self) {
        self.adapt = false;
    }

    pub fn is_adaptive(&self) -> bool {
        self.adapt
    }
}

// ── Targets ─────────────────────────────────────────────────────────────────

struct RealTarget<'a> {
    view: &'a GraphView,
    state: &'a mut ChainState,
    limits: (f64, f64),
}

impl SliceTarget for RealTarget<'_> {
    fn value(&self) -> f64 {
        self.state.value(self.view.node())[0]
    }
    fn set_value(&mut self, x: f64) {
        self.view.set_value(&[x], self.state);
    }
    fn log_density(&self) -> Result<f64> {
        self.view.log_full_conditional(self.state)
    }
    fn limits(&self) -> (f64, f64) {
        self.limits
    }
    fn error(&self, message: &str) -> ModelError {
        self.view.node_error(self.view.node(), message)
    }
}

/// Integer-valued node sliced through a continuous auxiliary `x`, with the
/// node value held at `floor(x)`.
struct DiscreteTarget<'a> {
    view: &'a GraphView,
    state: &'a mut ChainState,
    x: f64,
    limits: (f64, f64),
}

impl SliceTarget for DiscreteTarget<'_> {
    fn value(&self) -> f64 {
        self.x
    }
    fn set_value(&mut self, x: f64) {
        self.x = x;
        self.view.set_value(&[x.floor()], self.state);
    }
    fn log_density(&self) -> Result<f64> {
        self.view.log_full_conditional(self.state)
    }
    fn limits(&self) -> (f64, f64) {
        self.limits
    }
    fn error(&self, message: &str) -> ModelError {
        self.view.node_error(self.view.node(), message)
    }
}

// ── Methods ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RealSlicer {
    slicer: Slicer,
}

impl RealSlicer {
    pub fn new(config: &SliceConfig) -> Self {
        Self {
            slicer: Slicer::new(config),
        }
    }
}

impl SampleMethod for RealSlicer {
    fn update(&mut self, view: &GraphView, state: &mut ChainState, rng: &mut ChainRng) -> Result<()> {
        let (l, u) = view.arena().support(view.node(), state);
        let mut target = RealTarget {
            view,
            state,
            limits: (l[0], u[0]),
        };
        self.slicer.update(&mut target, rng)
    }
    fn is_adaptive(&self) -> bool {
        self.slicer.is_adaptive()
    }
    fn adapt_off(&mut self) {
        self.slicer.adapt_off();
    }
    fn check_adaptation(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct DiscreteSlicer {
    slicer: Slicer,
    x: f64,
}

impl DiscreteSlicer {
    pub fn new(config: &SliceConfig) -> Self {
        Self {
            slicer: Slicer::new(config),
            x: f64::NAN,
        }
    }
}

impl SampleMethod for DiscreteSlicer {
    fn update(&mut self, view: &GraphView, state: &mut ChainState, rng: &mut ChainRng) -> Result<()> {
        let current = state.value(view.node())[0];
        if self.x.floor() != current {
            self.x = current;
        }
        let (l, u) = view.arena().support(view.node(), state);
        let mut target = DiscreteTarget {
            view,
            state,
            x: self.x,
            limits: (l[0], u[0] + 1.0),
        };
        let result = self.slicer.update(&mut target, rng);
        self.x = target.x;
        result
    }
    fn is_adaptive(&self) -> bool {
        self.slicer.is_adaptive()
    }
    fn adapt_off(&mut self) {
        self.slicer.adapt_off();
    }
    fn check_adaptation(&self) -> bool {
        true
    }
}

// ── Factory ─────────────────────────────────────────────────────────────────

/// Slice sampling for scalar nodes with a fixed support.
#[derive(Debug, Clone, Default)]
pub struct SliceFactory {
    config: SliceConfig,
}

impl SliceFactory {
    pub fn new(config: SliceConfig) -> Self {
        Self { config }
    }
}

impl SamplerFactory for SliceFactory {
    fn name(&self) -> &str {
        "base::Slice"
    }

    fn can_sample(&self, nodes: &[NodeId], graph: &Graph, state: &mut ModelState) -> bool {
        let [id] = nodes else { return false };
        let node = state.arena.node(*id);
        graph.contains(*id)
            && node.is_stochastic()
            && !node.is_observed()
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
        let discrete = state.arena.node(nodes[0]).is_discrete();
        let methods: Vec<Box<dyn SampleMethod>> = (0..state.num_chains())
            .map(|_| -> Box<dyn SampleMethod> {
                if discrete {
                    Box::new(DiscreteSlicer::new(&self.config))
                } else {
                    Box::new(RealSlicer::new(&self.config))
                }
            })
            .collect();
        let name = if discrete {
            "base::DiscreteSlicer"
        } else {
            "base::RealSlicer"
        };
        Ok(Some(Box::new(ParallelSampler::new(view, methods, name))))
    }
}
