//! Distribution oracle consumed by stochastic nodes.
//!
//! The graph engine treats a distribution as an opaque numeric contract:
//! densities, draws, typical values and support. Parameter values arrive as
//! flat slices in the same order as the node's parents.

mod scalar;
mod vector;

pub use scalar::{Bern, Beta, Bin, Exp, Gamma, Norm, Pois, ScalarDist, Unif};
pub use vector::{
    multinomial_sample, wishart_sample, Cat, DSum, Interval, MNorm, Multi, NormMix, Wish,
};

use crate::rng::{uniform, ChainRng};
use statrs::distribution::ContinuousCDF;
use std::fmt;

/// Optional truncation bounds of a stochastic node, already evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bounds<'a> {
    pub lower: Option<&'a [f64]>,
    pub upper: Option<&'a [f64]>,
}

impl<'a> Bounds<'a> {
    pub const NONE: Bounds<'static> = Bounds {
        lower: None,
        upper: None,
    };

    pub fn scalar_lower(&self) -> Option<f64> {
        self.lower.map(|l| l[0])
    }

    pub fn scalar_upper(&self) -> Option<f64> {
        self.upper.map(|u| u[0])
    }
}

pub trait Distribution: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn npar(&self) -> usize;
    /// Whether `n` parameters are acceptable.
    fn check_npar(&self, n: usize) -> bool {
        n == self.npar()
    }

    /// Whether nodes with this distribution may be truncated.
    fn can_bound(&self) -> bool {
        false
    }
    /// `mask[i]` marks the parameters that are discrete-valued.
    fn is_discrete_valued(&self, _mask: &[bool]) -> bool {
        false
    }

    fn check_parameter_dims(&self, dims: &[&[usize]]) -> bool;
    /// Dimension of a value, given valid parameter dimensions.
    fn dim(&self, _dims: &[&[usize]]) -> Vec<usize> {
        vec![1]
    }
    fn check_parameter_values(&self, params: &[&[f64]]) -> bool;

    /// Log density; `-inf` for values inconsistent with the parameters.
    fn log_density(&self, x: &[f64], params: &[&[f64]], bounds: Bounds<'_>) -> f64;
    fn random_sample(
        &self,
        x: &mut [f64],
        params: &[&[f64]],
        bounds: Bounds<'_>,
        rng: &mut ChainRng,
    );
    fn typical_value(&self, x: &mut [f64], params: &[&[f64]], bounds: Bounds<'_>);
    /// Elementwise support limits, ignoring truncation.
    fn support(&self, lower: &mut [f64], upper: &mut [f64], params: &[&[f64]]);
    /// Whether the support is fixed when the parameters marked in
    /// `fixmask` are fixed.
    fn is_support_fixed(&self, _fixmask: &[bool]) -> bool {
        true
    }
}

/// Inverse-CDF draw restricted to `[lower, upper]`.
pub(crate) fn inverse_cdf_sample<D: ContinuousCDF<f64, f64>>(
    dist: &D,
    lower: Option<f64>,
    upper: Option<f64>,
    rng: &mut ChainRng,
) -> f64 {
    let pl = lower.map_or(0.0, |l| dist.cdf(l));
    let pu = upper.map_or(1.0, |u| dist.cdf(u));
    let x = dist.inverse_cdf(pl + (pu - pl) * uniform(rng));
    match (lower, upper) {
        (Some(l), _) if x < l => l,
        (_, Some(u)) if x > u => u,
        _ => x,
    }
}

/// Log probability mass of `[lower, upper]`; zero when unbounded.
pub(crate) fn log_truncation_mass<D: ContinuousCDF<f64, f64>>(
    dist: &D,
    lower: Option<f64>,
    upper: Option<f64>,
) -> f64 {
    if lower.is_none() && upper.is_none() {
        return 0.0;
    }
    let pl = lower.map_or(0.0, |l| dist.cdf(l));
    let pu = upper.map_or(1.0, |u| dist.cdf(u));
    (pu - pl).ln()
}

/// Move a typical value inside truncation bounds.
pub(crate) fn clamp_typical(x: f64, lower: Option<f64>, upper: Option<f64>) -> f64 {
    match (lower, upper) {
        (Some(l), Some(u)) if x < l || x > u => 0.5 * (l + u),
        (Some(l), None) if x < l => l + 1.0,
        (None, Some(u)) if x > u => u - 1.0,
        _ => x,
    }
}

pub(crate) fn is_integer(x: f64) -> bool {
    x.is_finite() && x.fract() == 0.0
}
