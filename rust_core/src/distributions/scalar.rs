use super::{
    clamp_typical, inverse_cdf_sample, is_integer, log_truncation_mass, Bounds, Distribution,
};
use crate::rng::{normal, ChainRng};
use rand_distr::Distribution as _;
use smallvec::SmallVec;
use statrs::distribution as sd;
use statrs::function::beta::ln_beta;
use statrs::function::factorial::{ln_binomial, ln_factorial};
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;
use std::fmt;

/// Scalar distribution with scalar parameters.
///
/// Anything implementing this gets [`Distribution`] for free, including
/// truncation handling when `can_bound` is true.
pub trait ScalarDist: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn npar(&self) -> usize;
    fn can_bound(&self) -> bool {
        false
    }
    fn is_discrete_valued(&self) -> bool {
        false
    }
    fn check_parameter_values(&self, par: &[f64]) -> bool;
    /// Untruncated log density.
    fn log_density(&self, x: f64, par: &[f64]) -> f64;
    /// Log mass of the truncation interval.
    fn log_mass(&self, _par: &[f64], _lower: Option<f64>, _upper: Option<f64>) -> f64 {
        0.0
    }
    fn random_sample(
        &self,
        par: &[f64],
        lower: Option<f64>,
        upper: Option<f64>,
        rng: &mut ChainRng,
    ) -> f64;
    fn typical_value(&self, par: &[f64]) -> f64;
    fn support(&self, par: &[f64]) -> (f64, f64);
    fn is_support_fixed(&self, _fixmask: &[bool]) -> bool {
        true
    }
}

fn scalars(params: &[&[f64]]) -> SmallVec<[f64; 4]> {
    params.iter().map(|p| p[0]).collect()
}

impl<T: ScalarDist> Distribution for T {
    fn name(&self) -> &str {
        ScalarDist::name(self)
    }
    fn npar(&self) -> usize {
        ScalarDist::npar(self)
    }
    fn can_bound(&self) -> bool {
        ScalarDist::can_bound(self)
    }
    fn is_discrete_valued(&self, _mask: &[bool]) -> bool {
        ScalarDist::is_discrete_valued(self)
    }
    fn check_parameter_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == ScalarDist::npar(self) && dims.iter().all(|d| d.iter().product::<usize>() == 1)
    }
    fn check_parameter_values(&self, params: &[&[f64]]) -> bool {
        ScalarDist::check_parameter_values(self, &scalars(params))
    }
    fn log_density(&self, x: &[f64], params: &[&[f64]], bounds: Bounds<'_>) -> f64 {
        let par = scalars(params);
        let (lower, upper) = (bounds.scalar_lower(), bounds.scalar_upper());
        let x = x[0];
        if lower.is_some_and(|l| x < l) || upper.is_some_and(|u| x > u) {
            return f64::NEG_INFINITY;
        }
        let ld = ScalarDist::log_density(self, x, &par);
        if lower.is_some() || upper.is_some() {
            ld - self.log_mass(&par, lower, upper)
        } else {
            ld
        }
    }
    fn random_sample(
        &self,
        x: &mut [f64],
        params: &[&[f64]],
        bounds: Bounds<'_>,
        rng: &mut ChainRng,
    ) {
        let par = scalars(params);
        x[0] = ScalarDist::random_sample(
            self,
            &par,
            bounds.scalar_lower(),
            bounds.scalar_upper(),
            rng,
        );
    }
    fn typical_value(&self, x: &mut [f64], params: &[&[f64]], bounds: Bounds<'_>) {
        let par = scalars(params);
        x[0] = clamp_typical(
            ScalarDist::typical_value(self, &par),
            bounds.scalar_lower(),
            bounds.scalar_upper(),
        );
    }
    fn support(&self, lower: &mut [f64], upper: &mut [f64], params: &[&[f64]]) {
        let (l, u) = ScalarDist::support(self, &scalars(params));
        lower[0] = l;
        upper[0] = u;
    }
    fn is_support_fixed(&self, fixmask: &[bool]) -> bool {
        ScalarDist::is_support_fixed(self, fixmask)
    }
}

// ── Continuous ──────────────────────────────────────────────────────────────

/// Normal with mean and precision.
#[derive(Debug, Clone, Copy, Default)]
pub struct Norm;

impl Norm {
    /// Standard normal restricted to `[a, b]`, sampled from the upper tail
    /// by reflection so the inverse CDF stays accurate.
    fn standard_truncated(a: f64, b: f64, rng: &mut ChainRng) -> f64 {
        let std = match sd::Normal::new(0.0, 1.0) {
            Ok(d) => d,
            Err(_) => return f64::NAN,
        };
        if a > 0.0 {
            -inverse_cdf_sample(&std, Some(-b), Some(-a), rng)
        } else {
            inverse_cdf_sample(&std, Some(a), Some(b), rng)
        }
    }
}

impl ScalarDist for Norm {
    fn name(&self) -> &str {
        "dnorm"
    }
    fn npar(&self) -> usize {
        2
    }
    fn can_bound(&self) -> bool {
        true
    }
    fn check_parameter_values(&self, par: &[f64]) -> bool {
        par[1] > 0.0 && par[0].is_finite()
    }
    fn log_density(&self, x: f64, par: &[f64]) -> f64 {
        let (mu, tau) = (par[0], par[1]);
        0.5 * tau.ln() - 0.5 * (2.0 * PI).ln() - 0.5 * tau * (x - mu) * (x - mu)
    }
    fn log_mass(&self, par: &[f64], lower: Option<f64>, upper: Option<f64>) -> f64 {
        match sd::Normal::new(par[0], 1.0 / par[1].sqrt()) {
            Ok(d) => log_truncation_mass(&d, lower, upper),
            Err(_) => f64::NAN,
        }
    }
    fn random_sample(
        &self,
        par: &[f64],
        lower: Option<f64>,
        upper: Option<f64>,
        rng: &mut ChainRng,
    ) -> f64 {
        let (mu, sigma) = (par[0], 1.0 / par[1].sqrt());
        if lower.is_none() && upper.is_none() {
            return mu + sigma * normal(rng);
        }
        let a = lower.map_or(f64::NEG_INFINITY, |l| (l - mu) / sigma);
        let b = upper.map_or(f64::INFINITY, |u| (u - mu) / sigma);
        mu + sigma * Self::standard_truncated(a, b, rng)
    }
    fn typical_value(&self, par: &[f64]) -> f64 {
        par[0]
    }
    fn support(&self, _par: &[f64]) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }
}

/// Gamma with shape and rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gamma;

impl ScalarDist for Gamma {
    fn name(&self) -> &str {
        "dgamma"
    }
    fn npar(&self) -> usize {
        2
    }
    fn can_bound(&self) -> bool {
        true
    }
    fn check_parameter_values(&self, par: &[f64]) -> bool {
        par[0] > 0.0 && par[1] > 0.0
    }
    fn log_density(&self, x: f64, par: &[f64]) -> f64 {
        let (r, rate) = (par[0], par[1]);
        if x < 0.0 {
            f64::NEG_INFINITY
        } else if x == 0.0 {
            match r.partial_cmp(&1.0) {
                Some(std::cmp::Ordering::Less) => f64::INFINITY,
                Some(std::cmp::Ordering::Equal) => rate.ln(),
                _ => f64::NEG_INFINITY,
            }
        } else {
            r * rate.ln() + (r - 1.0) * x.ln() - rate * x - ln_gamma(r)
        }
    }
    fn log_mass(&self, par: &[f64], lower: Option<f64>, upper: Option<f64>) -> f64 {
        match sd::Gamma::new(par[0], par[1]) {
            Ok(d) => log_truncation_mass(&d, lower, upper),
            Err(_) => f64::NAN,
        }
    }
    fn random_sample(
        &self,
        par: &[f64],
        lower: Option<f64>,
        upper: Option<f64>,
        rng: &mut ChainRng,
    ) -> f64 {
        if lower.is_none() && upper.is_none() {
            return match rand_distr::Gamma::new(par[0], 1.0 / par[1]) {
                Ok(d) => d.sample(rng),
                Err(_) => f64::NAN,
            };
        }
        match sd::Gamma::new(par[0], par[1]) {
            Ok(d) => inverse_cdf_sample(&d, lower, upper, rng),
            Err(_) => f64::NAN,
        }
    }
    fn typical_value(&self, par: &[f64]) -> f64 {
        par[0] / par[1]
    }
    fn support(&self, _par: &[f64]) -> (f64, f64) {
        (0.0, f64::INFINITY)
    }
}

/// Exponential with rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exp;

impl ScalarDist for Exp {
    fn name(&self) -> &str {
        "dexp"
    }
    fn npar(&self) -> usize {
        1
    }
    fn can_bound(&self) -> bool {
        true
    }
    fn check_parameter_values(&self, par: &[f64]) -> bool {
        par[0] > 0.0
    }
    fn log_density(&self, x: f64, par: &[f64]) -> f64 {
        if x < 0.0 {
            f64::NEG_INFINITY
        } else {
            par[0].ln() - par[0] * x
        }
    }
    fn log_mass(&self, par: &[f64], lower: Option<f64>, upper: Option<f64>) -> f64 {
        match sd::Exp::new(par[0]) {
            Ok(d) => log_truncation_mass(&d, lower, upper),
            Err(_) => f64::NAN,
        }
    }
    fn random_sample(
        &self,
        par: &[f64],
        lower: Option<f64>,
        upper: Option<f64>,
        rng: &mut ChainRng,
    ) -> f64 {
        match sd::Exp::new(par[0]) {
            Ok(d) => inverse_cdf_sample(&d, lower, upper, rng),
            Err(_) => f64::NAN,
        }
    }
    fn typical_value(&self, par: &[f64]) -> f64 {
        1.0 / par[0]
    }
    fn support(&self, _par: &[f64]) -> (f64, f64) {
        (0.0, f64::INFINITY)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Beta;

impl ScalarDist for Beta {
    fn name(&self) -> &str {
        "dbeta"
    }
    fn npar(&self) -> usize {
        2
    }
    fn can_bound(&self) -> bool {
        true
    }
    fn check_parameter_values(&self, par: &[f64]) -> bool {
        par[0] > 0.0 && par[1] > 0.0
    }
    fn log_density(&self, x: f64, par: &[f64]) -> f64 {
        let (a, b) = (par[0], par[1]);
        if !(0.0..=1.0).contains(&x) {
            return f64::NEG_INFINITY;
        }
        let mut ld = -ln_beta(a, b);
        if a != 1.0 {
            ld += (a - 1.0) * x.ln();
        }
        if b != 1.0 {
            ld += (b - 1.0) * (1.0 - x).ln();
        }
        ld
    }
    fn log_mass(&self, par: &[f64], lower: Option<f64>, upper: Option<f64>) -> f64 {
        match sd::Beta::new(par[0], par[1]) {
            Ok(d) => log_truncation_mass(&d, lower, upper),
            Err(_) => f64::NAN,
        }
    }
    fn random_sample(
        &self,
        par: &[f64],
        lower: Option<f64>,
        upper: Option<f64>,
        rng: &mut ChainRng,
    ) -> f64 {
        if lower.is_none() && upper.is_none() {
            return match rand_distr::Beta::new(par[0], par[1]) {
                Ok(d) => d.sample(rng),
                Err(_) => f64::NAN,
            };
        }
        match sd::Beta::new(par[0], par[1]) {
            Ok(d) => inverse_cdf_sample(&d, lower, upper, rng),
            Err(_) => f64::NAN,
        }
    }
    fn typical_value(&self, par: &[f64]) -> f64 {
        par[0] / (par[0] + par[1])
    }
    fn support(&self, _par: &[f64]) -> (f64, f64) {
        (0.0, 1.0)
    }
}

/// Uniform on `[lower, upper]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unif;

impl ScalarDist for Unif {
    fn name(&self) -> &str {
        "dunif"
    }
    fn npar(&self) -> usize {
        2
    }
    fn check_parameter_values(&self, par: &[f64]) -> bool {
        par[0] < par[1]
    }
    fn log_density(&self, x: f64, par: &[f64]) -> f64 {
        if x < par[0] || x > par[1] {
            f64::NEG_INFINITY
        } else {
            -(par[1] - par[0]).ln()
        }
    }
    fn random_sample(
        &self,
        par: &[f64],
        _lower: Option<f64>,
        _upper: Option<f64>,
        rng: &mut ChainRng,
    ) -> f64 {
        par[0] + (par[1] - par[0]) * crate::rng::uniform(rng)
    }
    fn typical_value(&self, par: &[f64]) -> f64 {
        0.5 * (par[0] + par[1])
    }
    fn support(&self, par: &[f64]) -> (f64, f64) {
        (par[0], par[1])
    }
    fn is_support_fixed(&self, fixmask: &[bool]) -> bool {
        fixmask[0] && fixmask[1]
    }
}

// ── Discrete ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct Bern;

impl ScalarDist for Bern {
    fn name(&self) -> &str {
        "dbern"
    }
    fn npar(&self) -> usize {
        1
    }
    fn is_discrete_valued(&self) -> bool {
        true
    }
    fn check_parameter_values(&self, par: &[f64]) -> bool {
        (0.0..=1.0).contains(&par[0])
    }
    fn log_density(&self, x: f64, par: &[f64]) -> f64 {
        let p = par[0];
        if x == 1.0 {
            p.ln()
        } else if x == 0.0 {
            (1.0 - p).ln()
        } else {
            f64::NEG_INFINITY
        }
    }
    fn random_sample(
        &self,
        par: &[f64],
        _lower: Option<f64>,
        _upper: Option<f64>,
        rng: &mut ChainRng,
    ) -> f64 {
        if crate::rng::uniform(rng) < par[0] {
            1.0
        } else {
            0.0
        }
    }
    fn typical_value(&self, par: &[f64]) -> f64 {
        if par[0] > 0.5 {
            1.0
        } else {
            0.0
        }
    }
    fn support(&self, _par: &[f64]) -> (f64, f64) {
        (0.0, 1.0)
    }
}

/// Binomial with probability and size.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bin;

impl ScalarDist for Bin {
    fn name(&self) -> &str {
        "dbin"
    }
    fn npar(&self) -> usize {
        2
    }
    fn is_discrete_valued(&self) -> bool {
        true
    }
    fn check_parameter_values(&self, par: &[f64]) -> bool {
        (0.0..=1.0).contains(&par[0]) && is_integer(par[1]) && par[1] >= 0.0
    }
    fn log_density(&self, x: f64, par: &[f64]) -> f64 {
        let (p, n) = (par[0], par[1]);
        if !is_integer(x) || x < 0.0 || x > n {
            return f64::NEG_INFINITY;
        }
        let mut ld = ln_binomial(n as u64, x as u64);
        if x > 0.0 {
            ld += x * p.ln();
        }
        if n - x > 0.0 {
            ld += (n - x) * (1.0 - p).ln();
        }
        ld
    }
    fn random_sample(
        &self,
        par: &[f64],
        _lower: Option<f64>,
        _upper: Option<f64>,
        rng: &mut ChainRng,
    ) -> f64 {
        match rand_distr::Binomial::new(par[1] as u64, par[0]) {
            Ok(d) => d.sample(rng) as f64,
            Err(_) => f64::NAN,
        }
    }
    fn typical_value(&self, par: &[f64]) -> f64 {
        (par[0] * par[1]).round()
    }
    fn support(&self, par: &[f64]) -> (f64, f64) {
        (0.0, par[1])
    }
    fn is_support_fixed(&self, fixmask: &[bool]) -> bool {
        fixmask[1]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Pois;

impl ScalarDist for Pois {
    fn name(&self) -> &str {
        "dpois"
    }
    fn npar(&self) -> usize {
        1
    }
    fn is_discrete_valued(&self) -> bool {
        true
    }
    fn check_parameter_values(&self, par: &[f64]) -> bool {
        par[0] >= 0.0
    }
    fn log_density(&self, x: f64, par: &[f64]) -> f64 {
        let lambda = par[0];
        if !is_integer(x) || x < 0.0 {
            return f64::NEG_INFINITY;
        }
        if lambda == 0.0 {
            return if x == 0.0 { 0.0 } else { f64::NEG_INFINITY };
        }
        x * lambda.ln() - lambda - ln_factorial(x as u64)
    }
    fn random_sample(
        &self,
        par: &[f64],
        _lower: Option<f64>,
        _upper: Option<f64>,
        rng: &mut ChainRng,
    ) -> f64 {
        if par[0] == 0.0 {
            return 0.0;
        }
        match rand_distr::Poisson::new(par[0]) {
            Ok(d) => d.sample(rng),
            Err(_) => f64::NAN,
        }
    }
    fn typical_value(&self, par: &[f64]) -> f64 {
        par[0].floor()
    }
    fn support(&self, _par: &[f64]) -> (f64, f64) {
        (0.0, f64::INFINITY)
    }
}
