use super::{is_integer, Bounds, Distribution};
use crate::rng::{normal, uniform, ChainRng};
use nalgebra::{DMatrix, DVector};
use rand_distr::Distribution as _;
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;

fn len(dim: &[usize]) -> usize {
    dim.iter().product()
}

fn is_square(dim: &[usize]) -> bool {
    dim.len() == 2 && dim[0] == dim[1]
}

fn log_sum_exp(terms: &[f64]) -> f64 {
    let max = terms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + terms.iter().map(|t| (t - max).exp()).sum::<f64>().ln()
}

/// Draw an index with probability proportional to `weights`.
fn categorical_index(weights: &[f64], rng: &mut ChainRng) -> usize {
    let total: f64 = weights.iter().sum();
    let mut u = uniform(rng) * total;
    for (i, w) in weights.iter().enumerate() {
        if u < *w {
            return i;
        }
        u -= w;
    }
    weights.len() - 1
}

/// Multinomial draw of `n` items as a sequence of conditional binomials.
pub fn multinomial_sample(out: &mut [f64], n: f64, probs: &[f64], rng: &mut ChainRng) {
    let mut remaining = n.max(0.0) as u64;
    let mut mass: f64 = probs.iter().sum();
    for (x, &p) in out.iter_mut().zip(probs) {
        if remaining == 0 || mass <= 0.0 {
            *x = 0.0;
            continue;
        }
        let q = (p / mass).clamp(0.0, 1.0);
        let k = match rand_distr::Binomial::new(remaining, q) {
            Ok(d) => d.sample(rng),
            Err(_) => 0,
        };
        *x = k as f64;
        remaining -= k;
        mass -= p;
    }
}

/// Wishart draw with density proportional to `|X|^((k-p-1)/2) exp(-tr(R X)/2)`
/// via the Bartlett decomposition. Returns `None` if `R` is not positive
/// definite.
pub fn wishart_sample(r: &DMatrix<f64>, k: f64, rng: &mut ChainRng) -> Option<DMatrix<f64>> {
    let p = r.nrows();
    let chol = r.clone().cholesky()?;
    let mut a = DMatrix::<f64>::zeros(p, p);
    for i in 0..p {
        let chi = rand_distr::ChiSquared::new(k - i as f64).ok()?;
        a[(i, i)] = chi.sample(rng).sqrt();
        for j in 0..i {
            a[(i, j)] = normal(rng);
        }
    }
    // X = L^{-T} A A^T L^{-1} where R = L L^T
    let b = chol.l().transpose().solve_upper_triangular(&a)?;
    Some(&b * b.transpose())
}

// ── Categorical ─────────────────────────────────────────────────────────────

/// Categorical on `1..=N` with unnormalized probabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cat;

impl Distribution for Cat {
    fn name(&self) -> &str {
        "dcat"
    }
    fn npar(&self) -> usize {
        1
    }
    fn is_discrete_valued(&self, _mask: &[bool]) -> bool {
        true
    }
    fn check_parameter_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == 1 && dims[0].len() == 1 && dims[0][0] >= 1
    }
    fn check_parameter_values(&self, params: &[&[f64]]) -> bool {
        params[0].iter().all(|&p| p >= 0.0) && params[0].iter().any(|&p| p > 0.0)
    }
    fn log_density(&self, x: &[f64], params: &[&[f64]], _bounds: Bounds<'_>) -> f64 {
        let pi = params[0];
        let y = x[0];
        if !is_integer(y) || y < 1.0 || y > pi.len() as f64 {
            return f64::NEG_INFINITY;
        }
        let total: f64 = pi.iter().sum();
        (pi[y as usize - 1] / total).ln()
    }
    fn random_sample(
        &self,
        x: &mut [f64],
        params: &[&[f64]],
        _bounds: Bounds<'_>,
        rng: &mut ChainRng,
    ) {
        x[0] = (categorical_index(params[0], rng) + 1) as f64;
    }
    fn typical_value(&self, x: &mut [f64], params: &[&[f64]], _bounds: Bounds<'_>) {
        let pi = params[0];
        let mut best = 0;
        for (i, p) in pi.iter().enumerate() {
            if *p > pi[best] {
                best = i;
            }
        }
        x[0] = (best + 1) as f64;
    }
    fn support(&self, lower: &mut [f64], upper: &mut [f64], params: &[&[f64]]) {
        lower[0] = 1.0;
        upper[0] = params[0].len() as f64;
    }
}

// ── Interval censoring ──────────────────────────────────────────────────────

/// Index of the interval containing `t` among increasing cut points.
///
/// The value is the number of cut points strictly below `t`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interval;

impl Interval {
    pub fn index(t: f64, cut: &[f64]) -> usize {
        cut.iter().take_while(|&&c| t > c).count()
    }
}

impl Distribution for Interval {
    fn name(&self) -> &str {
        "dinterval"
    }
    fn npar(&self) -> usize {
        2
    }
    fn is_discrete_valued(&self, _mask: &[bool]) -> bool {
        true
    }
    fn check_parameter_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == 2 && len(dims[0]) == 1 && dims[1].len() == 1
    }
    fn check_parameter_values(&self, params: &[&[f64]]) -> bool {
        params[1].windows(2).all(|w| w[0] <= w[1])
    }
    fn log_density(&self, x: &[f64], params: &[&[f64]], _bounds: Bounds<'_>) -> f64 {
        if x[0] == Self::index(params[0][0], params[1]) as f64 {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }
    fn random_sample(
        &self,
        x: &mut [f64],
        params: &[&[f64]],
        bounds: Bounds<'_>,
        _rng: &mut ChainRng,
    ) {
        self.typical_value(x, params, bounds);
    }
    fn typical_value(&self, x: &mut [f64], params: &[&[f64]], _bounds: Bounds<'_>) {
        x[0] = Self::index(params[0][0], params[1]) as f64;
    }
    fn support(&self, lower: &mut [f64], upper: &mut [f64], params: &[&[f64]]) {
        lower[0] = 0.0;
        upper[0] = params[1].len() as f64;
    }
}

// ── Sum constraint ──────────────────────────────────────────────────────────

/// Absolute tolerance for an observed sum to match its parents.
const SUM_TOLERANCE: f64 = 1.490_116_119_384_765_6e-8;

/// Sum of two or more parents of equal dimension, used as an observed
/// constraint on them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DSum;

impl DSum {
    fn total(params: &[&[f64]], i: usize) -> f64 {
        params.iter().map(|p| p[i]).sum()
    }
}

impl Distribution for DSum {
    fn name(&self) -> &str {
        "dsum"
    }
    fn npar(&self) -> usize {
        2
    }
    fn check_npar(&self, n: usize) -> bool {
        n >= 2
    }
    fn is_discrete_valued(&self, mask: &[bool]) -> bool {
        mask.iter().all(|&d| d)
    }
    fn check_parameter_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() >= 2 && dims.iter().all(|d| len(d) == len(dims[0]))
    }
    fn dim(&self, dims: &[&[usize]]) -> Vec<usize> {
        dims[0].to_vec()
    }
    fn check_parameter_values(&self, _params: &[&[f64]]) -> bool {
        true
    }
    fn log_density(&self, x: &[f64], params: &[&[f64]], _bounds: Bounds<'_>) -> f64 {
        let consistent = x
            .iter()
            .enumerate()
            .all(|(i, v)| (v - Self::total(params, i)).abs() <= SUM_TOLERANCE);
        if consistent {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }
    fn random_sample(
        &self,
        x: &mut [f64],
        params: &[&[f64]],
        bounds: Bounds<'_>,
        _rng: &mut ChainRng,
    ) {
        self.typical_value(x, params, bounds);
    }
    fn typical_value(&self, x: &mut [f64], params: &[&[f64]], _bounds: Bounds<'_>) {
        for (i, v) in x.iter_mut().enumerate() {
            *v = Self::total(params, i);
        }
    }
    fn support(&self, lower: &mut [f64], upper: &mut [f64], params: &[&[f64]]) {
        for i in 0..lower.len() {
            lower[i] = Self::total(params, i);
            upper[i] = lower[i];
        }
    }
    fn is_support_fixed(&self, fixmask: &[bool]) -> bool {
        fixmask.iter().all(|&f| f)
    }
}

// ── Normal mixture ──────────────────────────────────────────────────────────

/// Mixture of normals with component means, precisions and weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormMix;

impl Distribution for NormMix {
    fn name(&self) -> &str {
        "dnormmix"
    }
    fn npar(&self) -> usize {
        3
    }
    fn check_parameter_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == 3
            && dims.iter().all(|d| d.len() == 1)
            && dims[0] == dims[1]
            && dims[0] == dims[2]
    }
    fn check_parameter_values(&self, params: &[&[f64]]) -> bool {
        params[1].iter().all(|&t| t > 0.0) && params[2].iter().all(|&p| p > 0.0)
    }
    fn log_density(&self, x: &[f64], params: &[&[f64]], _bounds: Bounds<'_>) -> f64 {
        let (mu, tau, pi) = (params[0], params[1], params[2]);
        let total: f64 = pi.iter().sum();
        let terms: Vec<f64> = (0..mu.len())
            .map(|i| {
                (pi[i] / total).ln() + 0.5 * tau[i].ln()
                    - 0.5 * (2.0 * PI).ln()
                    - 0.5 * tau[i] * (x[0] - mu[i]).powi(2)
            })
            .collect();
        log_sum_exp(&terms)
    }
    fn random_sample(
        &self,
        x: &mut [f64],
        params: &[&[f64]],
        _bounds: Bounds<'_>,
        rng: &mut ChainRng,
    ) {
        let i = categorical_index(params[2], rng);
        x[0] = params[0][i] + normal(rng) / params[1][i].sqrt();
    }
    fn typical_value(&self, x: &mut [f64], params: &[&[f64]], _bounds: Bounds<'_>) {
        let pi = params[2];
        let mut best = 0;
        for (i, p) in pi.iter().enumerate() {
            if *p > pi[best] {
                best = i;
            }
        }
        x[0] = params[0][best];
    }
    fn support(&self, lower: &mut [f64], upper: &mut [f64], _params: &[&[f64]]) {
        lower[0] = f64::NEG_INFINITY;
        upper[0] = f64::INFINITY;
    }
}

// ── Multivariate normal ─────────────────────────────────────────────────────

/// Multivariate normal with mean vector and precision matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct MNorm;

impl Distribution for MNorm {
    fn name(&self) -> &str {
        "dmnorm"
    }
    fn npar(&self) -> usize {
        2
    }
    fn check_parameter_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == 2 && is_square(dims[1]) && len(dims[0]) == dims[1][0]
    }
    fn dim(&self, dims: &[&[usize]]) -> Vec<usize> {
        vec![len(dims[0])]
    }
    fn check_parameter_values(&self, params: &[&[f64]]) -> bool {
        let p = params[0].len();
        DMatrix::from_column_slice(p, p, params[1]).cholesky().is_some()
    }
    fn log_density(&self, x: &[f64], params: &[&[f64]], _bounds: Bounds<'_>) -> f64 {
        let p = x.len();
        let t = DMatrix::from_column_slice(p, p, params[1]);
        let chol = match t.clone().cholesky() {
            Some(c) => c,
            None => return f64::NEG_INFINITY,
        };
        let logdet: f64 = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
        let delta = DVector::from_iterator(p, x.iter().zip(params[0]).map(|(a, b)| a - b));
        let q = (&t * &delta).dot(&delta);
        0.5 * logdet - 0.5 * p as f64 * (2.0 * PI).ln() - 0.5 * q
    }
    fn random_sample(
        &self,
        x: &mut [f64],
        params: &[&[f64]],
        _bounds: Bounds<'_>,
        rng: &mut ChainRng,
    ) {
        let p = x.len();
        let t = DMatrix::from_column_slice(p, p, params[1]);
        let z = DVector::from_iterator(p, (0..p).map(|_| normal(rng)));
        let eps = t
            .cholesky()
            .and_then(|c| c.l().transpose().solve_upper_triangular(&z));
        match eps {
            Some(eps) => {
                for i in 0..p {
                    x[i] = params[0][i] + eps[i];
                }
            }
            None => x.fill(f64::NAN),
        }
    }
    fn typical_value(&self, x: &mut [f64], params: &[&[f64]], _bounds: Bounds<'_>) {
        x.copy_from_slice(params[0]);
    }
    fn support(&self, lower: &mut [f64], upper: &mut [f64], _params: &[&[f64]]) {
        lower.fill(f64::NEG_INFINITY);
        upper.fill(f64::INFINITY);
    }
}

// ── Multinomial ─────────────────────────────────────────────────────────────

/// Multinomial with (unnormalized) probability vector and size.
#[derive(Debug, Clone, Copy, Default)]
pub struct Multi;

impl Distribution for Multi {
    fn name(&self) -> &str {
        "dmulti"
    }
    fn npar(&self) -> usize {
        2
    }
    fn is_discrete_valued(&self, _mask: &[bool]) -> bool {
        true
    }
    fn check_parameter_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == 2 && dims[0].len() == 1 && len(dims[1]) == 1
    }
    fn dim(&self, dims: &[&[usize]]) -> Vec<usize> {
        dims[0].to_vec()
    }
    fn check_parameter_values(&self, params: &[&[f64]]) -> bool {
        params[0].iter().all(|&p| p >= 0.0) && is_integer(params[1][0]) && params[1][0] >= 0.0
    }
    fn log_density(&self, x: &[f64], params: &[&[f64]], _bounds: Bounds<'_>) -> f64 {
        let (prob, n) = (params[0], params[1][0]);
        if x.iter().any(|&v| !is_integer(v) || v < 0.0) || x.iter().sum::<f64>() != n {
            return f64::NEG_INFINITY;
        }
        let total: f64 = prob.iter().sum();
        let mut ld = ln_gamma(n + 1.0);
        for (&v, &p) in x.iter().zip(prob) {
            if v > 0.0 {
                if p == 0.0 {
                    return f64::NEG_INFINITY;
                }
                ld += v * (p / total).ln() - ln_gamma(v + 1.0);
            }
        }
        ld
    }
    fn random_sample(
        &self,
        x: &mut [f64],
        params: &[&[f64]],
        _bounds: Bounds<'_>,
        rng: &mut ChainRng,
    ) {
        multinomial_sample(x, params[1][0], params[0], rng);
    }
    fn typical_value(&self, x: &mut [f64], params: &[&[f64]], _bounds: Bounds<'_>) {
        let (prob, n) = (params[0], params[1][0]);
        let total: f64 = prob.iter().sum();
        let mut assigned = 0.0;
        let mut best = 0;
        for (i, (v, &p)) in x.iter_mut().zip(prob).enumerate() {
            *v = (n * p / total).floor();
            assigned += *v;
            if p > prob[best] {
                best = i;
            }
        }
        x[best] += n - assigned;
    }
    fn support(&self, lower: &mut [f64], upper: &mut [f64], params: &[&[f64]]) {
        lower.fill(0.0);
        upper.fill(params[1][0]);
    }
    fn is_support_fixed(&self, fixmask: &[bool]) -> bool {
        fixmask[1]
    }
}

// ── Wishart ─────────────────────────────────────────────────────────────────

/// Wishart with scale matrix `R` and degrees of freedom `k`, parameterized
/// so that `E[X] = k R^{-1}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wish;

impl Wish {
    fn ln_multigamma(a: f64, p: usize) -> f64 {
        let mut v = 0.25 * (p * (p - 1)) as f64 * PI.ln();
        for j in 0..p {
            v += ln_gamma(a - 0.5 * j as f64);
        }
        v
    }
}

impl Distribution for Wish {
    fn name(&self) -> &str {
        "dwish"
    }
    fn npar(&self) -> usize {
        2
    }
    fn check_parameter_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == 2 && is_square(dims[0]) && len(dims[1]) == 1
    }
    fn dim(&self, dims: &[&[usize]]) -> Vec<usize> {
        dims[0].to_vec()
    }
    fn check_parameter_values(&self, params: &[&[f64]]) -> bool {
        let p = (params[0].len() as f64).sqrt() as usize;
        params[1][0] >= p as f64
            && DMatrix::from_column_slice(p, p, params[0]).cholesky().is_some()
    }
    fn log_density(&self, x: &[f64], params: &[&[f64]], _bounds: Bounds<'_>) -> f64 {
        let p = (x.len() as f64).sqrt() as usize;
        let k = params[1][0];
        let xm = DMatrix::from_column_slice(p, p, x);
        let r = DMatrix::from_column_slice(p, p, params[0]);
        let (cx, cr) = match (xm.clone().cholesky(), r.clone().cholesky()) {
            (Some(cx), Some(cr)) => (cx, cr),
            _ => return f64::NEG_INFINITY,
        };
        let logdet = |l: DMatrix<f64>| 2.0 * l.diagonal().iter().map(|d| d.ln()).sum::<f64>();
        let trace = (&r * &xm).trace();
        0.5 * (k - p as f64 - 1.0) * logdet(cx.l()) - 0.5 * trace + 0.5 * k * logdet(cr.l())
            - 0.5 * k * p as f64 * 2f64.ln()
            - Self::ln_multigamma(0.5 * k, p)
    }
    fn random_sample(
        &self,
        x: &mut [f64],
        params: &[&[f64]],
        _bounds: Bounds<'_>,
        rng: &mut ChainRng,
    ) {
        let p = (x.len() as f64).sqrt() as usize;
        let r = DMatrix::from_column_slice(p, p, params[0]);
        match wishart_sample(&r, params[1][0], rng) {
            Some(w) => x.copy_from_slice(w.as_slice()),
            None => x.fill(f64::NAN),
        }
    }
    fn typical_value(&self, x: &mut [f64], params: &[&[f64]], _bounds: Bounds<'_>) {
        let p = (x.len() as f64).sqrt() as usize;
        let r = DMatrix::from_column_slice(p, p, params[0]);
        match r.try_inverse() {
            Some(inv) => {
                for (v, s) in x.iter_mut().zip(inv.as_slice()) {
                    *v = params[1][0] * s;
                }
            }
            None => x.fill(f64::NAN),
        }
    }
    fn support(&self, lower: &mut [f64], upper: &mut [f64], _params: &[&[f64]]) {
        lower.fill(f64::NEG_INFINITY);
        upper.fill(f64::INFINITY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::chain_rngs;

    #[test]
    fn test_dsum_is_a_constraint() {
        let (a, b, c) = ([1.0, 2.0], [0.5, -1.0], [2.0, 2.0]);
        let params: [&[f64]; 3] = [&a, &b, &c];
        assert!(DSum.check_npar(3) && !DSum.check_npar(1));
        assert_eq!(DSum.log_density(&[3.5, 3.0], &params, Bounds::NONE), 0.0);
        assert_eq!(DSum.log_density(&[3.5, 3.1], &params, Bounds::NONE), f64::NEG_INFINITY);
        assert!(DSum.is_discrete_valued(&[true, true]));
        assert!(!DSum.is_discrete_valued(&[true, false]));
        let mut x = [0.0; 2];
        DSum.typical_value(&mut x, &params, Bounds::NONE);
        assert_eq!(x, [3.5, 3.0]);
    }

    #[test]
    fn test_interval_index() {
        let cut = [0.0, 1.0, 2.0];
        assert_eq!(Interval::index(-0.5, &cut), 0);
        assert_eq!(Interval::index(0.5, &cut), 1);
        assert_eq!(Interval::index(1.0, &cut), 1);
        assert_eq!(Interval::index(9.0, &cut), 3);
    }

    #[test]
    fn test_multinomial_preserves_total() {
        let mut rng = chain_rngs(11, 1).remove(0);
        let mut x = [0.0; 4];
        for _ in 0..200 {
            multinomial_sample(&mut x, 17.0, &[0.1, 0.2, 0.3, 0.4], &mut rng);
            assert_eq!(x.iter().sum::<f64>(), 17.0);
        }
    }

    #[test]
    fn test_wishart_sample_mean() {
        let mut rng = chain_rngs(5, 1).remove(0);
        let r = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let k = 6.0;
        let n = 20_000;
        let mut acc = DMatrix::<f64>::zeros(2, 2);
        for _ in 0..n {
            acc += wishart_sample(&r, k, &mut rng).unwrap();
        }
        acc /= n as f64;
        let expected = r.try_inverse().unwrap() * k;
        for (a, e) in acc.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 0.05 * e.abs().max(1.0), "mean {} vs {}", a, e);
        }
    }

    #[test]
    fn test_normmix_density_is_mixture() {
        let params: [&[f64]; 3] = [&[-1.0, 1.0], &[1.0, 1.0], &[1.0, 3.0]];
        let ld = NormMix.log_density(&[0.3], &params, Bounds::NONE);
        let phi = |x: f64| (-0.5 * x * x).exp() / (2.0 * PI).sqrt();
        let expected = (0.25 * phi(1.3) + 0.75 * phi(-0.7)).ln();
        assert!((ld - expected).abs() < 1e-12);
    }
}
