//! Deterministic functions and link functions used by logical nodes.
//!
//! The graph engine only sees the [`Function`] and [`LinkFunction`] traits;
//! the small catalogue below covers the arithmetic needed by linear models.

use std::fmt;

/// A vector-valued function of one or more parent values.
///
/// `mask[i]` marks the arguments that depend on the node being sampled.
/// When `fixed` is given, `fixed[i]` marks arguments whose value never
/// changes, and linearity must then hold with fixed coefficients.
pub trait Function: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn check_arity(&self, nargs: usize) -> bool;
    /// Output dimension, or `None` if the argument dimensions are invalid.
    fn dim(&self, dims: &[&[usize]]) -> Option<Vec<usize>>;
    fn evaluate(&self, out: &mut [f64], args: &[&[f64]]);

    fn is_discrete_valued(&self, _mask: &[bool]) -> bool {
        false
    }
    fn is_linear(&self, _mask: &[bool], _fixed: Option<&[bool]>) -> bool {
        false
    }
    fn is_scale(&self, _mask: &[bool], _fixed: Option<&[bool]>) -> bool {
        false
    }
}

/// Scalar inverse-link transform applied by link nodes.
pub trait LinkFunction: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    /// Name of the link, e.g. `log` for the `exp` inverse link.
    fn link_name(&self) -> &str;
    fn inverse_link(&self, eta: f64) -> f64;
    fn link(&self, mu: f64) -> f64;
}

pub fn length(dim: &[usize]) -> usize {
    dim.iter().product()
}

fn is_scalar(dim: &[usize]) -> bool {
    length(dim) == 1
}

/// Common dimension of elementwise arguments, allowing scalar broadcast.
fn elementwise_dim(dims: &[&[usize]]) -> Option<Vec<usize>> {
    let mut out: Vec<usize> = vec![1];
    for d in dims {
        if length(d) == 0 {
            return None;
        }
        if is_scalar(d) {
            continue;
        }
        if is_scalar(&out) {
            out = d.to_vec();
        } else if out.as_slice() != *d {
            return None;
        }
    }
    Some(out)
}

#[inline]
fn at(arg: &[f64], k: usize) -> f64 {
    if arg.len() == 1 {
        arg[0]
    } else {
        arg[k]
    }
}

/// At most one argument depends on the target, and every other one is fixed
/// when fixed coefficients are required.
fn single_dependent(mask: &[bool], fixed: Option<&[bool]>) -> bool {
    if mask.iter().filter(|&&m| m).count() > 1 {
        return false;
    }
    match fixed {
        Some(fixed) => mask.iter().zip(fixed).all(|(&m, &f)| m || f),
        None => true,
    }
}

// ── Arithmetic ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct Add;

impl Function for Add {
    fn name(&self) -> &str {
        "+"
    }
    fn check_arity(&self, nargs: usize) -> bool {
        nargs >= 2
    }
    fn dim(&self, dims: &[&[usize]]) -> Option<Vec<usize>> {
        elementwise_dim(dims)
    }
    fn evaluate(&self, out: &mut [f64], args: &[&[f64]]) {
        for (k, v) in out.iter_mut().enumerate() {
            *v = args.iter().map(|a| at(a, k)).sum();
        }
    }
    fn is_discrete_valued(&self, mask: &[bool]) -> bool {
        mask.iter().all(|&m| m)
    }
    fn is_linear(&self, _mask: &[bool], _fixed: Option<&[bool]>) -> bool {
        true
    }
    fn is_scale(&self, mask: &[bool], _fixed: Option<&[bool]>) -> bool {
        mask.iter().all(|&m| m)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Subtract;

impl Function for Subtract {
    fn name(&self) -> &str {
        "-"
    }
    fn check_arity(&self, nargs: usize) -> bool {
        nargs == 2
    }
    fn dim(&self, dims: &[&[usize]]) -> Option<Vec<usize>> {
        elementwise_dim(dims)
    }
    fn evaluate(&self, out: &mut [f64], args: &[&[f64]]) {
        for (k, v) in out.iter_mut().enumerate() {
            *v = at(args[0], k) - at(args[1], k);
        }
    }
    fn is_discrete_valued(&self, mask: &[bool]) -> bool {
        mask.iter().all(|&m| m)
    }
    fn is_linear(&self, _mask: &[bool], _fixed: Option<&[bool]>) -> bool {
        true
    }
    fn is_scale(&self, mask: &[bool], _fixed: Option<&[bool]>) -> bool {
        mask[0] && mask[1]
    }
}

/// Elementwise product.
#[derive(Debug, Clone, Copy, Default)]
pub struct Multiply;

impl Function for Multiply {
    fn name(&self) -> &str {
        "*"
    }
    fn check_arity(&self, nargs: usize) -> bool {
        nargs >= 2
    }
    fn dim(&self, dims: &[&[usize]]) -> Option<Vec<usize>> {
        elementwise_dim(dims)
    }
    fn evaluate(&self, out: &mut [f64], args: &[&[f64]]) {
        for (k, v) in out.iter_mut().enumerate() {
            *v = args.iter().map(|a| at(a, k)).product();
        }
    }
    fn is_discrete_valued(&self, mask: &[bool]) -> bool {
        mask.iter().all(|&m| m)
    }
    fn is_linear(&self, mask: &[bool], fixed: Option<&[bool]>) -> bool {
        single_dependent(mask, fixed)
    }
    fn is_scale(&self, mask: &[bool], fixed: Option<&[bool]>) -> bool {
        single_dependent(mask, fixed)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Divide;

impl Function for Divide {
    fn name(&self) -> &str {
        "/"
    }
    fn check_arity(&self, nargs: usize) -> bool {
        nargs == 2
    }
    fn dim(&self, dims: &[&[usize]]) -> Option<Vec<usize>> {
        elementwise_dim(dims)
    }
    fn evaluate(&self, out: &mut [f64], args: &[&[f64]]) {
        for (k, v) in out.iter_mut().enumerate() {
            *v = at(args[0], k) / at(args[1], k);
        }
    }
    fn is_linear(&self, mask: &[bool], fixed: Option<&[bool]>) -> bool {
        !mask[1] && fixed.map_or(true, |f| f[1])
    }
    fn is_scale(&self, mask: &[bool], fixed: Option<&[bool]>) -> bool {
        self.is_linear(mask, fixed)
    }
}

/// Sum of all elements of a single argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl Function for Sum {
    fn name(&self) -> &str {
        "sum"
    }
    fn check_arity(&self, nargs: usize) -> bool {
        nargs == 1
    }
    fn dim(&self, _dims: &[&[usize]]) -> Option<Vec<usize>> {
        Some(vec![1])
    }
    fn evaluate(&self, out: &mut [f64], args: &[&[f64]]) {
        out[0] = args[0].iter().sum();
    }
    fn is_discrete_valued(&self, mask: &[bool]) -> bool {
        mask[0]
    }
    fn is_linear(&self, _mask: &[bool], _fixed: Option<&[bool]>) -> bool {
        true
    }
    fn is_scale(&self, _mask: &[bool], _fixed: Option<&[bool]>) -> bool {
        true
    }
}

/// Inner product of two vectors of equal length.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProd;

impl Function for InProd {
    fn name(&self) -> &str {
        "inprod"
    }
    fn check_arity(&self, nargs: usize) -> bool {
        nargs == 2
    }
    fn dim(&self, dims: &[&[usize]]) -> Option<Vec<usize>> {
        (length(dims[0]) == length(dims[1])).then(|| vec![1])
    }
    fn evaluate(&self, out: &mut [f64], args: &[&[f64]]) {
        out[0] = args[0].iter().zip(args[1]).map(|(a, b)| a * b).sum();
    }
    fn is_linear(&self, mask: &[bool], fixed: Option<&[bool]>) -> bool {
        single_dependent(mask, fixed)
    }
    fn is_scale(&self, mask: &[bool], fixed: Option<&[bool]>) -> bool {
        single_dependent(mask, fixed)
    }
}

// ── Links ───────────────────────────────────────────────────────────────────

/// `exp`, the inverse of the log link.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exp;

impl LinkFunction for Exp {
    fn name(&self) -> &str {
        "exp"
    }
    fn link_name(&self) -> &str {
        "log"
    }
    fn inverse_link(&self, eta: f64) -> f64 {
        eta.exp()
    }
    fn link(&self, mu: f64) -> f64 {
        mu.ln()
    }
}

/// Inverse of the logit link.
#[derive(Debug, Clone, Copy, Default)]
pub struct ILogit;

impl LinkFunction for ILogit {
    fn name(&self) -> &str {
        "ilogit"
    }
    fn link_name(&self) -> &str {
        "logit"
    }
    fn inverse_link(&self, eta: f64) -> f64 {
        1.0 / (1.0 + (-eta).exp())
    }
    fn link(&self, mu: f64) -> f64 {
        (mu / (1.0 - mu)).ln()
    }
}
