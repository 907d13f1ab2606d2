use super::normal::{accumulate_children, normal_children};
use super::{Coefficients, ConjugateMethod, Workspace};
use crate::error::Result;
use crate::graph::closure::ClosureClass;
use crate::graph::{ChainState, GraphView};
use crate::rng::{normal, ChainRng};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Multivariate normal prior with normal or multivariate normal children.
#[derive(Debug, Clone)]
pub struct ConjugateMNormal {
    coef: Coefficients,
}

impl ConjugateMNormal {
    pub fn can_sample(view: &GraphView) -> bool {
        !view.arena().node(view.node()).is_bounded() && normal_children(view)
    }

    pub fn new(view: &GraphView, state: &mut ChainState) -> Self {
        let params = vec![0; view.stochastic_children().len()];
        Self {
            coef: Coefficients::new(view, state, params, ClosureClass::Linear),
        }
    }

    /// Mean of the full conditional and the Cholesky factor of its
    /// precision.
    pub fn posterior(
        &self,
        view: &GraphView,
        state: &mut ChainState,
        ws: &mut Workspace,
    ) -> Result<(DVector<f64>, Cholesky<f64, Dyn>)> {
        let id = view.node();
        let n = view.length();
        let params = view.arena().node(id).params();
        let x = DVector::from_column_slice(state.value(id));
        let mu0 = DVector::from_column_slice(state.value(params[0]));
        let t0 = DMatrix::from_column_slice(n, n, state.value(params[1]));

        let mut b = &t0 * (mu0 - &x);
        let mut a = t0;
        let coef = self.coef.get(view, state, ws);
        accumulate_children(view, state, coef, &mut a, &mut b);

        let chol = a
            .cholesky()
            .ok_or_else(|| view.node_error(id, "posterior precision is not positive definite"))?;
        let mean = x + chol.solve(&b);
        Ok((mean, chol))
    }
}

impl ConjugateMethod for ConjugateMNormal {
    fn name(&self) -> &'static str {
        "bugs::ConjugateMNormal"
    }

    fn update(
        &self,
        view: &GraphView,
        state: &mut ChainState,
        rng: &mut ChainRng,
        ws: &mut Workspace,
    ) -> Result<()> {
        let n = view.length();
        let (mean, chol) = self.posterior(view, state, ws)?;
        let z = DVector::from_iterator(n, (0..n).map(|_| normal(rng)));
        let eps = chol
            .l()
            .transpose()
            .solve_upper_triangular(&z)
            .ok_or_else(|| view.node_error(view.node(), "singular posterior precision"))?;
        let x = mean + eps;
        view.set_value(x.as_slice(), state);
        Ok(())
    }
}
