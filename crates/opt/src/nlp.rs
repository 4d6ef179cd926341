use crate::errors::Result;
use log::debug;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use socbox_gp::Kriging;

/// One trust-region sub-problem handed to the NLP solver: minimize the
/// surrogate objective subject to the surrogate constraints being at most
/// zero, within `bounds`.
pub struct SurrogateProblem<'a> {
    /// Surrogate of the economic objective
    pub objective: &'a Kriging<f64>,
    /// Surrogates of the inequality constraints, `g_j(x) <= 0`
    pub constraints: &'a [Kriging<f64>],
    /// Trust-region bounds, one `(lower, upper)` row per input
    pub bounds: Array2<f64>,
    /// Starting point, inside `bounds`
    pub xinit: Array1<f64>,
    /// Solver tolerances
    pub tolerances: NlpTolerances,
}

/// Tolerances forwarded to the NLP sub-solver
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct NlpTolerances {
    /// Convergence tolerance on the objective
    pub tol: f64,
    /// Iteration cap
    pub max_iter: usize,
    /// Constraint satisfaction tolerance
    pub con_tol: f64,
}

/// Outcome class of one NLP sub-solve
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NlpStatus {
    /// A locally optimal feasible point was found
    Ok,
    /// No feasible point exists, `x` is the least-violation point
    Infeasible,
    /// The solver failed, `message` explains why
    Error,
}

/// Result of one NLP sub-solve
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NlpSolution {
    /// Outcome class
    pub status: NlpStatus,
    /// Candidate point
    pub x: Array1<f64>,
    /// Surrogate objective value at `x`
    pub objective: f64,
    /// Iterations spent by the solver
    pub iterations: usize,
    /// Diagnostic attached to `status = error`
    pub message: Option<String>,
}

/// An NLP solver able to minimize a surrogate sub-problem.
///
/// Network-backed implementations return [OptError::NlpNetwork](crate::OptError::NlpNetwork)
/// once their retry budget is exhausted; sub-problem infeasibility is not
/// an error and is reported through [NlpStatus::Infeasible].
pub trait NlpSolver {
    /// Minimizes the surrogate sub-problem.
    fn solve(&self, problem: &SurrogateProblem) -> Result<NlpSolution>;

    /// Checks that the solver is reachable.
    fn probe(&self) -> Result<()> {
        Ok(())
    }
}

/// In-process SLSQP fallback used when no external solver is configured.
///
/// Gradients come from the analytic Jacobians of the surrogates, so each
/// sub-solve costs surrogate evaluations only.
#[derive(Clone, Debug, Default)]
pub struct SlsqpSolver {}

impl SlsqpSolver {
    /// Builds the solver.
    pub fn new() -> Self {
        SlsqpSolver {}
    }
}

fn surrogate_value(model: &Kriging<f64>, x: &[f64], grad: Option<&mut [f64]>) -> f64 {
    let xa = match ArrayView2::from_shape((1, x.len()), x) {
        Ok(v) => v,
        Err(_) => return f64::INFINITY,
    };
    if let Some(g) = grad {
        match model.predict_jacobian(&xa.row(0)) {
            Ok(jac) => g.iter_mut().zip(jac.iter()).for_each(|(gi, ji)| *gi = *ji),
            Err(_) => g.fill(0.),
        }
    }
    match model.predict(&xa) {
        Ok(y) => y[0],
        Err(_) => f64::INFINITY,
    }
}

impl NlpSolver for SlsqpSolver {
    fn solve(&self, problem: &SurrogateProblem) -> Result<NlpSolution> {
        let obj = problem.objective;
        let fun = |x: &[f64], g: Option<&mut [f64]>, _: &mut ()| surrogate_value(obj, x, g);
        let cstrs: Vec<_> = problem
            .constraints
            .iter()
            .map(|model| {
                move |x: &[f64], g: Option<&mut [f64]>, _: &mut ()| surrogate_value(model, x, g)
            })
            .collect();
        let bounds: Vec<_> = problem
            .bounds
            .outer_iter()
            .map(|row| (row[0], row[1]))
            .collect();
        let xinit = problem.xinit.to_vec();

        let res = slsqp::minimize(
            fun,
            &xinit,
            &bounds,
            &cstrs,
            (),
            problem.tolerances.max_iter,
            Some(slsqp::StopTols {
                ftol_abs: problem.tolerances.tol,
                ..slsqp::StopTols::default()
            }),
        );
        let (x, objective, failed) = match res {
            Ok((_, x_opt, y_opt)) => (Array1::from_vec(x_opt), y_opt, false),
            Err((_, x_opt, y_opt)) => (Array1::from_vec(x_opt), y_opt, true),
        };

        // classify by constraint violation at the returned point
        let violation = problem
            .constraints
            .iter()
            .map(|m| surrogate_value(m, x.as_slice().unwrap_or(&xinit), None))
            .fold(0.0f64, f64::max);
        let status = if violation > problem.tolerances.con_tol {
            NlpStatus::Infeasible
        } else if failed || !objective.is_finite() {
            NlpStatus::Error
        } else {
            NlpStatus::Ok
        };
        debug!("slsqp sub-solve: {status:?}, objective {objective:.6e}");
        Ok(NlpSolution {
            status,
            x,
            objective,
            iterations: 0,
            message: (status == NlpStatus::Error).then(|| "slsqp did not converge".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use linfa::prelude::*;
    use ndarray::{array, Array2};
    use socbox_gp::RegrPoly;

    fn quadratic_model() -> Kriging<f64> {
        // 1D bowl centered at 0.6
        let xt = Array2::from_shape_vec(
            (9, 1),
            vec![0., 0.125, 0.25, 0.375, 0.5, 0.625, 0.75, 0.875, 1.],
        )
        .unwrap();
        let yt = xt.column(0).mapv(|v: f64| (v - 0.6).powi(2));
        Kriging::params(RegrPoly::Poly1)
            .fit(&Dataset::new(xt, yt))
            .unwrap()
    }

    #[test]
    fn test_unconstrained_minimum_found() {
        let model = quadratic_model();
        let problem = SurrogateProblem {
            objective: &model,
            constraints: &[],
            bounds: array![[0., 1.]],
            xinit: array![0.1],
            tolerances: NlpTolerances {
                tol: 1e-8,
                max_iter: 200,
                con_tol: 1e-6,
            },
        };
        let sol = SlsqpSolver::new().solve(&problem).unwrap();
        assert_eq!(sol.status, NlpStatus::Ok);
        assert_abs_diff_eq!(sol.x[0], 0.6, epsilon = 1e-2);
    }

    #[test]
    fn test_constraint_respected() {
        let model = quadratic_model();
        // g(x) = x - 0.4 <= 0 keeps the solution away from the bowl center
        let xt = Array2::from_shape_vec((5, 1), vec![0., 0.25, 0.5, 0.75, 1.]).unwrap();
        let gt = xt.column(0).mapv(|v: f64| v - 0.4);
        let g_model = Kriging::params(RegrPoly::Poly1)
            .fit(&Dataset::new(xt, gt))
            .unwrap();
        let problem = SurrogateProblem {
            objective: &model,
            constraints: std::slice::from_ref(&g_model),
            bounds: array![[0., 1.]],
            xinit: array![0.1],
            tolerances: NlpTolerances {
                tol: 1e-8,
                max_iter: 200,
                con_tol: 1e-4,
            },
        };
        let sol = SlsqpSolver::new().solve(&problem).unwrap();
        assert_eq!(sol.status, NlpStatus::Ok);
        assert_abs_diff_eq!(sol.x[0], 0.4, epsilon = 1e-2);
    }
}
