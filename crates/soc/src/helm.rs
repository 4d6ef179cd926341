use crate::errors::{Result, SocError};
use linfa_linalg::cholesky::*;
use linfa_linalg::eigh::*;
use linfa_linalg::svd::*;
use linfa_linalg::triangular::*;
use log::warn;
use ndarray::{concatenate, Array1, Array2, ArrayBase, Axis, Data, Ix2};
use serde::{Deserialize, Serialize};

/// Local linearized description of the plant economics around the nominal
/// optimum, everything indexed in the canonical alias order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SocProblem {
    /// Measurement gains w.r.t. the unconstrained inputs, (n_y, n_u)
    pub gy: Array2<f64>,
    /// Measurement gains w.r.t. the disturbances, (n_y, n_d)
    pub gyd: Array2<f64>,
    /// Hessian of the objective w.r.t. inputs, (n_u, n_u), PD
    pub juu: Array2<f64>,
    /// Cross Hessian of the objective, (n_u, n_d)
    pub jud: Array2<f64>,
    /// Expected disturbance magnitudes, (n_d,)
    pub wd: Array1<f64>,
    /// Measurement noise magnitudes, (n_y,)
    pub wny: Array1<f64>,
}

impl SocProblem {
    /// Number of candidate measurements
    pub fn n_y(&self) -> usize {
        self.gy.nrows()
    }

    /// Number of unconstrained inputs
    pub fn n_u(&self) -> usize {
        self.gy.ncols()
    }

    /// Number of disturbances
    pub fn n_d(&self) -> usize {
        self.gyd.ncols()
    }

    /// Checks the mutual consistency of all the shapes.
    pub fn validate(&self) -> Result<()> {
        let (n_y, n_u, n_d) = (self.n_y(), self.n_u(), self.n_d());
        if self.gyd.nrows() != n_y {
            return Err(SocError::InvalidValue(format!(
                "Gyd has {} rows for {} measurements",
                self.gyd.nrows(),
                n_y
            )));
        }
        if self.juu.dim() != (n_u, n_u) {
            return Err(SocError::InvalidValue(format!(
                "Juu must be {n_u}x{n_u}, got {:?}",
                self.juu.dim()
            )));
        }
        if self.jud.dim() != (n_u, n_d) {
            return Err(SocError::InvalidValue(format!(
                "Jud must be {n_u}x{n_d}, got {:?}",
                self.jud.dim()
            )));
        }
        if self.wd.len() != n_d || self.wny.len() != n_y {
            return Err(SocError::InvalidValue(format!(
                "weights must have {} and {} entries, got {} and {}",
                n_d,
                n_y,
                self.wd.len(),
                self.wny.len()
            )));
        }
        if n_y < n_u {
            return Err(SocError::NotEnoughMeasurements(format!(
                "{n_y} candidate measurements for {n_u} unconstrained inputs"
            )));
        }
        Ok(())
    }
}

/// HELM evaluation of one measurement subset
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubsetLoss {
    /// Selected measurement indices, ascending
    pub indices: Vec<usize>,
    /// Worst-case steady-state loss
    pub worst_case: f64,
    /// Average steady-state loss
    pub average: f64,
    /// Optimal selection matrix H, (n_u, s)
    pub h: Array2<f64>,
    /// Disturbance sensitivity F of the selected measurements, (s, n_d)
    pub f_sens: Array2<f64>,
    /// Condition number of the selected gain matrix
    pub cond_gys: f64,
}

/// Solves `A x = b` for symmetric positive definite `A` through its
/// Cholesky factor.
fn spd_solve(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    b: &ArrayBase<impl Data<Elem = f64>, Ix2>,
) -> Result<Array2<f64>> {
    let l = a.cholesky()?;
    let z = l.solve_triangular(b, UPLO::Lower)?;
    Ok(l.t().solve_triangular_into(z, UPLO::Upper)?)
}

/// Symmetric square root of a positive definite matrix via its
/// eigendecomposition.
fn spd_sqrt(a: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array2<f64>> {
    let (vals, vecs) = a.to_owned().eigh()?;
    if vals.iter().any(|&v| v <= 0.) {
        return Err(SocError::InvalidValue(
            "Juu is not positive definite, run the modified Cholesky first".to_string(),
        ));
    }
    let sqrt = Array2::from_diag(&vals.mapv(f64::sqrt));
    Ok(vecs.dot(&sqrt).dot(&vecs.t()))
}

/// Evaluates the HELM loss of one measurement subset.
///
/// Computes the disturbance sensitivity `F = -(Gy_s Juu^-1 Jud - Gyd_s)`,
/// stacks `Y = [F diag(Wd), diag(Wny_s)]` and derives the optimal
/// selection matrix `H`. By construction `H Gy_s = Juu^{1/2}`, so the loss
/// matrix reduces to `M = H Y` with worst-case loss `sigma_max(M)^2 / 2`
/// and average loss `||M||_F^2 / (6 (n_d + s))`.
///
/// A subset whose selected gain matrix is rank deficient cannot control
/// all inputs; it is kept with infinite losses and a warning rather than
/// failing the enumeration.
pub fn subset_loss(problem: &SocProblem, subset: &[usize]) -> Result<SubsetLoss> {
    let (n_u, n_d) = (problem.n_u(), problem.n_d());
    let s = subset.len();
    if s < n_u {
        return Err(SocError::NotEnoughMeasurements(format!(
            "subset of size {s} cannot control {n_u} inputs"
        )));
    }
    if let Some(&i) = subset.iter().find(|&&i| i >= problem.n_y()) {
        return Err(SocError::InvalidValue(format!(
            "measurement index {i} out of range (n_y = {})",
            problem.n_y()
        )));
    }

    let gy_s = problem.gy.select(Axis(0), subset);
    let gyd_s = problem.gyd.select(Axis(0), subset);
    let wny_s = problem.wny.select(Axis(0), subset);

    // F = -(Gy_s Juu^-1 Jud - Gyd_s)
    let juu_inv_jud = spd_solve(&problem.juu, &problem.jud)?;
    let f_sens = -(gy_s.dot(&juu_inv_jud) - &gyd_s);

    // Y = [F diag(Wd), diag(Wny_s)], (s, n_d + s)
    let fwd = &f_sens * &problem.wd;
    let y = concatenate![Axis(1), fwd, Array2::from_diag(&wny_s)];
    let yyt = y.dot(&y.t());

    let (_, sv_g, _) = gy_s.svd(false, false)?;
    let cond_gys = if sv_g[sv_g.len() - 1] > 0. {
        sv_g[0] / sv_g[sv_g.len() - 1]
    } else {
        f64::INFINITY
    };
    if !cond_gys.is_finite() || cond_gys > 1e12 {
        warn!("subset {subset:?}: selected gains are rank deficient, loss is infinite");
        return Ok(SubsetLoss {
            indices: subset.to_vec(),
            worst_case: f64::INFINITY,
            average: f64::INFINITY,
            h: Array2::zeros((n_u, s)),
            f_sens,
            cond_gys,
        });
    }

    // (Y Y^T)^-1 Gy_s, then the n_u x n_u Gram matrix of the selection
    let a1 = spd_solve(&yyt, &gy_s)?;
    let gram = gy_s.t().dot(&a1);
    let juu_sqrt = spd_sqrt(&problem.juu)?;

    let h_t = match spd_solve(&gram, &juu_sqrt) {
        Ok(a2) => a1.dot(&a2),
        Err(_) => {
            warn!("subset {subset:?}: selection Gram matrix is singular, loss is infinite");
            return Ok(SubsetLoss {
                indices: subset.to_vec(),
                worst_case: f64::INFINITY,
                average: f64::INFINITY,
                h: Array2::zeros((n_u, s)),
                f_sens,
                cond_gys,
            });
        }
    };
    let h = h_t.t().to_owned();

    // loss matrix M = Juu^{1/2} (H Gy_s)^-1 H Y = H Y
    let m = h.dot(&y);
    let (_, sv, _) = m.svd(false, false)?;
    let worst_case = 0.5 * sv[0] * sv[0];
    let average = m.mapv(|v| v * v).sum() / (6. * (n_d + s) as f64);

    Ok(SubsetLoss {
        indices: subset.to_vec(),
        worst_case,
        average,
        h,
        f_sens,
        cond_gys,
    })
}
