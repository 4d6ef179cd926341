use crate::errors::{Result, SocError};
use crate::gmw::modified_cholesky;
use linfa::prelude::*;
use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use serde::{Deserialize, Serialize};
use socbox_gp::{KrigingParams, RegrPoly};

/// Gradient and Hessian blocks of the plant around the nominal optimum,
/// rows and columns pinned to the declared alias orders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Differentials {
    /// Measurement gains w.r.t. the unconstrained inputs, (n_y, n_u)
    pub gy: Array2<f64>,
    /// Measurement gains w.r.t. the disturbances, (n_y, n_d)
    pub gyd: Array2<f64>,
    /// Objective Hessian w.r.t. the inputs, (n_u, n_u), symmetrized
    pub juu: Array2<f64>,
    /// Objective cross Hessian, (n_u, n_d)
    pub jud: Array2<f64>,
    /// Unconstrained input aliases, column order of `gy` and `juu`
    pub u_aliases: Vec<String>,
    /// Disturbance aliases, column order of `gyd` and `jud`
    pub d_aliases: Vec<String>,
    /// Candidate measurement aliases, row order of `gy` and `gyd`
    pub y_aliases: Vec<String>,
    /// Whether `juu` had to be perturbed to become positive definite
    pub juu_indef: bool,
}

impl Differentials {
    /// Replaces `juu` with the GMW modified Cholesky reconstruction when
    /// the extracted Hessian is not positive definite, and records the
    /// outcome in `juu_indef`. Already-PD Hessians are returned untouched.
    pub fn regularize_juu(&mut self) -> Result<bool> {
        let f = modified_cholesky(&self.juu)?;
        if f.indef {
            info!(
                "Juu indefinite, adopting modified Hessian (max perturbation {:.3e})",
                f.e.iter().fold(0.0f64, |m, &v| m.max(v))
            );
            self.juu = f.a_mod;
        }
        self.juu_indef = f.indef;
        Ok(f.indef)
    }
}

/// Extracts the differentials bundle from sampled data restricted to the
/// reduced input space.
///
/// `x` holds one sample per row with the unconstrained inputs first and the
/// disturbances after them, matching `u_aliases` then `d_aliases`. Each
/// candidate measurement is refit with its own Kriging model and its
/// jacobian at `nominal` becomes one row of `G = [Gy | Gyd]`. The objective
/// is refit the same way and its Hessian at `nominal` is symmetrized and
/// split into the `Juu` and `Jud` blocks.
pub fn extract_differentials(
    x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    u_aliases: &[String],
    d_aliases: &[String],
    candidates: &[(String, Array1<f64>)],
    objective: (&str, &ArrayBase<impl Data<Elem = f64>, Ix1>),
    nominal: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    regr: RegrPoly,
) -> Result<Differentials> {
    let (n_u, n_d) = (u_aliases.len(), d_aliases.len());
    let nx = n_u + n_d;
    if n_u == 0 {
        return Err(SocError::InvalidValue(
            "at least one unconstrained input is required".to_string(),
        ));
    }
    if x.ncols() != nx {
        return Err(SocError::InvalidValue(format!(
            "samples have {} columns for {n_u} inputs and {n_d} disturbances",
            x.ncols()
        )));
    }
    if nominal.len() != nx {
        return Err(SocError::InvalidValue(format!(
            "nominal point has {} entries, expected {nx}",
            nominal.len()
        )));
    }
    if candidates.is_empty() {
        return Err(SocError::NotEnoughMeasurements(
            "no candidate measurements declared".to_string(),
        ));
    }
    if regr == RegrPoly::Poly2 {
        return Err(SocError::InvalidValue(
            "quadratic trend has no Hessian support, use poly0 or poly1".to_string(),
        ));
    }

    let n_y = candidates.len();
    let mut g = Array2::<f64>::zeros((n_y, nx));
    for (row, (alias, values)) in candidates.iter().enumerate() {
        if values.len() != x.nrows() {
            return Err(SocError::InvalidValue(format!(
                "candidate {alias} has {} values for {} samples",
                values.len(),
                x.nrows()
            )));
        }
        debug!("fitting reduced-space model for candidate {alias}");
        let model = KrigingParams::new(regr)
            .fit(&Dataset::new(x.to_owned(), values.to_owned()))?;
        let jac = model.predict_jacobian(nominal)?;
        g.row_mut(row).assign(&jac);
    }

    let (obj_alias, obj_values) = objective;
    if obj_values.len() != x.nrows() {
        return Err(SocError::InvalidValue(format!(
            "objective {obj_alias} has {} values for {} samples",
            obj_values.len(),
            x.nrows()
        )));
    }
    debug!("fitting reduced-space model for objective {obj_alias}");
    let model = KrigingParams::new(regr)
        .fit(&Dataset::new(x.to_owned(), obj_values.to_owned()))?;
    let hess = model.predict_hessian(nominal)?;
    let j = (&hess + &hess.t()) / 2.;

    Ok(Differentials {
        gy: g.slice(s![.., ..n_u]).to_owned(),
        gyd: g.slice(s![.., n_u..]).to_owned(),
        juu: j.slice(s![..n_u, ..n_u]).to_owned(),
        jud: j.slice(s![..n_u, n_u..]).to_owned(),
        u_aliases: u_aliases.to_vec(),
        d_aliases: d_aliases.to_vec(),
        y_aliases: candidates.iter().map(|(a, _)| a.clone()).collect(),
        juu_indef: false,
    })
}
