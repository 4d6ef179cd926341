use crate::errors::{Result, SocError};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use serde::{Deserialize, Serialize};

/// Result of the GMW81 modified Cholesky factorization
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GmwFactorization {
    /// The positive definite matrix `A' = R^T R`
    pub a_mod: Array2<f64>,
    /// Upper triangular factor
    pub r: Array2<f64>,
    /// Whether any diagonal had to be increased beyond its nominal value
    pub indef: bool,
    /// Diagonal perturbations applied, `A' = A + diag(e)` up to round-off
    pub e: Array1<f64>,
}

/// Gill-Murray-Wright (GMW81) modified Cholesky factorization.
///
/// Returns an upper triangular `R` such that `R^T R` is symmetric positive
/// definite and equals `A` when `A` is already PD and well-conditioned.
/// Column `j` of the underlying `L D L^T` pass picks
/// `D_jj = max(|c_jj|, (theta_j / beta)^2, delta)` with
/// `delta = eps * max(gamma + xi, 1)` and `beta^2 = max(gamma, xi/n, eps)`,
/// where `gamma` and `xi` are the largest diagonal and off-diagonal
/// magnitudes of `A`. This bounds the off-diagonals of `R` by `beta` and
/// keeps its diagonal at least `sqrt(delta)`.
pub fn modified_cholesky(a: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<GmwFactorization> {
    let n = a.nrows();
    if n == 0 || a.ncols() != n {
        return Err(SocError::InvalidValue(format!(
            "expected a square matrix, got {}x{}",
            a.nrows(),
            a.ncols()
        )));
    }
    let scale = a.iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1.0);
    for i in 0..n {
        for j in (i + 1)..n {
            if (a[[i, j]] - a[[j, i]]).abs() > 1e-8 * scale {
                return Err(SocError::InvalidValue(format!(
                    "matrix is not symmetric at ({i}, {j})"
                )));
            }
        }
    }

    let eps = f64::EPSILON;
    let gamma = (0..n).fold(0.0f64, |m, i| m.max(a[[i, i]].abs()));
    let mut xi = 0.0f64;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                xi = xi.max(a[[i, j]].abs());
            }
        }
    }
    let delta = eps * (gamma + xi).max(1.0);
    let beta_sqr = gamma.max(xi / n as f64).max(eps);

    let mut l = Array2::<f64>::eye(n);
    let mut d = Array1::<f64>::zeros(n);
    let mut e = Array1::<f64>::zeros(n);

    for j in 0..n {
        let mut c_jj = a[[j, j]];
        for s in 0..j {
            c_jj -= d[s] * l[[j, s]] * l[[j, s]];
        }

        let mut c = Array1::<f64>::zeros(n);
        let mut theta = 0.0f64;
        for i in (j + 1)..n {
            let mut c_ij = a[[i, j]];
            for s in 0..j {
                c_ij -= d[s] * l[[i, s]] * l[[j, s]];
            }
            c[i] = c_ij;
            theta = theta.max(c_ij.abs());
        }

        d[j] = c_jj.abs().max(theta * theta / beta_sqr).max(delta);
        e[j] = d[j] - c_jj;
        for i in (j + 1)..n {
            l[[i, j]] = c[i] / d[j];
        }
    }

    let indef = e.iter().any(|&v| v > 0.0);

    // R = sqrt(D) L^T, upper triangular
    let mut r = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        let di = d[i].sqrt();
        for j in i..n {
            r[[i, j]] = di * l[[j, i]];
        }
    }
    let a_mod = r.t().dot(&r);

    Ok(GmwFactorization { a_mod, r, indef, e })
}
