use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use serde::{Deserialize, Serialize};

/// Gaussian (squared exponential) correlation kernel
/// `r(d) = exp(-sum_k theta_k * d_k^2)` with one anisotropic width per
/// input component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaussianCorr();

impl GaussianCorr {
    /// Evaluates the kernel on m componentwise differences given as a
    /// (m, nx) matrix, returning a (m, 1) column.
    pub fn value<F: Float>(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &Array1<F>,
    ) -> Array2<F> {
        let r = d.mapv(|v| v * v).dot(theta);
        r.mapv(|v| F::exp(-v)).insert_axis(Axis(1))
    }

    /// Jacobian of the correlation vector `r(x, S)` with respect to `x` at a
    /// single point, as a (n_obs, nx) matrix where `S` is the (n_obs, nx)
    /// training set: `dr_i/dx_k = -2 theta_k (x_k - S_ik) r_i`.
    pub fn jacobian<F: Float>(
        &self,
        xi: &ArrayBase<impl Data<Elem = F>, Ix1>,
        xtrain: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &Array1<F>,
    ) -> Array2<F> {
        let two = F::cast(2.);
        let dx = xi.to_owned() - xtrain;
        let r = self.value(&dx, theta);
        let mut jac = Array2::zeros(dx.dim());
        for i in 0..dx.nrows() {
            for k in 0..dx.ncols() {
                jac[[i, k]] = -two * theta[k] * dx[[i, k]] * r[[i, 0]];
            }
        }
        jac
    }

    /// Hessian of `r_i(x)` with respect to `x` at a single point for the ith
    /// training sample:
    /// `d2r_i/dx_k dx_l = r_i (4 theta_k theta_l dx_k dx_l - 2 theta_k delta_kl)`.
    pub fn hessian<F: Float>(
        &self,
        dxi: &ArrayBase<impl Data<Elem = F>, Ix1>,
        ri: F,
        theta: &Array1<F>,
    ) -> Array2<F> {
        let nx = dxi.len();
        let two = F::cast(2.);
        let four = F::cast(4.);
        let mut hess = Array2::zeros((nx, nx));
        for k in 0..nx {
            for l in 0..nx {
                let mut v = four * theta[k] * theta[l] * dxi[k] * dxi[l];
                if k == l {
                    v -= two * theta[k];
                }
                hess[[k, l]] = ri * v;
            }
        }
        hess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_value() {
        let corr = GaussianCorr::default();
        let d = array![[0., 0.], [1., 2.]];
        let theta = array![0.5, 0.25];
        let r = corr.value(&d, &theta);
        assert_abs_diff_eq!(r[[0, 0]], 1.);
        assert_abs_diff_eq!(r[[1, 0]], (-1.5f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let corr = GaussianCorr::default();
        let xtrain = array![[0.3, 0.7], [-0.2, 0.1]];
        let theta = array![0.8, 1.3];
        let xi = array![0.1, 0.4];
        let jac = corr.jacobian(&xi, &xtrain, &theta);

        let h = 1e-7;
        for k in 0..2 {
            let mut xp = xi.clone();
            xp[k] += h;
            let mut xm = xi.clone();
            xm[k] -= h;
            let rp = corr.value(&(&xp - &xtrain), &theta);
            let rm = corr.value(&(&xm - &xtrain), &theta);
            for i in 0..2 {
                let fd = (rp[[i, 0]] - rm[[i, 0]]) / (2. * h);
                assert_abs_diff_eq!(jac[[i, k]], fd, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_hessian_matches_finite_difference() {
        let corr = GaussianCorr::default();
        let s = array![[0.3, 0.7]];
        let theta = array![0.8, 1.3];
        let xi = array![0.1, 0.4];
        let dxi = &xi - &s.row(0);
        let ri = corr.value(&dxi.clone().insert_axis(Axis(0)), &theta)[[0, 0]];
        let hess = corr.hessian(&dxi, ri, &theta);

        let h = 1e-5;
        for k in 0..2 {
            let mut xp = xi.clone();
            xp[k] += h;
            let mut xm = xi.clone();
            xm[k] -= h;
            let jp = corr.jacobian(&xp, &s, &theta);
            let jm = corr.jacobian(&xm, &s, &theta);
            for l in 0..2 {
                let fd = (jp[[0, l]] - jm[[0, l]]) / (2. * h);
                assert_abs_diff_eq!(hess[[k, l]], fd, epsilon = 1e-5);
            }
        }
    }
}
