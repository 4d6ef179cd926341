use crate::correlation::GaussianCorr;
use crate::errors::{GpError, Result};
use crate::mean_models::RegrPoly;
use crate::optimization::{optimize_params, prepare_multistart, PatternSearchParams};
use crate::parameters::{KrigingParams, KrigingValidParams, ThetaTuning};
use crate::utils::{pairwise_differences, DiffMatrix, NormalizedData};

use linfa::prelude::{DatasetBase, Fit, Float, PredictInplace};
use linfa_linalg::{cholesky::*, qr::*, svd::*, triangular::*};
use ndarray::{Array, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
use ndarray_stats::QuantileExt;

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal quantities computed during training and reused by predictions
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "F: Deserialize<'de>"))]
pub(crate) struct KrigingInnerParams<F: Float> {
    /// Process variance
    sigma2: F,
    /// Generalized least-squares trend coefficients
    beta: Array2<F>,
    /// Kriging weights `R^-1 (ytrain - F beta)`
    gamma: Array2<F>,
    /// Cholesky factor of the correlation matrix R
    r_chol: Array2<F>,
    /// Solution of `L ft = F`
    ft: Array2<F>,
    /// Upper triangle of the QR decomposition of `ft`
    ft_qr_r: Array2<F>,
}

/// Kriging (Gaussian process) interpolator of a scalar process output.
///
/// The output is modeled as `Y(x) = f(x)^T beta + Z(x)` where `f` is a
/// polynomial basis chosen by [RegrPoly] and `Z` is a zero-mean Gaussian
/// process with a [GaussianCorr] anisotropic kernel. The kernel widths
/// `theta` are estimated by maximizing the reduced likelihood with a
/// multistart pattern search on the log10 scale.
///
/// Besides values and variances the model predicts analytic first and
/// second derivatives of the mean response, which downstream loss
/// computations consume as process gain and curvature estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "F: Deserialize<'de>"))]
pub struct Kriging<F: Float> {
    /// Estimated kernel widths
    theta: Array1<F>,
    /// Reduced likelihood of the trained model
    likelihood: F,
    /// Quantities reused by predictions
    inner_params: KrigingInnerParams<F>,
    /// Normalized training inputs
    xt_norm: NormalizedData<F>,
    /// Normalized training output
    yt_norm: NormalizedData<F>,
    /// Raw training data kept for cross-validation reporting
    training_data: (Array2<F>, Array1<F>),
    /// Parameters used during training
    params: KrigingValidParams<F>,
}

impl<F: Float> fmt::Display for Kriging<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Kriging({:?}, theta={}, likelihood={})",
            self.params.regr(),
            self.theta,
            self.likelihood
        )
    }
}

impl<F: Float> Kriging<F> {
    /// Kriging parameters constructor given the polynomial trend
    pub fn params(regr: RegrPoly) -> KrigingParams<F> {
        KrigingParams::new(regr)
    }

    /// Estimated kernel widths
    pub fn theta(&self) -> &Array1<F> {
        &self.theta
    }

    /// Reduced likelihood value reached during training
    pub fn likelihood(&self) -> F {
        self.likelihood
    }

    /// Estimated process variance
    pub fn sigma2(&self) -> F {
        self.inner_params.sigma2
    }

    /// Number of input components
    pub fn dims(&self) -> usize {
        self.xt_norm.ncols()
    }

    /// Training data used to fit the model
    pub fn training_data(&self) -> &(Array2<F>, Array1<F>) {
        &self.training_data
    }

    /// Predict output values at n given `x` points of nx components
    /// specified as a (n, nx) matrix. Returns n values as a (n,) vector.
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.check_dims(x.ncols())?;
        let xnorm = (x - &self.xt_norm.mean) / &self.xt_norm.std;
        let f = self.params.regr().value(&xnorm);
        let corr = self.compute_correlation(&xnorm);
        let y_ = &f.dot(&self.inner_params.beta) + &corr.dot(&self.inner_params.gamma);
        Ok((&y_ * &self.yt_norm.std + &self.yt_norm.mean).remove_axis(Axis(1)))
    }

    /// Predict variance values at n given `x` points. Variance may be
    /// slightly negative from rounding, in which case it is clamped to zero.
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.check_dims(x.ncols())?;
        let xnorm = (x - &self.xt_norm.mean) / &self.xt_norm.std;
        let corr = self.compute_correlation(&xnorm);

        let inners = &self.inner_params;
        let rt = inners
            .r_chol
            .solve_triangular(&corr.t().to_owned(), UPLO::Lower)?;
        let rhs = inners.ft.t().dot(&rt) - self.params.regr().value(&xnorm).t();
        let u = inners.ft_qr_r.t().solve_triangular(&rhs, UPLO::Lower)?;

        let mut mse = Array::ones(rt.ncols()) - rt.mapv(|v| v * v).sum_axis(Axis(0))
            + u.mapv(|v: F| v * v).sum_axis(Axis(0));
        mse.mapv_inplace(|v| inners.sigma2 * v);
        Ok(mse.mapv(|v| if v < F::zero() { F::zero() } else { v }))
    }

    /// Predict the gradient of the mean response at each of n given `x`
    /// points, returned as a (n, nx) matrix.
    pub fn predict_gradients(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        let mut drv = Array2::<F>::zeros((x.nrows(), self.dims()));
        for (mut row, xi) in drv.rows_mut().into_iter().zip(x.rows()) {
            row.assign(&self.predict_jacobian(&xi)?);
        }
        Ok(drv)
    }

    /// Predict the gradient of the mean response at a single point,
    /// returned as a (nx,) vector.
    pub fn predict_jacobian(&self, x: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<Array1<F>> {
        self.check_dims(x.len())?;
        let xnorm = (x.to_owned() - &self.xt_norm.mean) / &self.xt_norm.std;

        let df = self.params.regr().jacobian(&xnorm);
        let dmu = df.t().dot(&self.inner_params.beta);
        let dr = self
            .params
            .corr()
            .jacobian(&xnorm, &self.xt_norm.data, &self.theta);
        let dcorr = dr.t().dot(&self.inner_params.gamma);

        let ystd = self.yt_norm.std[0];
        let mut grad = Array1::zeros(x.len());
        for k in 0..x.len() {
            grad[k] = (dmu[[k, 0]] + dcorr[[k, 0]]) * ystd / self.xt_norm.std[k];
        }
        Ok(grad)
    }

    /// Predict the Hessian of the mean response at a single point,
    /// returned as a (nx, nx) matrix.
    ///
    /// Only available for constant and linear trends whose second
    /// derivatives vanish; a quadratic trend is rejected.
    pub fn predict_hessian(&self, x: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<Array2<F>> {
        self.check_dims(x.len())?;
        if self.params.regr() == RegrPoly::Poly2 {
            return Err(GpError::InvalidValue(
                "Hessian prediction is not available with a quadratic trend".to_string(),
            ));
        }
        let xnorm = (x.to_owned() - &self.xt_norm.mean) / &self.xt_norm.std;
        let dx = xnorm - &self.xt_norm.data;
        let r = self.params.corr().value(&dx, &self.theta);

        let nx = x.len();
        let gamma = &self.inner_params.gamma;
        let mut hess = Array2::<F>::zeros((nx, nx));
        for i in 0..dx.nrows() {
            let hi = self
                .params
                .corr()
                .hessian(&dx.row(i), r[[i, 0]], &self.theta);
            Zip::from(&mut hess).and(&hi).for_each(|h, v| {
                *h += gamma[[i, 0]] * *v;
            });
        }
        let ystd = self.yt_norm.std[0];
        for k in 0..nx {
            for l in 0..nx {
                hess[[k, l]] =
                    hess[[k, l]] * ystd / (self.xt_norm.std[k] * self.xt_norm.std[l]);
            }
        }
        Ok(hess)
    }

    fn check_dims(&self, nx: usize) -> Result<()> {
        if nx != self.dims() {
            return Err(GpError::InvalidValue(format!(
                "model expects {} input components, got {}",
                self.dims(),
                nx
            )));
        }
        Ok(())
    }

    /// Correlation between given normalized points and the training set
    /// as a (n, n_obs) matrix
    fn compute_correlation(&self, xnorm: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        let dx = pairwise_differences(xnorm, &self.xt_norm.data);
        let r = self.params.corr().value(&dx, &self.theta);
        let n = xnorm.nrows();
        let nt = self.xt_norm.data.nrows();
        r.into_shape((n, nt)).unwrap()
    }
}

impl<F: Float, D: Data<Elem = F>> PredictInplace<ArrayBase<D, Ix2>, Array1<F>> for Kriging<F> {
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        *y = self.predict(x).unwrap();
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros(x.nrows())
    }
}

impl<F: Float, D: Data<Elem = F>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError>
    for KrigingValidParams<F>
{
    type Object = Kriging<F>;

    /// Fit the Kriging model given the training dataset (x, y).
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets();
        if x.nrows() != y.len() {
            return Err(GpError::InvalidValue(format!(
                "training set mismatch: {} input rows for {} outputs",
                x.nrows(),
                y.len()
            )));
        }
        let nx = x.ncols();
        let n_basis = self.regr().n_basis(nx);
        if x.nrows() <= n_basis {
            return Err(GpError::InvalidValue(format!(
                "at least {} training points are required for a {:?} trend in dimension {}",
                n_basis + 1,
                self.regr(),
                nx
            )));
        }

        let theta0_dim = self.theta_tuning().init().len();
        let theta0 = if theta0_dim == 1 {
            Array1::from_elem(nx, self.theta_tuning().init()[0])
        } else if theta0_dim == nx {
            self.theta_tuning().init().to_owned()
        } else {
            return Err(GpError::InvalidValue(format!(
                "initial theta should have 1 or {nx} components, got {theta0_dim}"
            )));
        };

        let xtrain = NormalizedData::new(x);
        let ytrain = NormalizedData::new(&y.to_owned().insert_axis(Axis(1)));

        let x_distances = DiffMatrix::new(&xtrain.data);
        let sums = x_distances.d.sum_axis(Axis(1));
        if x_distances.n_obs > 1 && *sums.min().unwrap() == F::zero() {
            warn!("multiple input rows have identical values, correlation matrix may be singular");
        }
        let fx = self.regr().value(&xtrain.data);

        let opt_theta = match self.theta_tuning() {
            ThetaTuning::Fixed(_) => theta0,
            ThetaTuning::Optimized { init: _, bounds } => {
                let base: f64 = 10.;
                let objfn = |x: &[f64], _gradient: Option<&mut [f64]>, _params: &mut ()| -> f64 {
                    let theta = Array1::from_iter(x.iter().map(|v| F::cast(base.powf(*v))));
                    if theta.iter().any(|v| v.is_nan()) {
                        // optimizer may wander into nan, worst value wrt minimization
                        return f64::INFINITY;
                    }
                    let rxx = self.corr().value(&x_distances.d, &theta);
                    match reduced_likelihood(self.regr(), &fx, rxx, &x_distances, &ytrain, self.nugget()) {
                        Ok(r) => unsafe { -(*(&r.0 as *const F as *const f64)) },
                        Err(_) => f64::INFINITY,
                    }
                };

                let bounds_dim = bounds.len();
                let bounds = if bounds_dim == 1 {
                    vec![bounds[0]; nx]
                } else if bounds_dim == nx {
                    bounds.to_vec()
                } else {
                    return Err(GpError::InvalidValue(format!(
                        "theta bounds should have 1 or {nx} components, got {bounds_dim}"
                    )));
                };

                let (theta_inits, bounds) =
                    prepare_multistart(self.n_start(), &theta0, &bounds)?;
                debug!("multistart likelihood optimization from {theta_inits:?} within {bounds:?}");
                let opt_params = (0..theta_inits.nrows())
                    .into_par_iter()
                    .map(|i| {
                        optimize_params(
                            objfn,
                            &theta_inits.row(i).to_owned(),
                            &bounds,
                            PatternSearchParams {
                                maxeval: self.max_eval(),
                                ..PatternSearchParams::default()
                            },
                        )
                    })
                    .reduce(
                        || (f64::INFINITY, Array::ones((theta_inits.ncols(),))),
                        |a, b| if b.0 < a.0 { b } else { a },
                    );
                opt_params.1.mapv(|v| F::cast(base.powf(v)))
            }
        };

        let rxx = self.corr().value(&x_distances.d, &opt_theta);
        let (likelihood, inner_params) =
            reduced_likelihood(self.regr(), &fx, rxx, &x_distances, &ytrain, self.nugget())
                .map_err(|e| match e {
                    GpError::LinalgError(err) => GpError::IllConditioned(format!(
                        "correlation matrix factorization failed for theta={opt_theta}: {err}"
                    )),
                    other => other,
                })?;
        Ok(Kriging {
            theta: opt_theta,
            likelihood,
            inner_params,
            xt_norm: xtrain,
            yt_norm: ytrain,
            training_data: (x.to_owned(), y.to_owned()),
            params: self.clone(),
        })
    }
}

/// Computes the reduced likelihood of the model for given correlation
/// factors and returns it along with the inner quantities reused at
/// prediction time.
///
/// `fx`: basis values at the training points, `rxx`: kernel values at the
/// pairwise training distances, `nugget`: diagonal jitter.
fn reduced_likelihood<F: Float>(
    regr: RegrPoly,
    fx: &ArrayBase<impl Data<Elem = F>, Ix2>,
    rxx: Array2<F>,
    x_distances: &DiffMatrix<F>,
    ytrain: &NormalizedData<F>,
    nugget: F,
) -> Result<(F, KrigingInnerParams<F>)> {
    // Set up the correlation matrix R with jittered unit diagonal
    let mut r_mx: Array2<F> = Array2::<F>::eye(x_distances.n_obs).mapv(|v| v + v * nugget);
    for (i, ij) in x_distances.d_indices.outer_iter().enumerate() {
        r_mx[[ij[0], ij[1]]] = rxx[[i, 0]];
        r_mx[[ij[1], ij[0]]] = rxx[[i, 0]];
    }
    let r_chol = r_mx.cholesky()?;
    // Generalized least squares via the QR decomposition of L^-1 F
    let ft = r_chol.solve_triangular(fx, UPLO::Lower)?;
    let (ft_qr_q, ft_qr_r) = ft.qr()?.into_decomp();

    let (_, sv_qr_r, _) = ft_qr_r.svd(false, false)?;
    let cond_ft = sv_qr_r[sv_qr_r.len() - 1] / sv_qr_r[0];
    if F::cast(cond_ft) < F::cast(1e-10) {
        let (_, sv_f, _) = &fx.svd(false, false)?;
        let cond_fx = sv_f[0] / sv_f[sv_f.len() - 1];
        if F::cast(cond_fx) > F::cast(1e15) {
            return Err(GpError::LikelihoodComputation(format!(
                "basis matrix of the {regr:?} trend is too ill-conditioned \
                for the given observations"
            )));
        }
        // ft is too ill-conditioned for this theta, the caller tries another one
        return Err(GpError::LikelihoodComputation(
            "ft is too ill-conditioned, try another theta".to_string(),
        ));
    }
    let yt = r_chol.solve_triangular(&ytrain.data, UPLO::Lower)?;

    let beta = ft_qr_r.solve_triangular_into(ft_qr_q.t().dot(&yt), UPLO::Upper)?;
    let rho = yt - ft.dot(&beta);
    let rho_sqr = rho.mapv(|v| v * v).sum_axis(Axis(0));

    let gamma = r_chol.t().solve_triangular_into(rho, UPLO::Upper)?;

    // det(R) is the squared product of the diagonal of its Cholesky factor
    let n_obs: F = F::cast(x_distances.n_obs);
    let logdet = r_chol.diag().mapv(|v: F| v.log10()).sum() * F::cast(2.) / n_obs;

    let sigma2 = rho_sqr / n_obs;
    let likelihood = -n_obs * (sigma2.sum().log10() + logdet);

    Ok((
        likelihood,
        KrigingInnerParams {
            sigma2: sigma2[0] * ytrain.std[0] * ytrain.std[0],
            beta,
            gamma,
            r_chol,
            ft,
            ft_qr_r,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use linfa::prelude::Dataset;
    use ndarray::{arr2, array};

    fn xsinx(x: &Array2<f64>) -> Array1<f64> {
        ((x - 3.5) * ((x - 3.5) / std::f64::consts::PI).mapv(|v| v.sin())).remove_axis(Axis(1))
    }

    fn trained_1d() -> Kriging<f64> {
        let xt = arr2(&[[0.0], [5.0], [10.0], [15.0], [18.0], [20.0], [25.0]]);
        let yt = xsinx(&xt);
        Kriging::params(RegrPoly::Poly0)
            .n_start(5)
            .fit(&Dataset::new(xt, yt))
            .expect("Kriging fit")
    }

    #[test]
    fn test_interpolation_at_training_points() {
        let gp = trained_1d();
        let (xt, yt) = gp.training_data().clone();
        let preds = gp.predict(&xt).expect("prediction");
        assert_abs_diff_eq!(preds, yt, epsilon = 1e-4);
    }

    #[test]
    fn test_variance_vanishes_at_training_points() {
        let gp = trained_1d();
        let xt = gp.training_data().0.clone();
        let vars = gp.predict_var(&xt).expect("variance");
        for v in vars {
            assert!(v >= 0.);
            assert!(v < 1e-4, "variance at training point too large: {v}");
        }
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        use finitediff::FiniteDiff;
        let gp = trained_1d();
        let x0 = array![7.5];
        let grad = gp.predict_jacobian(&x0).expect("gradient");
        let fd = x0.central_diff(&|x: &Array1<f64>| {
            gp.predict(&x.view().insert_axis(Axis(0))).unwrap()[0]
        });
        assert_abs_diff_eq!(grad[0], fd[0], epsilon = 1e-4);
    }

    #[test]
    fn test_hessian_matches_finite_difference_2d() {
        // Smooth 2D function, linear trend
        let xt = arr2(&[
            [0., 0.],
            [1., 0.],
            [0., 1.],
            [1., 1.],
            [0.5, 0.5],
            [0.25, 0.75],
            [0.75, 0.25],
            [0.2, 0.3],
            [0.8, 0.6],
        ]);
        let yt = xt.map_axis(Axis(1), |r| (r[0] * 2.5_f64).sin() + r[1] * r[1]);
        let gp = Kriging::<f64>::params(RegrPoly::Poly1)
            .n_start(5)
            .fit(&Dataset::new(xt, yt))
            .expect("Kriging fit");
        let x0 = array![0.4, 0.5];
        let hess = gp.predict_hessian(&x0).expect("hessian");
        let h = 1e-4;
        for k in 0..2 {
            let mut xp = x0.clone();
            xp[k] += h;
            let mut xm = x0.clone();
            xm[k] -= h;
            let gp_ = gp.predict_jacobian(&xp).unwrap();
            let gm_ = gp.predict_jacobian(&xm).unwrap();
            for l in 0..2 {
                let fd = (gp_[l] - gm_[l]) / (2. * h);
                assert_abs_diff_eq!(hess[[k, l]], fd, epsilon = 1e-2);
            }
        }
        // symmetry
        assert_abs_diff_eq!(hess[[0, 1]], hess[[1, 0]], epsilon = 1e-10);
    }

    #[test]
    fn test_hessian_rejected_for_quadratic_trend() {
        let xt = arr2(&[[0.], [1.], [2.], [3.], [4.], [5.], [6.]]);
        let yt = xt.map_axis(Axis(1), |r| r[0] * r[0]);
        let gp = Kriging::<f64>::params(RegrPoly::Poly2)
            .n_start(3)
            .fit(&Dataset::new(xt, yt))
            .expect("Kriging fit");
        assert!(matches!(
            gp.predict_hessian(&array![1.5]),
            Err(GpError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let gp = trained_1d();
        assert!(matches!(
            gp.predict(&arr2(&[[1., 2.]])),
            Err(GpError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_not_enough_points_rejected() {
        let xt = arr2(&[[0., 0.], [1., 1.]]);
        let yt = array![0., 1.];
        let res = Kriging::<f64>::params(RegrPoly::Poly1).fit(&Dataset::new(xt, yt));
        assert!(matches!(res, Err(GpError::InvalidValue(_))));
    }

    #[test]
    fn test_fixed_theta_is_kept() {
        let xt = arr2(&[[0.0], [5.0], [10.0], [15.0], [20.0]]);
        let yt = xsinx(&xt);
        let gp = Kriging::params(RegrPoly::Poly0)
            .theta_tuning(ThetaTuning::Fixed(array![0.3]))
            .fit(&Dataset::new(xt, yt))
            .expect("Kriging fit");
        assert_abs_diff_eq!(gp.theta()[0], 0.3);
    }
}
