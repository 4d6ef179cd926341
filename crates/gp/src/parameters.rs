use crate::correlation::GaussianCorr;
use crate::errors::{GpError, Result};
use crate::mean_models::RegrPoly;
use linfa::{Float, ParamGuard};

use ndarray::{array, Array1};
use serde::{Deserialize, Serialize};

/// Default number of multistarts of the likelihood optimization
pub const GP_OPTIM_N_START: usize = 10;
/// Default budget of likelihood evaluations for one pattern search run
pub const GP_OPTIM_MAX_EVAL: usize = 200;

/// Tuning of the theta hyperparameters of the correlation kernel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "F: Deserialize<'de>"))]
pub enum ThetaTuning<F: Float> {
    /// Thetas are given, not estimated
    Fixed(Array1<F>),
    /// Thetas are optimized between the given bounds starting from the initial guess
    Optimized {
        /// Initial guess
        init: Array1<F>,
        /// (lower, upper) bounds of each theta
        bounds: Array1<(F, F)>,
    },
}

impl<F: Float> Default for ThetaTuning<F> {
    fn default() -> Self {
        ThetaTuning::Optimized {
            init: array![F::cast(ThetaTuning::<F>::DEFAULT_INIT)],
            bounds: array![(
                F::cast(ThetaTuning::<F>::DEFAULT_BOUNDS.0),
                F::cast(ThetaTuning::<F>::DEFAULT_BOUNDS.1),
            )],
        }
    }
}

impl<F: Float> ThetaTuning<F> {
    /// Default initial theta value
    pub const DEFAULT_INIT: f64 = 1e-1;
    /// Default theta bounds
    pub const DEFAULT_BOUNDS: (f64, f64) = (1e-2, 1e1);

    /// Initial (or fixed) theta value
    pub fn init(&self) -> &Array1<F> {
        match self {
            ThetaTuning::Optimized { init, bounds: _ } => init,
            ThetaTuning::Fixed(init) => init,
        }
    }

    /// Theta bounds, `None` when theta is fixed
    pub fn bounds(&self) -> Option<&Array1<(F, F)>> {
        match self {
            ThetaTuning::Optimized { init: _, bounds } => Some(bounds),
            ThetaTuning::Fixed(_) => None,
        }
    }
}

/// A set of validated Kriging parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "F: Deserialize<'de>"))]
pub struct KrigingValidParams<F: Float> {
    /// Polynomial trend of the model
    pub(crate) regr: RegrPoly,
    /// Correlation kernel
    pub(crate) corr: GaussianCorr,
    /// Tuning of the kernel hyperparameters
    pub(crate) theta_tuning: ThetaTuning<F>,
    /// Number of likelihood optimization restarts
    pub(crate) n_start: usize,
    /// Budget of likelihood evaluations per restart
    pub(crate) max_eval: usize,
    /// Diagonal jitter improving the conditioning of the correlation matrix
    pub(crate) nugget: F,
}

impl<F: Float> Default for KrigingValidParams<F> {
    fn default() -> KrigingValidParams<F> {
        KrigingValidParams {
            regr: RegrPoly::default(),
            corr: GaussianCorr::default(),
            theta_tuning: ThetaTuning::default(),
            n_start: GP_OPTIM_N_START,
            max_eval: GP_OPTIM_MAX_EVAL,
            nugget: F::cast(100.0) * F::epsilon(),
        }
    }
}

impl<F: Float> KrigingValidParams<F> {
    /// Get the polynomial trend
    pub fn regr(&self) -> RegrPoly {
        self.regr
    }

    /// Get the correlation kernel
    pub fn corr(&self) -> &GaussianCorr {
        &self.corr
    }

    /// Get the theta tuning
    pub fn theta_tuning(&self) -> &ThetaTuning<F> {
        &self.theta_tuning
    }

    /// Get the number of optimization restarts
    pub fn n_start(&self) -> usize {
        self.n_start
    }

    /// Get the likelihood evaluation budget per restart
    pub fn max_eval(&self) -> usize {
        self.max_eval
    }

    /// Get the nugget value
    pub fn nugget(&self) -> F {
        self.nugget
    }
}

/// The set of hyperparameters that can be specified for the training of
/// a [Kriging](crate::Kriging) model.
#[derive(Clone, Debug)]
pub struct KrigingParams<F: Float>(KrigingValidParams<F>);

impl<F: Float> Default for KrigingParams<F> {
    fn default() -> Self {
        KrigingParams(KrigingValidParams::default())
    }
}

impl<F: Float> KrigingParams<F> {
    /// Constructor given the polynomial trend
    pub fn new(regr: RegrPoly) -> KrigingParams<F> {
        Self(KrigingValidParams {
            regr,
            ..Default::default()
        })
    }

    /// Constructor from validated parameters
    pub fn new_from_valid(params: &KrigingValidParams<F>) -> Self {
        Self(params.clone())
    }

    /// Set the polynomial trend
    pub fn regr(mut self, regr: RegrPoly) -> Self {
        self.0.regr = regr;
        self
    }

    /// Set the initial theta value.
    ///
    /// When theta is optimized the search starts from `theta_init`,
    /// when theta is fixed this sets its constant value.
    pub fn theta_init(mut self, theta_init: Array1<F>) -> Self {
        self.0.theta_tuning = match self.0.theta_tuning {
            ThetaTuning::Optimized { init: _, bounds } => ThetaTuning::Optimized {
                init: theta_init,
                bounds,
            },
            ThetaTuning::Fixed(_) => ThetaTuning::Fixed(theta_init),
        };
        self
    }

    /// Set the theta search space. No-op when theta is fixed.
    pub fn theta_bounds(mut self, theta_bounds: Array1<(F, F)>) -> Self {
        self.0.theta_tuning = match self.0.theta_tuning {
            ThetaTuning::Optimized { init, bounds: _ } => ThetaTuning::Optimized {
                init,
                bounds: theta_bounds,
            },
            fixed => fixed,
        };
        self
    }

    /// Set the theta tuning
    pub fn theta_tuning(mut self, theta_tuning: ThetaTuning<F>) -> Self {
        self.0.theta_tuning = theta_tuning;
        self
    }

    /// Set the number of likelihood optimization restarts
    pub fn n_start(mut self, n_start: usize) -> Self {
        self.0.n_start = n_start;
        self
    }

    /// Set the likelihood evaluation budget per restart
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.0.max_eval = max_eval;
        self
    }

    /// Set the nugget used to improve numerical stability
    pub fn nugget(mut self, nugget: F) -> Self {
        self.0.nugget = nugget;
        self
    }
}

impl<F: Float> From<KrigingValidParams<F>> for KrigingParams<F> {
    fn from(valid: KrigingValidParams<F>) -> Self {
        KrigingParams(valid)
    }
}

impl<F: Float> ParamGuard for KrigingParams<F> {
    type Checked = KrigingValidParams<F>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        for v in self.0.theta_tuning.init() {
            if *v <= F::zero() {
                return Err(GpError::InvalidValue(format!(
                    "theta values must be strictly positive, got {v}"
                )));
            }
        }
        if let Some(bounds) = self.0.theta_tuning.bounds() {
            for (lo, up) in bounds {
                if *lo <= F::zero() || lo >= up {
                    return Err(GpError::InvalidValue(format!(
                        "theta bounds must satisfy 0 < lower < upper, got ({lo}, {up})"
                    )));
                }
            }
            let init = self.0.theta_tuning.init();
            if bounds.len() == init.len() || bounds.len() == 1 || init.len() == 1 {
                let n = bounds.len().max(init.len());
                for i in 0..n {
                    let v = init[i % init.len()];
                    let (lo, up) = bounds[i % bounds.len()];
                    if v < lo || v > up {
                        return Err(GpError::BadInitialGuess(format!(
                            "theta0[{i}] = {v} outside bounds ({lo}, {up})"
                        )));
                    }
                }
            }
        }
        if self.0.nugget < F::zero() {
            return Err(GpError::InvalidValue("nugget must be >= 0".to_string()));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tuning() {
        let tuning = ThetaTuning::<f64>::default();
        assert_eq!(tuning.init(), &array![0.1]);
        assert_eq!(tuning.bounds().unwrap(), &array![(1e-2, 1e1)]);
    }

    #[test]
    fn test_theta_outside_bounds_rejected() {
        let params = KrigingParams::<f64>::new(RegrPoly::Poly0).theta_init(array![100.]);
        assert!(matches!(
            params.check(),
            Err(GpError::BadInitialGuess(_))
        ));
    }

    #[test]
    fn test_negative_theta_rejected() {
        let params = KrigingParams::<f64>::new(RegrPoly::Poly0)
            .theta_tuning(ThetaTuning::Fixed(array![-1.]));
        assert!(matches!(params.check(), Err(GpError::InvalidValue(_))));
    }

    #[test]
    fn test_valid_params_pass() {
        let params = KrigingParams::<f64>::new(RegrPoly::Poly1)
            .theta_init(array![0.5])
            .n_start(5);
        let checked = params.check().unwrap();
        assert_eq!(checked.n_start(), 5);
        assert_eq!(checked.regr(), RegrPoly::Poly1);
    }
}
