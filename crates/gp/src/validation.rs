use crate::errors::{GpError, Result};
use crate::parameters::KrigingParams;

use linfa::prelude::{Dataset, Fit, Float};
use ndarray::{ArrayBase, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};

/// Prediction quality metrics of a surrogate on a validation set
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(bound(deserialize = "F: Deserialize<'de>"))]
pub struct ValidationMetrics<F: Float> {
    /// Mean squared error
    pub mse: F,
    /// Root mean squared error
    pub rmse: F,
    /// Mean absolute error
    pub mae: F,
    /// Coefficient of determination
    pub r2: F,
    /// Explained variance score
    pub explained_variance: F,
}

impl<F: Float> ValidationMetrics<F> {
    /// Computes the metrics of predictions against reference values.
    pub fn compute(
        y_true: &ArrayBase<impl Data<Elem = F>, Ix1>,
        y_pred: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> ValidationMetrics<F> {
        let n = F::cast(y_true.len());
        let err = y_pred - y_true;
        let mse = err.mapv(|v| v * v).sum() / n;
        let mae = err.mapv(|v| v.abs()).sum() / n;
        let y_mean = y_true.sum() / n;
        let sst = y_true.mapv(|v| (v - y_mean) * (v - y_mean)).sum();
        let sse = err.mapv(|v| v * v).sum();
        let r2 = if sst > F::zero() {
            F::one() - sse / sst
        } else {
            F::zero()
        };
        let err_mean = err.sum() / n;
        let var_err = err.mapv(|v| (v - err_mean) * (v - err_mean)).sum();
        let explained_variance = if sst > F::zero() {
            F::one() - var_err / sst
        } else {
            F::zero()
        };
        ValidationMetrics {
            mse,
            rmse: mse.sqrt(),
            mae,
            r2,
            explained_variance,
        }
    }
}

/// Cross-validation report of a surrogate configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "F: Deserialize<'de>"))]
pub struct CrossValidation<F: Float> {
    /// Metrics of each fold
    pub folds: Vec<ValidationMetrics<F>>,
    /// Fold metrics averaged
    pub mean: ValidationMetrics<F>,
    /// Mean of the full output sample, for scale reference
    pub y_mean: F,
    /// Standard deviation of the full output sample
    pub y_std: F,
}

/// Runs a k-fold cross-validation of the given Kriging configuration.
///
/// Folds are contiguous index blocks by default which keeps reports
/// reproducible on sorted sweep tables; pass a seed in `shuffle` to
/// permute the rows first.
pub fn k_fold_cv<F: Float>(
    params: &KrigingParams<F>,
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    k: usize,
    shuffle: Option<u64>,
) -> Result<CrossValidation<F>> {
    let n = x.nrows();
    if y.len() != n {
        return Err(GpError::InvalidValue(format!(
            "validation set mismatch: {} input rows for {} outputs",
            n,
            y.len()
        )));
    }
    if k < 2 || k > n {
        return Err(GpError::InvalidValue(format!(
            "fold count must be within [2, {n}], got {k}"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    if let Some(seed) = shuffle {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        indices.shuffle(&mut rng);
    }

    let mut folds = Vec::with_capacity(k);
    let base = n / k;
    let extra = n % k;
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        let test_idx = &indices[start..start + size];
        let train_idx: Vec<usize> = indices[..start]
            .iter()
            .chain(&indices[start + size..])
            .copied()
            .collect();
        start += size;

        let x_train = x.select(Axis(0), &train_idx);
        let y_train = y.select(Axis(0), &train_idx);
        let x_test = x.select(Axis(0), test_idx);
        let y_test = y.select(Axis(0), test_idx);

        let model = params
            .clone()
            .fit(&Dataset::new(x_train, y_train))?;
        let y_pred = model.predict(&x_test)?;
        folds.push(ValidationMetrics::compute(&y_test, &y_pred));
    }

    let kf = F::cast(k);
    let acc = |f: fn(&ValidationMetrics<F>) -> F| {
        folds.iter().fold(F::zero(), |a, m| a + f(m)) / kf
    };
    let mean = ValidationMetrics {
        mse: acc(|m| m.mse),
        rmse: acc(|m| m.rmse),
        mae: acc(|m| m.mae),
        r2: acc(|m| m.r2),
        explained_variance: acc(|m| m.explained_variance),
    };

    let y_mean = y.sum() / F::cast(n);
    let y_std = y
        .mapv(|v| (v - y_mean) * (v - y_mean))
        .sum()
        .sqrt()
        / F::cast(n - 1).sqrt();

    Ok(CrossValidation {
        folds,
        mean,
        y_mean,
        y_std,
    })
}

/// Trains on the first `1 - test_fraction` share of the rows and evaluates
/// the metrics on the remaining ones.
pub fn holdout_validate<F: Float>(
    params: &KrigingParams<F>,
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    test_fraction: f64,
) -> Result<ValidationMetrics<F>> {
    let n = x.nrows();
    if !(0.0..1.0).contains(&test_fraction) || test_fraction == 0.0 {
        return Err(GpError::InvalidValue(format!(
            "test fraction must be within (0, 1), got {test_fraction}"
        )));
    }
    let n_test = ((n as f64) * test_fraction).round() as usize;
    let n_test = n_test.clamp(1, n - 1);
    let n_train = n - n_test;

    let x_train = x.slice_axis(Axis(0), ndarray::Slice::from(0..n_train));
    let y_train = y.slice_axis(Axis(0), ndarray::Slice::from(0..n_train));
    let x_test = x.slice_axis(Axis(0), ndarray::Slice::from(n_train..n));
    let y_test = y.slice_axis(Axis(0), ndarray::Slice::from(n_train..n));

    let model = params
        .clone()
        .fit(&Dataset::new(x_train.to_owned(), y_train.to_owned()))?;
    let y_pred = model.predict(&x_test)?;
    Ok(ValidationMetrics::compute(&y_test, &y_pred))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mean_models::RegrPoly;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};
    use ndarray_rand::rand::Rng;

    fn smooth_sample(n: usize) -> (Array2<f64>, Array1<f64>) {
        let mut rng = Xoshiro256Plus::seed_from_u64(3);
        let x = Array2::from_shape_fn((n, 1), |_| rng.gen::<f64>() * 10.);
        let y = x.map_axis(Axis(1), |r| (r[0] / 2.).sin() + 0.1 * r[0]);
        (x, y)
    }

    #[test]
    fn test_metrics_perfect_prediction() {
        let y = Array1::from(vec![1., 2., 3., 4.]);
        let m = ValidationMetrics::compute(&y, &y);
        assert_abs_diff_eq!(m.mse, 0.);
        assert_abs_diff_eq!(m.r2, 1.);
        assert_abs_diff_eq!(m.explained_variance, 1.);
    }

    #[test]
    fn test_metrics_biased_prediction() {
        let y_true = Array1::from(vec![0., 1., 2., 3.]);
        let y_pred = &y_true + 1.;
        let m = ValidationMetrics::compute(&y_true, &y_pred);
        assert_abs_diff_eq!(m.mse, 1.);
        assert_abs_diff_eq!(m.mae, 1.);
        // constant offset leaves the error variance at zero
        assert_abs_diff_eq!(m.explained_variance, 1.);
        assert!(m.r2 < 1.);
    }

    #[test]
    fn test_k_fold_on_smooth_function() {
        let (x, y) = smooth_sample(30);
        let params = KrigingParams::new(RegrPoly::Poly0).n_start(3);
        let cv = k_fold_cv(&params, &x, &y, 5, None).expect("cross validation");
        assert_eq!(cv.folds.len(), 5);
        assert!(cv.mean.r2 > 0.9, "poor fit: r2 = {}", cv.mean.r2);
        assert!(cv.y_std > 0.);
    }

    #[test]
    fn test_k_fold_shuffled_is_deterministic() {
        let (x, y) = smooth_sample(20);
        let params = KrigingParams::new(RegrPoly::Poly0).n_start(2);
        let a = k_fold_cv(&params, &x, &y, 4, Some(7)).unwrap();
        let b = k_fold_cv(&params, &x, &y, 4, Some(7)).unwrap();
        assert_abs_diff_eq!(a.mean.rmse, b.mean.rmse);
    }

    #[test]
    fn test_bad_fold_count() {
        let (x, y) = smooth_sample(10);
        let params = KrigingParams::new(RegrPoly::Poly0);
        assert!(matches!(
            k_fold_cv(&params, &x, &y, 1, None),
            Err(GpError::InvalidValue(_))
        ));
        assert!(matches!(
            k_fold_cv(&params, &x, &y, 11, None),
            Err(GpError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_holdout() {
        let (x, y) = smooth_sample(25);
        let params = KrigingParams::new(RegrPoly::Poly0).n_start(3);
        let m = holdout_validate(&params, &x, &y, 0.2).expect("holdout");
        assert!(m.rmse >= 0.);
        assert!(matches!(
            holdout_validate(&params, &x, &y, 0.),
            Err(GpError::InvalidValue(_))
        ));
    }
}
