use linfa::Float;
use ndarray::{s, Array1, Array2, ArrayBase, Axis, Data, Ix2};
use serde::{Deserialize, Serialize};

/// A (n, dim) matrix stored together with the column means and standard
/// deviations used to normalize it. Constant columns get a unit deviation
/// so that normalization never divides by zero.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "F: Deserialize<'de>"))]
pub(crate) struct NormalizedData<F: Float> {
    /// normalized data
    pub data: Array2<F>,
    /// column means of the raw data
    pub mean: Array1<F>,
    /// column standard deviations of the raw data
    pub std: Array1<F>,
}

impl<F: Float> NormalizedData<F> {
    pub fn new(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> NormalizedData<F> {
        let (data, mean, std) = normalize(x);
        NormalizedData { data, mean, std }
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }
}

pub(crate) fn normalize<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> (Array2<F>, Array1<F>, Array1<F>) {
    let x_mean = x.mean_axis(Axis(0)).unwrap();
    let mut x_std = x.std_axis(Axis(0), F::one());
    x_std.mapv_inplace(|v| if v == F::zero() { F::one() } else { v });
    let xnorm = (x - &x_mean) / &x_std;
    (xnorm, x_mean, x_std)
}

/// Componentwise absolute differences between the `n*(n-1)/2` pairs of rows
/// of the training set, retained to build correlation matrices without
/// recomputing distances at each likelihood evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "F: Deserialize<'de>"))]
pub struct DiffMatrix<F: Float> {
    /// Differences as a (n*(n-1)/2, nx) array
    pub d: Array2<F>,
    /// Row index pairs of each difference in the training array
    pub d_indices: Array2<usize>,
    /// Number of observations
    pub n_obs: usize,
}

impl<F: Float> DiffMatrix<F> {
    /// Computes the pairwise differences of the rows of a (n_obs, nx) array.
    pub fn new(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> DiffMatrix<F> {
        let n_obs = x.nrows();
        let nx = x.ncols();
        let n_pairs = n_obs * (n_obs - 1) / 2;
        let mut indices = Array2::<usize>::zeros((n_pairs, 2));
        let mut d = Array2::zeros((n_pairs, nx));
        let mut idx = 0;
        for k in 0..(n_obs - 1) {
            let idx0 = idx;
            idx += n_obs - k - 1;
            for i in (k + 1)..n_obs {
                let r = idx0 + i - k - 1;
                indices[[r, 0]] = k;
                indices[[r, 1]] = i;
            }
            let diff = &x.slice(s![k, ..]) - &x.slice(s![k + 1..n_obs, ..]);
            d.slice_mut(s![idx0..idx, ..]).assign(&diff);
        }
        d.mapv_inplace(|v| v.abs());

        DiffMatrix {
            d,
            d_indices: indices,
            n_obs,
        }
    }
}

/// Differences between each row of x and each row of y as a
/// (nrows(x) * nrows(y), ncols) array; *panics* when column counts differ.
pub fn pairwise_differences<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    assert!(x.ncols() == y.ncols());

    let nx = x.nrows();
    let ny = y.nrows();
    let ncols = x.ncols();
    let mut result = Array2::zeros((nx * ny, ncols));
    for (i, x_row) in x.rows().into_iter().enumerate() {
        for (j, y_row) in y.rows().into_iter().enumerate() {
            let idx = i * ny + j;
            for k in 0..ncols {
                result[[idx, k]] = x_row[k] - y_row[k];
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_normalized_data() {
        let x = array![[1., 2.], [3., 4.]];
        let xnorm = NormalizedData::new(&x);
        assert_eq!(xnorm.ncols(), 2);
        assert_eq!(array![2., 3.], xnorm.mean);
        assert_eq!(array![f64::sqrt(2.), f64::sqrt(2.)], xnorm.std);
    }

    #[test]
    fn test_normalize_constant_column() {
        let x = array![[1., 5.], [1., 7.], [1., 9.]];
        let (_, _, std) = normalize(&x);
        assert_abs_diff_eq!(std[0], 1.);
        assert_abs_diff_eq!(std[1], 2.);
    }

    #[test]
    fn test_diff_matrix() {
        let xt = array![[0.5], [1.2], [2.0]];
        let dm = DiffMatrix::new(&xt);
        assert_eq!(dm.n_obs, 3);
        assert_abs_diff_eq!(dm.d, array![[0.7], [1.5], [0.8]], epsilon = 1e-12);
        assert_eq!(dm.d_indices, array![[0, 1], [0, 2], [1, 2]]);
    }

    #[test]
    fn test_pairwise_differences() {
        let x = array![[1., 2.]];
        let y = array![[0., 0.], [1., 1.]];
        let d = pairwise_differences(&x, &y);
        assert_abs_diff_eq!(d, array![[1., 2.], [0., 1.]]);
    }
}
