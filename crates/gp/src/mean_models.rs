use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix1, Ix2};
use serde::{Deserialize, Serialize};

/// Polynomial trend of a Kriging model, selected at runtime.
///
/// The trend fixes the regression basis of the generalized least squares
/// problem solved during training:
/// * `Poly0`: constant basis `[1]` (ordinary Kriging),
/// * `Poly1`: linear basis `[1, x_1, ..., x_nx]`,
/// * `Poly2`: full quadratic basis with cross terms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegrPoly {
    /// Constant trend
    #[default]
    Poly0,
    /// Linear trend
    Poly1,
    /// Quadratic trend with cross terms
    Poly2,
}

impl RegrPoly {
    /// Number of basis functions for an input dimension `nx`.
    pub fn n_basis(&self, nx: usize) -> usize {
        match self {
            RegrPoly::Poly0 => 1,
            RegrPoly::Poly1 => 1 + nx,
            RegrPoly::Poly2 => (nx + 1) * (nx + 2) / 2,
        }
    }

    /// Evaluates the basis functions at n points given as a (n, nx) matrix,
    /// returning a (n, n_basis) matrix.
    pub fn value<F: Float>(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        let (n, nx) = x.dim();
        let mut f = Array2::zeros((n, self.n_basis(nx)));
        f.column_mut(0).fill(F::one());
        if matches!(self, RegrPoly::Poly1 | RegrPoly::Poly2) {
            f.slice_mut(ndarray::s![.., 1..=nx]).assign(x);
        }
        if matches!(self, RegrPoly::Poly2) {
            let mut col = nx + 1;
            for k in 0..nx {
                for l in k..nx {
                    for i in 0..n {
                        f[[i, col]] = x[[i, k]] * x[[i, l]];
                    }
                    col += 1;
                }
            }
        }
        f
    }

    /// Jacobian of the basis functions at a single point, as a
    /// (n_basis, nx) matrix.
    pub fn jacobian<F: Float>(&self, xi: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Array2<F> {
        let nx = xi.len();
        let mut jac = Array2::zeros((self.n_basis(nx), nx));
        if matches!(self, RegrPoly::Poly1 | RegrPoly::Poly2) {
            for k in 0..nx {
                jac[[1 + k, k]] = F::one();
            }
        }
        if matches!(self, RegrPoly::Poly2) {
            let mut row = nx + 1;
            for k in 0..nx {
                for l in k..nx {
                    // d(x_k x_l)/dx_m = delta_km x_l + delta_lm x_k
                    jac[[row, k]] = jac[[row, k]] + xi[l];
                    jac[[row, l]] = jac[[row, l]] + xi[k];
                    row += 1;
                }
            }
        }
        jac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_poly0_value() {
        let x = array![[1., 2.], [3., 4.]];
        let f = RegrPoly::Poly0.value(&x);
        assert_abs_diff_eq!(f, array![[1.], [1.]]);
    }

    #[test]
    fn test_poly1_value_jacobian() {
        let x = array![[2., 3.]];
        let f = RegrPoly::Poly1.value(&x);
        assert_abs_diff_eq!(f, array![[1., 2., 3.]]);
        let jac = RegrPoly::Poly1.jacobian(&x.row(0));
        assert_abs_diff_eq!(jac, array![[0., 0.], [1., 0.], [0., 1.]]);
    }

    #[test]
    fn test_poly2_value() {
        let x = array![[2., 3.]];
        let f = RegrPoly::Poly2.value(&x);
        // [1, x1, x2, x1^2, x1*x2, x2^2]
        assert_abs_diff_eq!(f, array![[1., 2., 3., 4., 6., 9.]]);
    }

    #[test]
    fn test_poly2_jacobian() {
        let xi = array![2., 3.];
        let jac = RegrPoly::Poly2.jacobian(&xi);
        let expected = array![
            [0., 0.],
            [1., 0.],
            [0., 1.],
            [4., 0.],
            [3., 2.],
            [0., 6.]
        ];
        assert_abs_diff_eq!(jac, expected);
    }

    #[test]
    fn test_n_basis() {
        assert_eq!(RegrPoly::Poly0.n_basis(4), 1);
        assert_eq!(RegrPoly::Poly1.n_basis(4), 5);
        assert_eq!(RegrPoly::Poly2.n_basis(2), 6);
        assert_eq!(RegrPoly::Poly2.n_basis(3), 10);
    }
}
