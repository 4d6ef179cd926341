use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix2};
use ndarray_stats::DeviationExt;

/// Computes the minimum pairwise Euclidean distance between rows of a 2D array.
/// This is the quantity maximized by the maximin criterion.
pub fn min_pdist<F: Float>(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> F {
    let nrows = x.nrows();
    let mut dmin = F::infinity();
    for i in 0..nrows {
        for j in (i + 1)..nrows {
            let d = F::cast(x.row(i).l2_dist(&x.row(j)).unwrap());
            if d < dmin {
                dmin = d;
            }
        }
    }
    dmin
}

/// Enumerates the `2^nx` vertices of the unit hypercube `[0, 1]^nx`
/// in binary counting order (row `b` has component `i` set to the ith bit of `b`).
pub fn unit_vertices<F: Float>(nx: usize) -> Array2<F> {
    let n = 1 << nx;
    let mut vertices = Array2::zeros((n, nx));
    for b in 0..n {
        for i in 0..nx {
            if (b >> i) & 1 == 1 {
                vertices[[b, i]] = F::one();
            }
        }
    }
    vertices
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_min_pdist() {
        let x = array![[1., 0., 0.], [0., 1., 0.], [0., 2., 0.], [3., 4., 5.]];
        assert_abs_diff_eq!(min_pdist(&x), 1., epsilon = 1e-12);
    }

    #[test]
    fn test_unit_vertices() {
        let v: Array2<f64> = unit_vertices(2);
        let expected = array![[0., 0.], [1., 0.], [0., 1.], [1., 1.]];
        assert_abs_diff_eq!(v, expected);
    }

    #[test]
    fn test_unit_vertices_count() {
        let v: Array2<f64> = unit_vertices(4);
        assert_eq!(v.dim(), (16, 4));
    }
}
