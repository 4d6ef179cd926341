use crate::errors::Result;
use ndarray::{arr1, s, Array, Array1, Array2, Zip};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use socbox_doe::{Lhs, SamplingMethod};

use linfa::prelude::Float;

/// Settings of the pattern search used for the likelihood maximization,
/// all expressed in log10(theta) space.
pub(crate) struct PatternSearchParams {
    /// Initial exploration step
    pub step0: f64,
    /// Step below which the search stops
    pub step_tol: f64,
    /// Maximum number of likelihood evaluations
    pub maxeval: usize,
}

impl Default for PatternSearchParams {
    fn default() -> Self {
        PatternSearchParams {
            step0: 0.5,
            step_tol: 1e-3,
            maxeval: 200,
        }
    }
}

/// Builds the starting points of the multistart likelihood optimization:
/// the user (or default) theta0 plus `n_start` LHS samples spread over the
/// bounds, everything mapped to log10 scale.
pub(crate) fn prepare_multistart<F: Float>(
    n_start: usize,
    theta0: &Array1<F>,
    bounds: &[(F, F)],
) -> Result<(Array2<F>, Vec<(F, F)>)> {
    // Optimization parameter is log10(theta)
    let bounds: Vec<(F, F)> = bounds
        .iter()
        .map(|(lo, up)| (lo.log10(), up.log10()))
        .collect();

    let mut theta0s = Array2::zeros((n_start + 1, theta0.len()));
    theta0s.row_mut(0).assign(&theta0.mapv(|v| F::log10(v)));

    match n_start.cmp(&1) {
        std::cmp::Ordering::Equal => {
            let mut rng = Xoshiro256Plus::seed_from_u64(42);
            let vals = bounds.iter().map(|(a, b)| rng.gen_range(*a..*b)).collect();
            theta0s.row_mut(1).assign(&Array::from_vec(vals))
        }
        std::cmp::Ordering::Greater => {
            let mut xlimits: Array2<F> = Array2::zeros((bounds.len(), 2));
            Zip::from(xlimits.rows_mut())
                .and(&bounds)
                .for_each(|mut row, limits| row.assign(&arr1(&[limits.0, limits.1])));
            // Seeded on purpose: the starting points only need to be spread
            // over the bounds, reproducibility matters more than randomness.
            let seeds = Lhs::new(&xlimits)?
                .with_rng(Xoshiro256Plus::seed_from_u64(42))
                .sample(n_start)?;
            Zip::from(theta0s.slice_mut(s![1.., ..]).rows_mut())
                .and(seeds.rows())
                .for_each(|mut theta, row| theta.assign(&row));
        }
        std::cmp::Ordering::Less => (),
    };
    Ok((theta0s, bounds))
}

/// Minimizes the objective with a Hooke-Jeeves pattern search within bounds.
///
/// Exploratory moves probe each coordinate with the current step and keep the
/// first improvement; a successful exploration triggers a pattern move that
/// doubles down along the improvement direction. The step is halved on
/// failure until it falls below `step_tol` or the evaluation budget runs out.
pub(crate) fn optimize_params<ObjF, F>(
    objfn: ObjF,
    param0: &Array1<F>,
    bounds: &[(F, F)],
    ps: PatternSearchParams,
) -> (f64, Array1<f64>)
where
    ObjF: Fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64,
    F: Float,
{
    let clamp = |x: &mut [f64]| {
        for (v, (lo, up)) in x.iter_mut().zip(bounds) {
            *v = v.max(into_f64(lo)).min(into_f64(up));
        }
    };

    let mut x: Vec<f64> = param0.iter().map(into_f64).collect();
    clamp(&mut x);

    let mut evals = 0usize;
    let mut eval = |x: &[f64], evals: &mut usize| -> f64 {
        *evals += 1;
        let f = objfn(x, None, &mut ());
        if f64::is_nan(f) {
            f64::INFINITY
        } else {
            f
        }
    };

    let mut fx = eval(&x, &mut evals);
    let mut step = ps.step0;

    while step >= ps.step_tol && evals < ps.maxeval {
        // Exploratory moves around the incumbent
        let mut xe = x.clone();
        let mut fe = fx;
        for k in 0..xe.len() {
            for dir in [1.0, -1.0] {
                if evals >= ps.maxeval {
                    break;
                }
                let mut trial = xe.clone();
                trial[k] += dir * step;
                clamp(&mut trial);
                let ft = eval(&trial, &mut evals);
                if ft < fe {
                    fe = ft;
                    xe = trial;
                    break;
                }
            }
        }

        if fe < fx {
            // Pattern move along the improvement direction
            let mut xp: Vec<f64> = xe.iter().zip(&x).map(|(e, b)| 2. * e - b).collect();
            clamp(&mut xp);
            x = xe;
            fx = fe;
            if evals < ps.maxeval {
                let fp = eval(&xp, &mut evals);
                if fp < fx {
                    x = xp;
                    fx = fp;
                }
            }
        } else {
            step *= 0.5;
        }
    }

    (fx, arr1(&x))
}

#[inline(always)]
fn into_f64<F: Float>(v: &F) -> f64 {
    unsafe { *(v as *const F as *const f64) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_pattern_search_quadratic() {
        let objfn = |x: &[f64], _g: Option<&mut [f64]>, _u: &mut ()| -> f64 {
            (x[0] - 0.3).powi(2) + (x[1] + 0.7).powi(2)
        };
        let (fopt, xopt) = optimize_params(
            objfn,
            &array![0., 0.],
            &[(-2., 2.), (-2., 2.)],
            PatternSearchParams {
                step0: 0.5,
                step_tol: 1e-6,
                maxeval: 2000,
            },
        );
        assert!(fopt < 1e-8);
        assert_abs_diff_eq!(xopt[0], 0.3, epsilon = 1e-3);
        assert_abs_diff_eq!(xopt[1], -0.7, epsilon = 1e-3);
    }

    #[test]
    fn test_pattern_search_respects_bounds() {
        let objfn =
            |x: &[f64], _g: Option<&mut [f64]>, _u: &mut ()| -> f64 { (x[0] - 10.).powi(2) };
        let (_, xopt) = optimize_params(
            objfn,
            &array![0.],
            &[(-1., 1.)],
            PatternSearchParams::default(),
        );
        assert_abs_diff_eq!(xopt[0], 1., epsilon = 1e-9);
    }

    #[test]
    fn test_prepare_multistart() {
        let theta0 = array![0.1];
        let (starts, bounds) = prepare_multistart(5, &theta0, &[(1e-2, 1e1)]).unwrap();
        assert_eq!(starts.dim(), (6, 1));
        assert_abs_diff_eq!(starts[[0, 0]], -1.);
        assert_abs_diff_eq!(bounds[0].0, -2.);
        assert_abs_diff_eq!(bounds[0].1, 1.);
        for row in starts.slice(s![1.., ..]).outer_iter() {
            assert!(row[0] >= -2. && row[0] <= 1.);
        }
    }
}
