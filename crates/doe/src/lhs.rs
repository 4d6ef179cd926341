use crate::errors::{DoeError, Result};
use crate::traits::SamplingMethod;
use crate::utils::{min_pdist, unit_vertices};
use linfa::Float;
use ndarray::{concatenate, s, Array, Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_rand::rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};
use std::cmp;
use std::sync::{Arc, RwLock};

/// Number of random column swaps tried per maximin attempt, scaled with
/// the dimension and capped to keep large designs tractable.
fn swaps_per_attempt(nx: usize) -> usize {
    cmp::min(20 * nx, 100)
}

/// Admissible ranges for user-facing LHS settings.
pub const N_SAMPLES_RANGE: (usize, usize) = (3, 10_000);
/// Admissible range for the number of maximin attempts.
pub const N_ITER_RANGE: (usize, usize) = (2, 50);

/// User-facing LHS settings, validated against the admissible ranges
/// before a design is generated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LhsSettings {
    /// Number of stratified samples
    pub n_samples: usize,
    /// Number of maximin optimization attempts
    pub n_iter: usize,
    /// Whether the `2^d` design space vertices are appended
    pub include_vertices: bool,
    /// Optional seed for reproducible designs
    pub seed: Option<u64>,
}

impl Default for LhsSettings {
    fn default() -> Self {
        LhsSettings {
            n_samples: 50,
            n_iter: 5,
            include_vertices: false,
            seed: None,
        }
    }
}

impl LhsSettings {
    /// Checks that every setting lies in its admissible range.
    pub fn validate(&self) -> Result<()> {
        if self.n_samples < N_SAMPLES_RANGE.0 || self.n_samples > N_SAMPLES_RANGE.1 {
            return Err(DoeError::InvalidLhsSetting(format!(
                "n_samples must be within [{}, {}], got {}",
                N_SAMPLES_RANGE.0, N_SAMPLES_RANGE.1, self.n_samples
            )));
        }
        if self.n_iter < N_ITER_RANGE.0 || self.n_iter > N_ITER_RANGE.1 {
            return Err(DoeError::InvalidLhsSetting(format!(
                "n_iter must be within [{}, {}], got {}",
                N_ITER_RANGE.0, N_ITER_RANGE.1, self.n_iter
            )));
        }
        Ok(())
    }
}

type RngRef<R> = Arc<RwLock<R>>;

/// Maximin Latin Hypercube sampler.
///
/// Each dimension is divided into `ns` equal-width strata and one sample is
/// placed at the midpoint of each stratum; columns are then permuted
/// independently. `n_iter` attempts of random column-pair swaps improve the
/// minimum pairwise distance, keeping the incumbent best design. When vertex
/// augmentation is on, the `2^d` corners of the design space are appended as
/// deterministic rows after the optimized samples.
#[derive(Clone, Debug)]
pub struct Lhs<F: Float, R: Rng> {
    /// Sampling space definition as a (nx, 2) matrix
    xlimits: Array2<F>,
    /// Number of maximin attempts
    n_iter: usize,
    /// Whether design space vertices are appended
    include_vertices: bool,
    /// Random generator used for reproducibility
    rng: RngRef<R>,
}

/// LHS with default random generator
impl<F: Float> Lhs<F, Xoshiro256Plus> {
    /// Constructor given a design space as a (nx, 2) matrix `[[lower, upper], ...]`.
    ///
    /// Fails with [DoeError::InvalidBounds] when a lower bound is not strictly
    /// below its upper bound.
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Self> {
        Self::new_with_rng(xlimits, Xoshiro256Plus::from_entropy())
    }
}

impl<F: Float, R: Rng> Lhs<F, R> {
    /// Constructor with given design space and random generator.
    pub fn new_with_rng(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>, rng: R) -> Result<Self> {
        if xlimits.ncols() != 2 {
            return Err(DoeError::InvalidBounds(format!(
                "xlimits must have 2 columns (lower, upper), got {}",
                xlimits.ncols()
            )));
        }
        for (i, row) in xlimits.outer_iter().enumerate() {
            if row[0] >= row[1] {
                return Err(DoeError::InvalidBounds(format!(
                    "component {}: lower bound {} >= upper bound {}",
                    i, row[0], row[1]
                )));
            }
        }
        Ok(Lhs {
            xlimits: xlimits.to_owned(),
            n_iter: 5,
            include_vertices: false,
            rng: Arc::new(RwLock::new(rng)),
        })
    }

    /// Sets the number of maximin attempts.
    pub fn n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter.max(1);
        self
    }

    /// Enables or disables vertex augmentation.
    pub fn include_vertices(mut self, include_vertices: bool) -> Self {
        self.include_vertices = include_vertices;
        self
    }

    /// Sets the random generator.
    pub fn with_rng<R2: Rng>(self, rng: R2) -> Lhs<F, R2> {
        Lhs {
            xlimits: self.xlimits,
            n_iter: self.n_iter,
            include_vertices: self.include_vertices,
            rng: Arc::new(RwLock::new(rng)),
        }
    }

    /// Stratified baseline: one sample at the midpoint of each of the `ns`
    /// equal-width strata, columns permuted independently.
    fn centered_lhs(&self, ns: usize, rng: &mut R) -> Array2<F> {
        let nx = self.xlimits.nrows();
        let cut = Array::linspace(0., 1., ns + 1);

        let a = cut.slice(s![..ns]).to_owned();
        let b = cut.slice(s![1..(ns + 1)]);
        let mut c = (a + b) / 2.;
        let mut lhs = Array2::zeros((ns, nx));
        for j in 0..nx {
            c.as_slice_mut().unwrap().shuffle(rng);
            lhs.column_mut(j).assign(&c.mapv(F::cast));
        }
        lhs
    }

    /// One maximin attempt: random in-column row swaps accepted only when the
    /// minimum pairwise distance increases.
    fn maximin_attempt(&self, lhs: &mut Array2<F>, rng: &mut R) -> F {
        let ns = lhs.nrows();
        let nx = lhs.ncols();
        let mut dmin = min_pdist(lhs);
        for _ in 0..swaps_per_attempt(nx) {
            let j = rng.gen_range(0..nx);
            let i1 = rng.gen_range(0..ns);
            let mut i2 = rng.gen_range(0..ns);
            while i2 == i1 {
                i2 = rng.gen_range(0..ns);
            }
            lhs.swap([i1, j], [i2, j]);
            let d = min_pdist(lhs);
            if d > dmin {
                dmin = d;
            } else {
                // revert, the swap did not help
                lhs.swap([i1, j], [i2, j]);
            }
        }
        dmin
    }
}

impl<F: Float, R: Rng> SamplingMethod<F> for Lhs<F, R> {
    fn sampling_space(&self) -> &Array2<F> {
        &self.xlimits
    }

    fn normalized_sample(&self, ns: usize) -> Result<Array2<F>> {
        if ns < 2 {
            return Err(DoeError::InvalidDesign(format!(
                "at least 2 samples are required, got {ns}"
            )));
        }
        let mut rng = self.rng.write().unwrap();
        let mut best = self.centered_lhs(ns, &mut rng);
        let mut best_dist = min_pdist(&best);
        for _ in 0..self.n_iter {
            let mut attempt = self.centered_lhs(ns, &mut rng);
            let d = self.maximin_attempt(&mut attempt, &mut rng);
            if d > best_dist {
                best_dist = d;
                best = attempt;
            }
        }
        if self.include_vertices {
            let vertices = unit_vertices::<F>(self.xlimits.nrows());
            best = concatenate![Axis(0), best, vertices];
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, array};

    #[test]
    fn test_lhs_strata_coverage() {
        // One sample per stratum in every dimension
        let xlimits = arr2(&[[0., 1.], [0., 1.]]);
        let n = 5;
        let design = Lhs::new(&xlimits)
            .unwrap()
            .with_rng(Xoshiro256Plus::seed_from_u64(0))
            .n_iter(3)
            .sample(n)
            .unwrap();
        assert_eq!(design.dim(), (5, 2));
        for j in 0..2 {
            let mut hits = vec![0usize; n];
            for v in design.column(j) {
                let stratum = ((*v * n as f64).floor() as usize).min(n - 1);
                hits[stratum] += 1;
            }
            assert!(hits.iter().all(|&h| h == 1), "stratum coverage {hits:?}");
        }
    }

    #[test]
    fn test_lhs_determinism() {
        let xlimits = arr2(&[[5., 10.], [0., 1.]]);
        let sample = |seed| {
            Lhs::new(&xlimits)
                .unwrap()
                .with_rng(Xoshiro256Plus::seed_from_u64(seed))
                .n_iter(4)
                .sample(8)
                .unwrap()
        };
        assert_abs_diff_eq!(sample(42), sample(42));
    }

    #[test]
    fn test_lhs_within_bounds() {
        let xlimits = arr2(&[[5., 10.], [-1., 1.]]);
        let design = Lhs::new(&xlimits)
            .unwrap()
            .with_rng(Xoshiro256Plus::seed_from_u64(7))
            .sample(20)
            .unwrap();
        for row in design.outer_iter() {
            assert!(row[0] >= 5. && row[0] <= 10.);
            assert!(row[1] >= -1. && row[1] <= 1.);
        }
    }

    #[test]
    fn test_lhs_vertices() {
        let xlimits = arr2(&[[0., 2.], [1., 3.]]);
        let design = Lhs::new(&xlimits)
            .unwrap()
            .with_rng(Xoshiro256Plus::seed_from_u64(1))
            .include_vertices(true)
            .sample(5)
            .unwrap();
        assert_eq!(design.nrows(), 5 + 4);
        let corners = design.slice(s![5.., ..]);
        let expected = array![[0., 1.], [2., 1.], [0., 3.], [2., 3.]];
        assert_abs_diff_eq!(corners, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_lhs_too_few_samples() {
        let xlimits = arr2(&[[0., 1.]]);
        let res = Lhs::new(&xlimits).unwrap().sample(1);
        assert!(matches!(res, Err(DoeError::InvalidDesign(_))));
    }

    #[test]
    fn test_lhs_bad_bounds() {
        let xlimits = arr2(&[[1., 1.]]);
        assert!(matches!(
            Lhs::<f64, Xoshiro256Plus>::new(&xlimits),
            Err(DoeError::InvalidBounds(_))
        ));
    }

    #[test]
    fn test_lhs_settings_ranges() {
        let ok = LhsSettings {
            n_samples: 10,
            n_iter: 5,
            include_vertices: true,
            seed: Some(0),
        };
        assert!(ok.validate().is_ok());
        let bad = LhsSettings {
            n_samples: 2,
            ..ok.clone()
        };
        assert!(matches!(
            bad.validate(),
            Err(DoeError::InvalidLhsSetting(_))
        ));
        let bad = LhsSettings { n_iter: 51, ..ok };
        assert!(matches!(
            bad.validate(),
            Err(DoeError::InvalidLhsSetting(_))
        ));
    }
}
