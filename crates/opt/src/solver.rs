use crate::config::CaballeroConfig;
use crate::errors::{OptError, Result};
use crate::nlp::{NlpSolver, NlpStatus, NlpTolerances, SurrogateProblem};
use linfa::prelude::*;
use log::{debug, info, warn};
use ndarray::{concatenate, Array1, Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};
use socbox_doe::{Lhs, SamplingMethod};
use socbox_gp::Kriging;
use std::sync::atomic::{AtomicBool, Ordering};

/// One true evaluation of the plant at a candidate operating point
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlantSample {
    /// Economic objective value
    pub objective: f64,
    /// Inequality constraint values, `g_j <= 0` when satisfied
    pub constraints: Array1<f64>,
}

/// The true, expensive process model optimized by the loop.
///
/// Implementations wrap a simulator sweep of one point; the loop owns the
/// evaluator exclusively while it runs and never calls it concurrently.
pub trait PlantEvaluator {
    /// Number of inequality constraints returned by `eval`.
    fn n_constraints(&self) -> usize;

    /// Evaluates the plant at `u`. A failed simulation is an error; the
    /// loop degrades it to a rejected iterate.
    fn eval(&mut self, u: &Array1<f64>) -> Result<PlantSample>;
}

/// Why the loop stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    /// Trust region collapsed with no further feasible improvement
    Converged,
    /// The evaluation budget ran out, result is best-so-far
    BudgetExhausted,
    /// Cancellation was requested, result is best-so-far
    Cancelled,
}

/// Trace of one outer iteration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Outer iteration number, starting at 1
    pub iteration: usize,
    /// Candidate point returned by the NLP sub-solve
    pub x: Array1<f64>,
    /// True objective at the candidate, NaN when the evaluation failed
    pub objective: f64,
    /// Largest true constraint value at the candidate
    pub max_violation: f64,
    /// Whether the candidate became the new incumbent
    pub accepted: bool,
    /// Trust-region width fraction after the update
    pub width_frac: f64,
    /// True evaluations consumed so far
    pub n_evals: usize,
}

/// Final state of one optimization run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaballeroReport {
    /// Best point found
    pub x_opt: Array1<f64>,
    /// True objective at `x_opt`
    pub objective: f64,
    /// True constraint values at `x_opt`
    pub constraints: Array1<f64>,
    /// Whether `x_opt` satisfies every constraint within `con_tol`
    pub feasible: bool,
    /// True evaluations consumed
    pub n_evals: usize,
    /// Outer iterations run
    pub n_iterations: usize,
    /// Why the loop stopped
    pub status: ConvergenceStatus,
    /// Per-iteration trace
    pub history: Vec<IterationRecord>,
}

/// Trust-region surrogate optimizer.
///
/// The loop alternates between fitting local Kriging surrogates of the
/// objective and constraints over the true evaluations inside the current
/// trust region, solving the resulting NLP sub-problem, and confirming the
/// candidate with one true evaluation. Accepted steps recenter the region
/// and may expand it when they land near its boundary; rejected steps
/// contract it. An infeasible sub-solve switches the next surrogate build
/// to an exterior penalty objective.
pub struct Caballero<'a, S: NlpSolver> {
    config: CaballeroConfig,
    xlimits: Array2<f64>,
    solver: &'a S,
}

struct Evaluations {
    x: Vec<Array1<f64>>,
    obj: Vec<f64>,
    cons: Vec<Array1<f64>>,
}

impl Evaluations {
    fn push(&mut self, x: Array1<f64>, sample: PlantSample) {
        self.x.push(x);
        self.obj.push(sample.objective);
        self.cons.push(sample.constraints);
    }

    fn max_violation(&self, i: usize) -> f64 {
        self.cons[i].iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v))
    }

    /// Index of the incumbent: best feasible objective, or least violation
    /// when nothing is feasible yet.
    fn incumbent(&self, con_tol: f64) -> usize {
        let mut best: Option<usize> = None;
        for i in 0..self.x.len() {
            if self.max_violation(i).max(0.) <= con_tol && self.obj[i].is_finite() {
                if best.map_or(true, |b| self.obj[i] < self.obj[b]) {
                    best = Some(i);
                }
            }
        }
        best.unwrap_or_else(|| {
            let mut least = 0;
            for i in 1..self.x.len() {
                if self.max_violation(i) < self.max_violation(least) {
                    least = i;
                }
            }
            least
        })
    }
}

impl<'a, S: NlpSolver> Caballero<'a, S> {
    /// Builds an optimizer over the `(nx, 2)` global bounds.
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>, solver: &'a S) -> Result<Self> {
        // reuse the design-space validation of the sampler
        Lhs::<f64, Xoshiro256Plus>::new(xlimits)?;
        Ok(Caballero {
            config: CaballeroConfig::default(),
            xlimits: xlimits.to_owned(),
            solver,
        })
    }

    /// Overrides the loop tuning.
    pub fn config(mut self, config: CaballeroConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    fn n_init(&self) -> usize {
        let nx = self.xlimits.nrows();
        match self.config.n_init {
            0 => (2 * nx + 2).max(5),
            n => n,
        }
    }

    fn min_local_points(&self) -> usize {
        let nx = self.xlimits.nrows();
        let n_basis = self.config.regrpoly.n_basis(nx);
        (n_basis + 2).max(nx + 2)
    }

    /// Rows of the evaluation set inside (or nearest to) the trust region.
    fn local_indices(&self, data: &Evaluations, lo: &Array1<f64>, hi: &Array1<f64>) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..data.x.len())
            .filter(|&i| {
                data.x[i]
                    .iter()
                    .zip(lo.iter().zip(hi.iter()))
                    .all(|(&v, (&l, &h))| v >= l - 1e-12 && v <= h + 1e-12)
            })
            .collect();
        let min_pts = self.min_local_points();
        if idx.len() < min_pts {
            let center = (lo + hi) / 2.;
            let mut by_dist: Vec<usize> = (0..data.x.len()).collect();
            by_dist.sort_by(|&a, &b| {
                let da = (&data.x[a] - &center).mapv(|v| v * v).sum();
                let db = (&data.x[b] - &center).mapv(|v| v * v).sum();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            });
            idx = by_dist.into_iter().take(min_pts.min(data.x.len())).collect();
            idx.sort_unstable();
        }
        // duplicated sites break the correlation matrix conditioning
        let mut kept: Vec<usize> = Vec::with_capacity(idx.len());
        for &i in &idx {
            let dup = kept.iter().any(|&j| {
                (&data.x[i] - &data.x[j]).mapv(f64::abs).sum() < 1e-10
            });
            if !dup {
                kept.push(i);
            }
        }
        kept
    }

    fn fit_local(
        &self,
        data: &Evaluations,
        idx: &[usize],
        values: impl Fn(usize) -> f64,
    ) -> Result<Kriging<f64>> {
        let nx = self.xlimits.nrows();
        let mut x = Array2::zeros((idx.len(), nx));
        let mut y = Array1::zeros(idx.len());
        for (row, &i) in idx.iter().enumerate() {
            x.row_mut(row).assign(&data.x[i]);
            y[row] = values(i);
        }
        Ok(Kriging::params(self.config.regrpoly).fit(&Dataset::new(x, y))?)
    }

    /// Runs the loop until convergence, budget exhaustion or cancellation.
    pub fn run(
        &self,
        plant: &mut dyn PlantEvaluator,
        cancel: &AtomicBool,
    ) -> Result<CaballeroReport> {
        let cfg = &self.config;
        cfg.validate()?;
        let nx = self.xlimits.nrows();
        let m = plant.n_constraints();
        let lb = self.xlimits.column(0).to_owned();
        let ub = self.xlimits.column(1).to_owned();
        let box_width = &ub - &lb;

        let mut data = Evaluations {
            x: Vec::new(),
            obj: Vec::new(),
            cons: Vec::new(),
        };
        let mut n_evals = 0usize;
        let mut history = Vec::new();

        // INIT: evaluate the plant over an initial space-filling design
        let design = Lhs::new(&self.xlimits)?
            .with_rng(Xoshiro256Plus::seed_from_u64(cfg.seed))
            .sample(self.n_init())?;
        info!(
            "initial design: {} points over {} inputs",
            design.nrows(),
            nx
        );
        for row in design.rows() {
            if cancel.load(Ordering::Relaxed) || n_evals >= cfg.maxfunevals {
                break;
            }
            let u = row.to_owned();
            n_evals += 1;
            match plant.eval(&u) {
                Ok(sample) => {
                    if sample.constraints.len() != m {
                        return Err(OptError::InvalidValue(format!(
                            "plant returned {} constraints, expected {m}",
                            sample.constraints.len()
                        )));
                    }
                    data.push(u, sample);
                }
                Err(e) => warn!("initial evaluation failed at {u}: {e}"),
            }
        }
        if data.x.is_empty() {
            if cancel.load(Ordering::Relaxed) {
                return Ok(CaballeroReport {
                    x_opt: (&lb + &ub) / 2.,
                    objective: f64::NAN,
                    constraints: Array1::zeros(m),
                    feasible: false,
                    n_evals,
                    n_iterations: 0,
                    status: ConvergenceStatus::Cancelled,
                    history,
                });
            }
            return Err(OptError::PlantEvaluation(
                "every initial evaluation failed".to_string(),
            ));
        }

        let mut width_frac = cfg.first_factor;
        let mut first_accept_done = false;
        let mut penalty_mode = false;
        let mut iteration = 0usize;
        let iteration_cap = 10 * cfg.maxfunevals;

        let status = loop {
            if cancel.load(Ordering::Relaxed) {
                break ConvergenceStatus::Cancelled;
            }
            if n_evals >= cfg.maxfunevals {
                break ConvergenceStatus::BudgetExhausted;
            }
            if iteration >= iteration_cap {
                warn!("iteration cap hit without using the evaluation budget");
                break ConvergenceStatus::BudgetExhausted;
            }
            iteration += 1;

            let inc = data.incumbent(cfg.con_tol);
            let center = data.x[inc].clone();
            let inc_obj = data.obj[inc];

            // BUILD_LOCAL
            let half = box_width.mapv(|w| w * width_frac / 2.);
            let lo = elementwise_max(&(&center - &half), &lb);
            let hi = elementwise_min(&(&center + &half), &ub);
            let idx = self.local_indices(&data, &lo, &hi);
            debug!(
                "iteration {iteration}: {} local points, width fraction {width_frac:.4}",
                idx.len()
            );
            let penalty_on = penalty_mode;
            let obj_model = self.fit_local(&data, &idx, |i| {
                let mut v = data.obj[i];
                if penalty_on {
                    v += cfg.penalty
                        * data.cons[i].iter().map(|&g| g.max(0.).powi(2)).sum::<f64>();
                }
                v
            });
            let con_models: Result<Vec<_>> = (0..m)
                .map(|j| self.fit_local(&data, &idx, |i| data.cons[i][j]))
                .collect();
            let (obj_model, con_models) = match (obj_model, con_models) {
                (Ok(o), Ok(c)) => (o, c),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("surrogate build failed, contracting: {e}");
                    width_frac *= cfg.tol_contract;
                    if width_frac < cfg.tol1 {
                        break ConvergenceStatus::Converged;
                    }
                    continue;
                }
            };

            // NLP_SOLVE
            let problem = SurrogateProblem {
                objective: &obj_model,
                constraints: &con_models,
                bounds: concatenate![
                    Axis(1),
                    lo.view().insert_axis(Axis(1)),
                    hi.view().insert_axis(Axis(1))
                ],
                xinit: center.clone(),
                tolerances: NlpTolerances {
                    tol: cfg.ipopt_tol,
                    max_iter: cfg.ipopt_max_iter,
                    con_tol: cfg.ipopt_con_tol,
                },
            };
            let solution = self.solver.solve(&problem)?;
            if solution.status == NlpStatus::Error {
                warn!(
                    "NLP sub-solve failed ({}), contracting",
                    solution.message.as_deref().unwrap_or("no message")
                );
                penalty_mode = true;
                width_frac *= cfg.tol_contract;
                if width_frac < cfg.tol1 {
                    break ConvergenceStatus::Converged;
                }
                continue;
            }
            let u = solution.x;

            // TRUE_EVAL
            n_evals += 1;
            let sample = match plant.eval(&u) {
                Ok(sample) => sample,
                Err(e) => {
                    warn!("true evaluation failed at {u}: {e}");
                    width_frac *= cfg.tol_contract;
                    history.push(IterationRecord {
                        iteration,
                        x: u,
                        objective: f64::NAN,
                        max_violation: f64::NAN,
                        accepted: false,
                        width_frac,
                        n_evals,
                    });
                    if width_frac < cfg.tol1 {
                        break ConvergenceStatus::Converged;
                    }
                    continue;
                }
            };
            let violation = sample
                .constraints
                .iter()
                .fold(f64::NEG_INFINITY, |mv, &v| mv.max(v))
                .max(0.);
            let objective = sample.objective;

            // ACCEPT/REJECT then CONTRACT/EXPAND
            let feasible = violation <= cfg.con_tol;
            let improved = objective < inc_obj - cfg.tol2;
            let accepted = feasible && improved;
            if accepted {
                if !first_accept_done {
                    width_frac = cfg.sec_factor;
                    first_accept_done = true;
                }
                let near_boundary = u
                    .iter()
                    .zip(center.iter().zip(half.iter()))
                    .any(|(&v, (&c, &h))| h > 0. && (v - c).abs() >= 0.99 * h);
                if near_boundary {
                    width_frac = (width_frac / cfg.tol_contract).min(cfg.first_factor);
                }
                penalty_mode = false;
                debug!("iteration {iteration}: accepted {objective:.6e} at {u}");
            } else {
                width_frac *= cfg.tol_contract;
                if solution.status == NlpStatus::Infeasible {
                    penalty_mode = true;
                }
            }
            data.push(u.clone(), sample);
            history.push(IterationRecord {
                iteration,
                x: u,
                objective,
                max_violation: violation,
                accepted,
                width_frac,
                n_evals,
            });

            if width_frac < cfg.tol1 && !accepted {
                break ConvergenceStatus::Converged;
            }
        };

        let best = data.incumbent(cfg.con_tol);
        let feasible = data.max_violation(best).max(0.) <= cfg.con_tol;
        info!(
            "stopped after {iteration} iterations and {n_evals} evaluations: {status:?}, \
             objective {:.6e}",
            data.obj[best]
        );
        Ok(CaballeroReport {
            x_opt: data.x[best].clone(),
            objective: data.obj[best],
            constraints: data.cons[best].clone(),
            feasible,
            n_evals,
            n_iterations: iteration,
            status,
            history,
        })
    }
}

fn elementwise_max(a: &Array1<f64>, b: &Array1<f64>) -> Array1<f64> {
    let mut out = a.clone();
    out.zip_mut_with(b, |x, &y| *x = x.max(y));
    out
}

fn elementwise_min(a: &Array1<f64>, b: &Array1<f64>) -> Array1<f64> {
    let mut out = a.clone();
    out.zip_mut_with(b, |x, &y| *x = x.min(y));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::SlsqpSolver;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use socbox_gp::RegrPoly;

    struct QuadraticPlant {
        n_calls: usize,
    }

    impl PlantEvaluator for QuadraticPlant {
        fn n_constraints(&self) -> usize {
            1
        }

        fn eval(&mut self, u: &Array1<f64>) -> Result<PlantSample> {
            self.n_calls += 1;
            Ok(PlantSample {
                objective: (u[0] - 0.3).powi(2) + (u[1] + 0.2).powi(2),
                constraints: array![u[0] + u[1] - 0.4],
            })
        }
    }

    fn config(maxfunevals: usize) -> CaballeroConfig {
        CaballeroConfig {
            maxfunevals,
            regrpoly: RegrPoly::Poly1,
            n_init: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_convex_problem_converges() {
        let xlimits = array![[-1., 1.], [-1., 1.]];
        let solver = SlsqpSolver::new();
        let opt = Caballero::new(&xlimits, &solver)
            .unwrap()
            .config(config(80))
            .unwrap();
        let mut plant = QuadraticPlant { n_calls: 0 };
        let cancel = AtomicBool::new(false);
        let report = opt.run(&mut plant, &cancel).unwrap();

        assert!(report.feasible);
        assert!(report.constraints[0] <= 1e-4 + 1e-12);
        assert!(report.objective < 0.1, "objective {}", report.objective);
        assert_abs_diff_eq!(report.x_opt[0], 0.3, epsilon = 0.2);
        assert_abs_diff_eq!(report.x_opt[1], -0.2, epsilon = 0.2);
        assert_eq!(report.n_evals, plant.n_calls);

        // accepted iterates are non-increasing in objective
        let accepted: Vec<f64> = report
            .history
            .iter()
            .filter(|r| r.accepted)
            .map(|r| r.objective)
            .collect();
        for pair in accepted.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12);
        }
    }

    #[test]
    fn test_budget_exhaustion_is_not_an_error() {
        let xlimits = array![[-1., 1.], [-1., 1.]];
        let solver = SlsqpSolver::new();
        let opt = Caballero::new(&xlimits, &solver)
            .unwrap()
            .config(config(10))
            .unwrap();
        let mut plant = QuadraticPlant { n_calls: 0 };
        let cancel = AtomicBool::new(false);
        let report = opt.run(&mut plant, &cancel).unwrap();
        assert_eq!(report.status, ConvergenceStatus::BudgetExhausted);
        assert_eq!(report.n_evals, 10);
        assert!(report.objective.is_finite());
    }

    #[test]
    fn test_cancellation_returns_partial_result() {
        let xlimits = array![[-1., 1.], [-1., 1.]];
        let solver = SlsqpSolver::new();
        let opt = Caballero::new(&xlimits, &solver)
            .unwrap()
            .config(config(50))
            .unwrap();
        let mut plant = QuadraticPlant { n_calls: 0 };
        let cancel = AtomicBool::new(true);
        let report = opt.run(&mut plant, &cancel).unwrap();
        assert_eq!(report.status, ConvergenceStatus::Cancelled);
        assert_eq!(report.n_evals, 0);
        assert!(report.history.is_empty());
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let solver = SlsqpSolver::new();
        assert!(Caballero::new(&array![[1., 0.]], &solver).is_err());
    }
}
