use crate::errors::{Result, SocboxError};
use crate::project::{Frame, ProjectFile};
use crate::variables::{VarType, VariableRegistry};
use log::{info, warn};
use ndarray::{s, Array1, Array2};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use socbox_doe::{Lhs, SamplingMethod};
use socbox_gp::validation::k_fold_cv;
use socbox_gp::KrigingParams;
use socbox_opt::{
    Caballero, ConvergenceStatus, NlpSolver, OptError, PlantEvaluator, PlantSample,
};
use socbox_sim::{run_sweep, Expr, ProcessSimulator, RowStatus, SampledTable};
use socbox_soc::{extract_differentials, SocEngine, SocProblem};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// The stages a study runs through
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Design generation and simulator sweep
    Sampling,
    /// Cross-validation of the surrogate configuration
    Validation,
    /// Trust-region surrogate optimization
    Optimization,
    /// Gradient and Hessian extraction at the optimum
    Differentials,
    /// Measurement subset ranking
    Ranking,
}

/// Progress notifications emitted while the pipeline runs
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// A stage began
    StageStarted(Stage),
    /// One sweep row finished
    RowSampled {
        /// 1-based case number
        case: usize,
    },
    /// A stage completed
    StageFinished(Stage),
}

/// Wraps the simulator as the true plant of the optimization loop: the
/// manipulated values are completed with the nominal disturbances and one
/// single-row sweep produces the objective and constraint values.
struct SimulatorPlant<'a> {
    sim: &'a mut dyn ProcessSimulator,
    input_aliases: &'a [String],
    output_aliases: &'a [String],
    expressions: &'a [(String, Expr)],
    d0: &'a Array1<f64>,
    objective: &'a str,
    constraints: &'a [String],
}

impl SimulatorPlant<'_> {
    fn cell(table: &SampledTable, alias: &str) -> socbox_opt::Result<f64> {
        let v = table
            .column(alias)
            .and_then(|c| c.first().copied())
            .unwrap_or(f64::NAN);
        if v.is_finite() {
            Ok(v)
        } else {
            Err(OptError::PlantEvaluation(format!(
                "'{alias}' is not finite at the candidate point"
            )))
        }
    }
}

impl PlantEvaluator for SimulatorPlant<'_> {
    fn n_constraints(&self) -> usize {
        self.constraints.len()
    }

    fn eval(&mut self, u: &Array1<f64>) -> socbox_opt::Result<PlantSample> {
        let n_u = u.len();
        let mut row = Array2::zeros((1, n_u + self.d0.len()));
        row.slice_mut(s![0, ..n_u]).assign(u);
        row.slice_mut(s![0, n_u..]).assign(self.d0);
        let never = AtomicBool::new(false);
        let table = run_sweep(
            self.sim,
            &row,
            self.input_aliases,
            self.output_aliases,
            self.expressions,
            &never,
            |_, _| {},
        )
        .map_err(|e| OptError::PlantEvaluation(e.to_string()))?;
        if table.status().first() != Some(&RowStatus::Ok) {
            return Err(OptError::PlantEvaluation(
                "the simulator did not converge".to_string(),
            ));
        }
        let objective = Self::cell(&table, self.objective)?;
        let mut constraints = Array1::zeros(self.constraints.len());
        for (j, alias) in self.constraints.iter().enumerate() {
            constraints[j] = Self::cell(&table, alias)?;
        }
        Ok(PlantSample {
            objective,
            constraints,
        })
    }
}

/// Runs a whole study from a project definition: sampling, validation,
/// optimization, differentials and subset ranking, filling the matching
/// project sections as it goes.
///
/// Cancellation is cooperative. The flag is honored between sweep rows,
/// between cross-validation fits, between optimizer iterations and between
/// stages; whatever was computed so far is returned in the project, never
/// an error.
pub struct Pipeline {
    project: ProjectFile,
    registry: VariableRegistry,
    u_aliases: Vec<String>,
    d_aliases: Vec<String>,
    candidates: Vec<String>,
    constraints: Vec<String>,
    objective: String,
}

impl Pipeline {
    /// Builds the pipeline, validating the variable and expression
    /// declarations of the project.
    pub fn new(project: ProjectFile) -> Result<Pipeline> {
        let mut registry = VariableRegistry::new();
        for variable in &project.simulation_info.variables {
            registry.add_variable(variable.clone())?;
        }
        for def in &project.simulation_info.expressions {
            registry.add_expression(def.clone())?;
        }
        registry.freeze();

        let u_aliases = registry.aliases_of(VarType::Manipulated);
        if u_aliases.is_empty() {
            return Err(SocboxError::InvalidProject(
                "no manipulated variable declared".to_string(),
            ));
        }
        let objective = registry.objective()?;
        Ok(Pipeline {
            u_aliases,
            d_aliases: registry.aliases_of(VarType::Disturbance),
            candidates: registry.aliases_of(VarType::Candidate),
            constraints: registry.aliases_of(VarType::Constraint),
            objective,
            project,
            registry,
        })
    }

    /// The project being filled.
    pub fn project(&self) -> &ProjectFile {
        &self.project
    }

    fn input_aliases(&self) -> Vec<String> {
        let mut aliases = self.u_aliases.clone();
        aliases.extend(self.d_aliases.iter().cloned());
        aliases
    }

    fn bounds_of(&self, aliases: &[String]) -> Result<Array2<f64>> {
        let mut xlimits = Array2::zeros((aliases.len(), 2));
        for (i, alias) in aliases.iter().enumerate() {
            let [lo, hi] = self.project.doe_info.bounds.get(alias).ok_or_else(|| {
                SocboxError::InvalidProject(format!("no sampling bounds for '{alias}'"))
            })?;
            xlimits[[i, 0]] = *lo;
            xlimits[[i, 1]] = *hi;
        }
        Ok(xlimits)
    }

    fn nominal_disturbances(&self) -> Result<Array1<f64>> {
        let mut d0 = Array1::zeros(self.d_aliases.len());
        for (i, alias) in self.d_aliases.iter().enumerate() {
            d0[i] = match self.project.differentials_info.nominal_disturbances.get(alias) {
                Some(&v) => v,
                None => {
                    let [lo, hi] =
                        self.project.doe_info.bounds.get(alias).ok_or_else(|| {
                            SocboxError::InvalidProject(format!(
                                "no sampling bounds for '{alias}'"
                            ))
                        })?;
                    (lo + hi) / 2.
                }
            };
        }
        Ok(d0)
    }

    fn magnitudes(map: &BTreeMap<String, f64>, aliases: &[String], what: &str) -> Result<Array1<f64>> {
        let mut out = Array1::zeros(aliases.len());
        for (i, alias) in aliases.iter().enumerate() {
            out[i] = *map.get(alias).ok_or_else(|| {
                SocboxError::InvalidProject(format!("no {what} magnitude for '{alias}'"))
            })?;
        }
        Ok(out)
    }

    /// Rows of the sampled table usable for reduced-space refits: converged
    /// and finite across the inputs, the candidates and the objective.
    fn reduced_space_data(
        &self,
        table: &SampledTable,
        input_aliases: &[String],
    ) -> Result<(Array2<f64>, Vec<(String, Array1<f64>)>, Array1<f64>)> {
        let mut involved = input_aliases.to_vec();
        involved.extend(self.candidates.iter().cloned());
        involved.push(self.objective.clone());
        let columns: Vec<&[f64]> = involved
            .iter()
            .map(|alias| {
                table.column(alias).ok_or_else(|| {
                    SocboxError::InvalidProject(format!("no sampled column for '{alias}'"))
                })
            })
            .collect::<Result<_>>()?;
        let rows: Vec<usize> = (0..table.n_rows())
            .filter(|&i| {
                table.status()[i] == RowStatus::Ok
                    && columns.iter().all(|c| c[i].is_finite())
            })
            .collect();

        let nx = input_aliases.len();
        let mut x = Array2::zeros((rows.len(), nx));
        for (r, &i) in rows.iter().enumerate() {
            for c in 0..nx {
                x[[r, c]] = columns[c][i];
            }
        }
        let candidates = self
            .candidates
            .iter()
            .enumerate()
            .map(|(j, alias)| {
                let col = columns[nx + j];
                (
                    alias.clone(),
                    Array1::from_iter(rows.iter().map(|&i| col[i])),
                )
            })
            .collect();
        let obj_col = columns[involved.len() - 1];
        let objective = Array1::from_iter(rows.iter().map(|&i| obj_col[i]));
        Ok((x, candidates, objective))
    }

    /// Runs every stage, returning the filled project. A set cancellation
    /// flag stops the run at the next suspension point with the sections
    /// computed so far.
    pub fn run<S: NlpSolver>(
        mut self,
        sim: &mut dyn ProcessSimulator,
        solver: &S,
        cancel: &AtomicBool,
        mut on_event: impl FnMut(PipelineEvent),
    ) -> Result<ProjectFile> {
        let input_aliases = self.input_aliases();
        let output_aliases = self.registry.output_aliases();
        let expressions = self.registry.compiled_expressions();

        // sampling
        on_event(PipelineEvent::StageStarted(Stage::Sampling));
        let settings = self.project.doe_info.settings.clone();
        settings.validate()?;
        let xlimits = self.bounds_of(&input_aliases)?;
        let mut lhs = Lhs::new(&xlimits)?
            .n_iter(settings.n_iter)
            .include_vertices(settings.include_vertices);
        if let Some(seed) = settings.seed {
            lhs = lhs.with_rng(Xoshiro256Plus::seed_from_u64(seed));
        }
        let design = lhs.sample(settings.n_samples)?;
        let mut frame = Frame::new();
        for (c, alias) in input_aliases.iter().enumerate() {
            frame.insert(alias.clone(), design.column(c).to_vec());
        }
        self.project.doe_info.design = Some(frame);

        let table = run_sweep(
            sim,
            &design,
            &input_aliases,
            &output_aliases,
            &expressions,
            cancel,
            |case, _| on_event(PipelineEvent::RowSampled { case }),
        )?;
        info!(
            "sampling finished: {} of {} cases",
            table.n_rows(),
            design.nrows()
        );
        self.project.doe_info.sampled_table = Some(table.clone());
        on_event(PipelineEvent::StageFinished(Stage::Sampling));
        if cancel.load(Ordering::Relaxed) {
            return Ok(self.project);
        }

        // validation
        on_event(PipelineEvent::StageStarted(Stage::Validation));
        let params: KrigingParams<f64> =
            KrigingParams::new(self.project.metamodel_info.regrpoly)
                .theta_tuning(self.project.metamodel_info.theta_tuning.clone());
        let mut validation = BTreeMap::new();
        let mut trained_aliases = self.candidates.clone();
        trained_aliases.extend(self.constraints.iter().cloned());
        trained_aliases.push(self.objective.clone());
        for alias in &trained_aliases {
            if cancel.load(Ordering::Relaxed) {
                self.project.metamodel_info.validation = Some(validation);
                return Ok(self.project);
            }
            let (x, y) = table.training_data(&input_aliases, alias)?;
            match k_fold_cv(&params, &x, &y, self.project.metamodel_info.kfold, None) {
                Ok(cv) => {
                    validation.insert(alias.clone(), cv);
                }
                Err(e) => warn!("cross-validation of '{alias}' failed: {e}"),
            }
        }
        self.project.metamodel_info.validation = Some(validation);
        on_event(PipelineEvent::StageFinished(Stage::Validation));

        // optimization
        on_event(PipelineEvent::StageStarted(Stage::Optimization));
        let d0 = self.nominal_disturbances()?;
        let u_limits = self.bounds_of(&self.u_aliases)?;
        let report = {
            let mut plant = SimulatorPlant {
                sim,
                input_aliases: &input_aliases,
                output_aliases: &output_aliases,
                expressions: &expressions,
                d0: &d0,
                objective: &self.objective,
                constraints: &self.constraints,
            };
            Caballero::new(&u_limits, solver)?
                .config(self.project.reducedspace_info.caballero.clone())?
                .run(&mut plant, cancel)?
        };
        let u_opt = report.x_opt.clone();
        let cancelled = report.status == ConvergenceStatus::Cancelled;
        self.project.reducedspace_info.report = Some(report);
        on_event(PipelineEvent::StageFinished(Stage::Optimization));
        if cancelled || cancel.load(Ordering::Relaxed) {
            return Ok(self.project);
        }

        // differentials
        on_event(PipelineEvent::StageStarted(Stage::Differentials));
        if self.candidates.is_empty() {
            return Err(SocboxError::InvalidProject(
                "no candidate measurement declared".to_string(),
            ));
        }
        let (x, candidates, objective) = self.reduced_space_data(&table, &input_aliases)?;
        let nominal = ndarray::concatenate![ndarray::Axis(0), u_opt, d0];
        let mut bundle = extract_differentials(
            &x,
            &self.u_aliases,
            &self.d_aliases,
            &candidates,
            (&self.objective, &objective),
            &nominal,
            self.project.metamodel_info.regrpoly,
        )?;
        bundle.regularize_juu()?;
        self.project.differentials_info.bundle = Some(bundle.clone());
        on_event(PipelineEvent::StageFinished(Stage::Differentials));
        if cancel.load(Ordering::Relaxed) {
            return Ok(self.project);
        }

        // ranking
        on_event(PipelineEvent::StageStarted(Stage::Ranking));
        let problem = SocProblem {
            gy: bundle.gy,
            gyd: bundle.gyd,
            juu: bundle.juu,
            jud: bundle.jud,
            wd: Self::magnitudes(
                &self.project.differentials_info.wd,
                &self.d_aliases,
                "disturbance",
            )?,
            wny: Self::magnitudes(
                &self.project.differentials_info.wny,
                &self.candidates,
                "noise",
            )?,
        };
        let engine = SocEngine::new(problem)?;
        let sizes = if self.project.soc_info.subset_sizes.is_empty() {
            (engine.problem().n_u()..=engine.problem().n_y()).collect()
        } else {
            self.project.soc_info.subset_sizes.clone()
        };
        let rankings = engine.rank_subsets(&sizes, self.project.soc_info.bests_per_size)?;
        self.project.soc_info.rankings = Some(rankings);
        on_event(PipelineEvent::StageFinished(Stage::Ranking));

        Ok(self.project)
    }
}
