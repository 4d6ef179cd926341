use crate::errors::{Result, SimError};
use crate::expr::Expr;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of one simulator run. A failed run is a regular outcome
/// recorded in the sampled table, never an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimStatus {
    /// The flowsheet converged, outputs are readable
    Converged,
    /// The flowsheet did not converge
    Failed,
}

/// Variable paths and metadata exposed by a simulator instance
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimCatalog {
    /// Paths of writable input variables
    pub input_paths: Vec<String>,
    /// Paths of readable output variables
    pub output_paths: Vec<String>,
    /// Free-form simulator metadata (version, flowsheet name, ...)
    pub metadata: HashMap<String, String>,
}

/// Contract of an external steady-state process simulator.
///
/// The handle is owned exclusively by the caller for the duration of a
/// sweep; no two operations on the same handle ever overlap. `run` is
/// synchronous and may take seconds to minutes; cancellation is
/// cooperative between runs, a run in flight completes.
pub trait ProcessSimulator {
    /// Writes the given alias-to-value inputs to the flowsheet.
    fn set_inputs(&mut self, inputs: &HashMap<String, f64>) -> Result<()>;

    /// Runs the simulation to steady state.
    fn run(&mut self) -> Result<SimStatus>;

    /// Reads the requested output aliases after a converged run.
    fn read_outputs(&mut self, aliases: &[String]) -> Result<HashMap<String, f64>>;

    /// Describes the variables this simulator exposes.
    fn catalog(&self) -> Result<SimCatalog>;
}

/// An in-process simulator computing its outputs from closed-form
/// expressions over the inputs.
///
/// Serves as the reference collaborator for pipeline tests and as a
/// template for bindings to real simulators. Outputs are evaluated in
/// declaration order, so later outputs may reference earlier ones.
#[derive(Clone, Debug, Default)]
pub struct AnalyticSimulator {
    input_aliases: Vec<String>,
    outputs: Vec<(String, Expr)>,
    fail_when: Option<Expr>,
    inputs: HashMap<String, f64>,
    computed: HashMap<String, f64>,
    has_run: bool,
}

impl AnalyticSimulator {
    /// Creates an empty simulator with no variables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an input alias.
    pub fn input(mut self, alias: &str) -> Self {
        self.input_aliases.push(alias.to_string());
        self
    }

    /// Declares an output alias computed by the given formula.
    pub fn output(mut self, alias: &str, formula: &str) -> Result<Self> {
        let expr = Expr::parse(formula)?;
        self.outputs.push((alias.to_string(), expr));
        Ok(self)
    }

    /// Makes `run` report [SimStatus::Failed] whenever the given formula
    /// evaluates to a positive value on the current inputs.
    pub fn fail_when(mut self, formula: &str) -> Result<Self> {
        self.fail_when = Some(Expr::parse(formula)?);
        Ok(self)
    }
}

impl ProcessSimulator for AnalyticSimulator {
    fn set_inputs(&mut self, inputs: &HashMap<String, f64>) -> Result<()> {
        for alias in inputs.keys() {
            if !self.input_aliases.contains(alias) {
                return Err(SimError::DriverError(format!(
                    "unknown input alias '{alias}'"
                )));
            }
        }
        self.inputs.extend(inputs.iter().map(|(k, v)| (k.clone(), *v)));
        self.has_run = false;
        Ok(())
    }

    fn run(&mut self) -> Result<SimStatus> {
        self.computed.clear();
        if let Some(cond) = &self.fail_when {
            match cond.eval(&self.inputs) {
                Ok(v) if v > 0. => {
                    self.has_run = true;
                    return Ok(SimStatus::Failed);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("failure condition not evaluable: {e}");
                    self.has_run = true;
                    return Ok(SimStatus::Failed);
                }
            }
        }
        let mut env = self.inputs.clone();
        for (alias, expr) in &self.outputs {
            match expr.eval(&env) {
                Ok(v) => {
                    env.insert(alias.clone(), v);
                    self.computed.insert(alias.clone(), v);
                }
                Err(e) => {
                    // not converging is a status, not an error
                    debug!("output '{alias}' not evaluable: {e}");
                    self.has_run = true;
                    return Ok(SimStatus::Failed);
                }
            }
        }
        self.has_run = true;
        Ok(SimStatus::Converged)
    }

    fn read_outputs(&mut self, aliases: &[String]) -> Result<HashMap<String, f64>> {
        if !self.has_run {
            return Err(SimError::DriverError(
                "outputs requested before any run".to_string(),
            ));
        }
        let mut out = HashMap::with_capacity(aliases.len());
        for alias in aliases {
            let v = self.computed.get(alias).ok_or_else(|| {
                SimError::DriverError(format!("unknown output alias '{alias}'"))
            })?;
            out.insert(alias.clone(), *v);
        }
        Ok(out)
    }

    fn catalog(&self) -> Result<SimCatalog> {
        Ok(SimCatalog {
            input_paths: self.input_aliases.clone(),
            output_paths: self.outputs.iter().map(|(a, _)| a.clone()).collect(),
            metadata: HashMap::from([(
                "kind".to_string(),
                "analytic".to_string(),
            )]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn inputs(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_analytic_run() {
        let mut sim = AnalyticSimulator::new()
            .input("x1")
            .input("x2")
            .output("y1", "x1 + x2")
            .unwrap()
            .output("y2", "y1 * 2")
            .unwrap();
        sim.set_inputs(&inputs(&[("x1", 1.), ("x2", 2.)])).unwrap();
        assert_eq!(sim.run().unwrap(), SimStatus::Converged);
        let out = sim
            .read_outputs(&["y1".to_string(), "y2".to_string()])
            .unwrap();
        assert_abs_diff_eq!(out["y1"], 3.);
        assert_abs_diff_eq!(out["y2"], 6.);
    }

    #[test]
    fn test_failure_condition() {
        let mut sim = AnalyticSimulator::new()
            .input("x")
            .output("y", "sqrt(x)")
            .unwrap()
            .fail_when("0 - x")
            .unwrap();
        sim.set_inputs(&inputs(&[("x", 4.)])).unwrap();
        assert_eq!(sim.run().unwrap(), SimStatus::Converged);
        sim.set_inputs(&inputs(&[("x", -1.)])).unwrap();
        assert_eq!(sim.run().unwrap(), SimStatus::Failed);
    }

    #[test]
    fn test_domain_error_fails_the_run() {
        let mut sim = AnalyticSimulator::new()
            .input("x")
            .output("y", "log(x)")
            .unwrap();
        sim.set_inputs(&inputs(&[("x", -3.)])).unwrap();
        assert_eq!(sim.run().unwrap(), SimStatus::Failed);
    }

    #[test]
    fn test_unknown_aliases_rejected() {
        let mut sim = AnalyticSimulator::new().input("x");
        assert!(sim.set_inputs(&inputs(&[("z", 0.)])).is_err());
        assert!(sim.read_outputs(&["y".to_string()]).is_err());
    }

    #[test]
    fn test_catalog() {
        let sim = AnalyticSimulator::new()
            .input("x")
            .output("y", "x * 2")
            .unwrap();
        let cat = sim.catalog().unwrap();
        assert_eq!(cat.input_paths, vec!["x"]);
        assert_eq!(cat.output_paths, vec!["y"]);
    }
}
