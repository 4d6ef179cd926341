use crate::errors::Result;
use crate::variables::{ExpressionDef, Variable};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use socbox_doe::LhsSettings;
use socbox_gp::{validation::CrossValidation, RegrPoly, ThetaTuning};
use socbox_opt::{CaballeroConfig, CaballeroReport};
use socbox_sim::SampledTable;
use socbox_soc::{Differentials, SizeRanking};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Column-oriented dataframe, `alias -> [values]`
pub type Frame = BTreeMap<String, Vec<f64>>;

/// Variables, expressions and the simulator binding
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationInfo {
    /// Declared simulator variables
    pub variables: Vec<Variable>,
    /// Declared derived expressions
    pub expressions: Vec<ExpressionDef>,
    /// Formulas of the bundled analytic process model, `alias -> formula`
    pub model_formulas: BTreeMap<String, String>,
    /// Formula marking a failed steady state when positive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_when: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Design of experiments settings and results
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoeInfo {
    /// Latin hypercube settings
    pub settings: LhsSettings,
    /// Sampling bounds of each input alias, `alias -> [lower, upper]`
    pub bounds: BTreeMap<String, [f64; 2]>,
    /// Generated design, column oriented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub design: Option<Frame>,
    /// Sweep results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled_table: Option<SampledTable>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Surrogate training and validation settings and results
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetamodelInfo {
    /// Polynomial trend of the trained models
    pub regrpoly: RegrPoly,
    /// Kernel width tuning shared by every model
    pub theta_tuning: ThetaTuning<f64>,
    /// Number of cross-validation folds
    pub kfold: usize,
    /// Cross-validation results per output alias
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<BTreeMap<String, CrossValidation<f64>>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Default for MetamodelInfo {
    fn default() -> Self {
        MetamodelInfo {
            regrpoly: RegrPoly::default(),
            theta_tuning: ThetaTuning::default(),
            kfold: 5,
            validation: None,
            extra: Map::new(),
        }
    }
}

/// Reduced-space optimization settings and results
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducedSpaceInfo {
    /// Trust-region loop tuning
    pub caballero: CaballeroConfig,
    /// External NLP endpoint URL; the in-process solver is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nlp_endpoint: Option<String>,
    /// Optimization outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<CaballeroReport>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Differential extraction settings and results
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialsInfo {
    /// Nominal disturbance values, midpoints of the bounds when unset
    pub nominal_disturbances: BTreeMap<String, f64>,
    /// Expected disturbance magnitudes, `alias -> magnitude`
    pub wd: BTreeMap<String, f64>,
    /// Measurement noise magnitudes, `alias -> magnitude`
    pub wny: BTreeMap<String, f64>,
    /// Extracted bundle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Differentials>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Measurement subset ranking settings and results
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SocInfo {
    /// Requested subset sizes; every size from `n_u` to `n_y` when empty
    pub subset_sizes: Vec<usize>,
    /// Number of best subsets kept per size
    pub bests_per_size: usize,
    /// Ranked subsets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rankings: Option<Vec<SizeRanking>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Default for SocInfo {
    fn default() -> Self {
        SocInfo {
            subset_sizes: Vec::new(),
            bests_per_size: 3,
            rankings: None,
            extra: Map::new(),
        }
    }
}

/// The persisted study, one JSON object with one section per stage.
///
/// Unknown keys inside any section survive a load/save round trip, so
/// files written by newer releases stay intact when touched by older
/// ones.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectFile {
    /// Variables, expressions and simulator binding
    pub simulation_info: SimulationInfo,
    /// Design of experiments
    pub doe_info: DoeInfo,
    /// Surrogate training and validation
    pub metamodel_info: MetamodelInfo,
    /// Reduced-space optimization
    pub reducedspace_info: ReducedSpaceInfo,
    /// Differential extraction
    pub differentials_info: DifferentialsInfo,
    /// Measurement structure ranking
    pub soc_info: SocInfo,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ProjectFile {
    /// Loads a project from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<ProjectFile> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Saves the project as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}
