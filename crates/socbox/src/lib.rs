//! Workbench for self-optimizing control structure selection.
//!
//! A study goes through five stages, each backed by one of the workspace
//! crates: a maximin Latin hypercube design drives the process simulator
//! over its operating envelope (`socbox-doe`, `socbox-sim`), Kriging
//! surrogates of every recorded quantity are cross-validated
//! (`socbox-gp`), a trust-region loop optimizes the surrogates against
//! the true simulator (`socbox-opt`), analytic gradients and Hessians are
//! extracted at the optimum, and measurement subsets are ranked by their
//! steady-state economic loss (`socbox-soc`).
//!
//! This crate ties the stages together: the [`VariableRegistry`] data
//! model, the JSON [`ProjectFile`] persistence, and the [`Pipeline`] that
//! runs a whole study with progress events and cooperative cancellation.
#![warn(missing_docs)]

mod errors;
mod pipeline;
mod project;
mod variables;

pub use errors::{Result, SocboxError};
pub use pipeline::{Pipeline, PipelineEvent, Stage};
pub use project::{
    DifferentialsInfo, DoeInfo, Frame, MetamodelInfo, ProjectFile, ReducedSpaceInfo,
    SimulationInfo, SocInfo,
};
pub use variables::{ExpressionDef, VarType, Variable, VariableRegistry};
