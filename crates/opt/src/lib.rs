//! Trust-region surrogate optimization of expensive simulations.
//!
//! The [`Caballero`] loop minimizes a simulator objective under inequality
//! constraints using local Kriging surrogates: an initial space-filling
//! design seeds the model, then each iteration solves an NLP over the
//! surrogates inside the current trust region and confirms the candidate
//! with a single true evaluation. The trust region recenters and expands
//! on accepted steps, contracts on rejected ones, and the loop stops on
//! convergence, an exhausted evaluation budget or cancellation, always
//! returning the best point seen.
//!
//! The NLP sub-problem goes to an external IPOPT service over HTTP
//! ([`IpoptHttpClient`]) or, when none is configured, to the in-process
//! [`SlsqpSolver`]. Both implement [`NlpSolver`].
#![warn(missing_docs)]

mod config;
mod errors;
mod ipopt;
mod nlp;
mod solver;

pub use config::CaballeroConfig;
pub use errors::{OptError, Result};
pub use ipopt::{IpoptHttpClient, NLP_HTTP_RETRIES, NLP_HTTP_TIMEOUT_SECS};
pub use nlp::{NlpSolution, NlpSolver, NlpStatus, NlpTolerances, SlsqpSolver, SurrogateProblem};
pub use solver::{
    Caballero, CaballeroReport, ConvergenceStatus, IterationRecord, PlantEvaluator, PlantSample,
};
