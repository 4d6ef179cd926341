use thiserror::Error;

/// A result type for surrogate optimization
pub type Result<T> = std::result::Result<T, OptError>;

/// An error raised during the surrogate optimization loop
#[derive(Error, Debug)]
pub enum OptError {
    /// When the NLP endpoint stays unreachable after the retry budget
    #[error("NLP endpoint unreachable: {0}")]
    NlpNetwork(String),
    /// When the NLP sub-solver reports an internal failure
    #[error("NLP sub-solver failed: {0}")]
    NlpSolver(String),
    /// When the true plant evaluation fails
    #[error("Plant evaluation failed: {0}")]
    PlantEvaluation(String),
    /// When a configuration or an input is structurally invalid
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    /// When a surrogate model cannot be trained
    #[error(transparent)]
    GpError(#[from] socbox_gp::GpError),
    /// When the initial design cannot be generated
    #[error(transparent)]
    DoeError(#[from] socbox_doe::DoeError),
}
