use thiserror::Error;

/// A result type for SOC structure selection
pub type Result<T> = std::result::Result<T, SocError>;

/// An error raised while extracting differentials or ranking measurement
/// structures
#[derive(Error, Debug)]
pub enum SocError {
    /// When fewer measurements than unconstrained degrees of freedom are available
    #[error("Not enough measurements: {0}")]
    NotEnoughMeasurements(String),
    /// When a matrix input is structurally inconsistent (shape, symmetry, ordering)
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    /// When a surrogate model cannot be trained or evaluated
    #[error(transparent)]
    GpError(#[from] socbox_gp::GpError),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
}
