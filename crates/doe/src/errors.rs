use thiserror::Error;

/// A result type for DoE generation
pub type Result<T> = std::result::Result<T, DoeError>;

/// An error raised while building a design of experiments
#[derive(Error, Debug)]
pub enum DoeError {
    /// When the requested design cannot be built (e.g. not enough samples)
    #[error("Invalid design: {0}")]
    InvalidDesign(String),
    /// When the design space bounds are inconsistent
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),
    /// When an LHS setting is outside its admissible range
    #[error("Invalid LHS setting: {0}")]
    InvalidLhsSetting(String),
}
