use thiserror::Error;

/// A result type for Kriging training and prediction
pub type Result<T> = std::result::Result<T, GpError>;

/// An error raised while training or evaluating a [`Kriging`](crate::Kriging) model
#[derive(Error, Debug)]
pub enum GpError {
    /// When the correlation matrix cannot be factorized for any admissible theta
    #[error("Ill-conditioned correlation matrix: {0}")]
    IllConditioned(String),
    /// When the likelihood computation fails for a given theta
    #[error("Likelihood computation error: {0}")]
    LikelihoodComputation(String),
    /// When the initial theta guess is outside the optimization bounds
    #[error("Bad initial guess: {0}")]
    BadInitialGuess(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When a design of experiments cannot be built
    #[error(transparent)]
    DoeError(#[from] socbox_doe::DoeError),
    /// When a parameter or input value is inconsistent
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
