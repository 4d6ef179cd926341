use thiserror::Error;

/// A result type for simulation driving and expression evaluation
pub type Result<T> = std::result::Result<T, SimError>;

/// An error raised while parsing expressions or driving a simulator
#[derive(Error, Debug)]
pub enum SimError {
    /// When a formula cannot be parsed
    #[error("Parse error: {0}")]
    ParseError(String),
    /// When a formula references an alias absent from the value map
    #[error("Unbound alias: {0}")]
    UnboundAlias(String),
    /// When an evaluation leaves the function domain (log of non-positive,
    /// division by zero, overflow)
    #[error("Domain error: {0}")]
    Domain(String),
    /// When the simulator driver itself fails (lost handle, bad path);
    /// a non-converged run is *not* an error, it is a [`SimStatus::Failed`](crate::SimStatus)
    #[error("Driver error: {0}")]
    DriverError(String),
    /// When inputs are structurally inconsistent (shape or alias mismatch)
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
