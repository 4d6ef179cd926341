use thiserror::Error;

/// A result type for project and pipeline operations
pub type Result<T> = std::result::Result<T, SocboxError>;

/// An error raised while defining, persisting or running a project
#[derive(Error, Debug)]
pub enum SocboxError {
    /// When a variable or expression alias is declared twice
    #[error("Duplicate alias: {0}")]
    DuplicateAlias(String),
    /// When an alias is referenced but never declared
    #[error("Unknown alias: {0}")]
    UnknownAlias(String),
    /// When the project definition is structurally inconsistent
    #[error("Invalid project: {0}")]
    InvalidProject(String),
    /// When the project file cannot be read or written
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// When the project file is not valid JSON
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// When the design of experiments cannot be generated
    #[error(transparent)]
    Doe(#[from] socbox_doe::DoeError),
    /// When an expression or a simulator interaction fails
    #[error(transparent)]
    Sim(#[from] socbox_sim::SimError),
    /// When a surrogate model cannot be trained or validated
    #[error(transparent)]
    Gp(#[from] socbox_gp::GpError),
    /// When the surrogate optimization loop fails
    #[error(transparent)]
    Opt(#[from] socbox_opt::OptError),
    /// When differentials extraction or subset ranking fails
    #[error(transparent)]
    Soc(#[from] socbox_soc::SocError),
}
