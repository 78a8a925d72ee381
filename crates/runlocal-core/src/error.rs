//! Error types for runlocal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Authoring errors: the pipeline definition is wrong.
    #[error("cycle detected in job dependencies: {0}")]
    CycleDetected(String),

    #[error("job '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("invalid reference: {0}")]
    MissingReference(String),

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("no executor registered for step kind '{0}'")]
    UnsupportedStep(String),

    #[error("required variable '{name}' is not set: {message}")]
    VariableRequired { name: String, message: String },

    #[error("unclosed variable placeholder in '{0}'")]
    UnclosedVariable(String),

    // Safety valves in variable expansion.
    #[error("circular variable reference: {0}")]
    CircularVariable(String),

    #[error("variable expansion exceeded depth {depth} while expanding '{name}'")]
    RecursionLimit { name: String, depth: usize },

    // Environment errors: the machine is broken, not the pipeline.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("failed to pull image '{image}': {message}")]
    ImagePull { image: String, message: String },

    #[error("failed to create container: {0}")]
    ContainerCreate(String),

    #[error("failed to exec in container: {0}")]
    ExecSetup(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors whose remediation is fixing the pipeline definition.
    pub fn is_authoring(&self) -> bool {
        matches!(
            self,
            Error::CycleDetected(_)
                | Error::SelfDependency(_)
                | Error::MissingReference(_)
                | Error::InvalidStep(_)
                | Error::UnsupportedStep(_)
                | Error::VariableRequired { .. }
                | Error::UnclosedVariable(_)
        )
    }

    /// True for errors whose remediation is fixing the machine the run is on.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable(_)
                | Error::ImagePull { .. }
                | Error::ContainerCreate(_)
                | Error::ExecSetup(_)
                | Error::ToolNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
