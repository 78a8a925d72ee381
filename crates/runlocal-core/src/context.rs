//! Per-scope context for built-in variable resolution.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The execution substrate a job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Container,
    Host,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Container => "container",
            BackendKind::Host => "host",
        }
    }
}

/// Immutable scope descriptor for variable resolution.
///
/// Entering a job or step derives a new value; an existing context is never
/// mutated in place.
#[derive(Debug, Clone)]
pub struct VariableContext {
    pub workspace: PathBuf,
    pub backend: BackendKind,
    pub job: Option<String>,
    pub step: Option<String>,
}

impl VariableContext {
    pub fn new(workspace: impl Into<PathBuf>, backend: BackendKind) -> Self {
        Self {
            workspace: workspace.into(),
            backend,
            job: None,
            step: None,
        }
    }

    /// Derive the context for entering a job. Clears any step scope.
    pub fn for_job(&self, job: impl Into<String>) -> Self {
        Self {
            workspace: self.workspace.clone(),
            backend: self.backend,
            job: Some(job.into()),
            step: None,
        }
    }

    /// Derive the context for entering a step within the current job.
    pub fn for_step(&self, step: impl Into<String>) -> Self {
        Self {
            workspace: self.workspace.clone(),
            backend: self.backend,
            job: self.job.clone(),
            step: Some(step.into()),
        }
    }
}
