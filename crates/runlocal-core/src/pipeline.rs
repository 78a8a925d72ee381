//! Pipeline, job, and step definitions.
//!
//! These types are the common model a provider-specific parser produces.
//! They are read-only inputs for the duration of a run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A parsed pipeline, ready to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name (e.g., "build-and-test").
    pub name: String,
    /// Jobs in declared order.
    pub jobs: Vec<Job>,
}

impl Pipeline {
    /// Look up a job by id.
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// All job ids in declared order.
    pub fn job_ids(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.id.as_str()).collect()
    }
}

/// A named unit of pipeline work with its own execution environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique id within the pipeline.
    pub id: String,
    /// Display name; falls back to the id when empty.
    #[serde(default)]
    pub name: String,
    /// Target environment descriptor: a container image for the container
    /// backend, an informational tag for the host backend.
    #[serde(default)]
    pub runs_on: String,
    /// Steps in declared order.
    pub steps: Vec<Step>,
    /// Ids of jobs that must complete before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Pre-evaluated boolean condition; `Some(false)` skips the job.
    #[serde(default)]
    pub condition: Option<bool>,
    /// Job-level environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Job {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// The smallest unit of work inside a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique id within the job.
    pub id: String,
    /// Display name; falls back to the id when empty.
    #[serde(default)]
    pub name: String,
    /// What this step does.
    #[serde(default)]
    pub kind: StepKind,
    /// Command or script text, for kinds that carry one.
    #[serde(default)]
    pub run: Option<String>,
    /// Key-value parameters ("with").
    #[serde(default)]
    pub with: HashMap<String, String>,
    /// Ids of sibling steps this step declares as prerequisites.
    /// Validated, but never used to reorder sequential execution.
    #[serde(default)]
    pub needs: Vec<String>,
    /// When true, a failure of this step does not abort the job.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Per-step timeout, minutes.
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
    /// Step-local environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Step {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

/// The closed set of step kinds the executor registry dispatches on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Checkout,
    #[default]
    Script,
    PackageManager,
    ContainerCommand,
    UploadArtifact,
    DownloadArtifact,
    Unknown,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Checkout => "checkout",
            StepKind::Script => "script",
            StepKind::PackageManager => "package_manager",
            StepKind::ContainerCommand => "container_command",
            StepKind::UploadArtifact => "upload_artifact",
            StepKind::DownloadArtifact => "download_artifact",
            StepKind::Unknown => "unknown",
        }
    }
}
