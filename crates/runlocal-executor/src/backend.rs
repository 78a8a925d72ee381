//! Execution backend abstraction.

use async_trait::async_trait;
use runlocal_config::{StepFilter, VariableStore};
use runlocal_core::mask::SecretMasker;
use runlocal_core::pipeline::Job;
use runlocal_core::result::JobResult;
use runlocal_core::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Backend-specific handle to the resource acquired for a job.
#[derive(Debug, Clone)]
pub enum BackendHandle {
    /// A running container the job's steps exec into.
    Container { id: String, name: String },
    /// An isolated host workspace directory.
    Host { workspace: PathBuf },
}

/// Execution state for the current job, with step-scoped copies derived per
/// step and discarded at job end.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub handle: BackendHandle,
    /// Resolved environment for the running scope.
    pub env: HashMap<String, String>,
    /// Where step commands run.
    pub working_dir: PathBuf,
    /// The project directory the run was started for. Equal to
    /// `working_dir` when the backend executes in place.
    pub source: PathBuf,
    pub job_id: String,
    pub step_id: Option<String>,
}

impl ExecutionContext {
    pub fn new(
        handle: BackendHandle,
        env: HashMap<String, String>,
        working_dir: impl Into<PathBuf>,
        source: impl Into<PathBuf>,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            env,
            working_dir: working_dir.into(),
            source: source.into(),
            job_id: job_id.into(),
            step_id: None,
        }
    }

    /// Derive a step-scoped copy with the step's resolved environment merged
    /// over the job's.
    pub fn for_step(&self, step_id: impl Into<String>, step_env: HashMap<String, String>) -> Self {
        let mut env = self.env.clone();
        env.extend(step_env);
        Self {
            handle: self.handle.clone(),
            env,
            working_dir: self.working_dir.clone(),
            source: self.source.clone(),
            job_id: self.job_id.clone(),
            step_id: Some(step_id.into()),
        }
    }
}

/// A job/step runner over one execution substrate.
///
/// Implementations own the Preparing -> Running -> Cleanup lifecycle:
/// the job resource is acquired exactly once, steps run in declared order
/// under the filter and fail-fast rules, and the resource is released on
/// every exit path.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this backend can run jobs on this machine right now.
    async fn is_available(&self) -> bool;

    /// Run one job to completion, returning its aggregated result.
    ///
    /// Cancelling `cancel` terminates any in-flight step, still runs
    /// cleanup, and reports the job as failed.
    async fn run_job(
        &self,
        job: &Job,
        workspace: &Path,
        filter: &StepFilter,
        store: &VariableStore,
        masker: &SecretMasker,
        cancel: CancellationToken,
    ) -> Result<JobResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_scope_merges_env() {
        let mut job_env = HashMap::new();
        job_env.insert("SHARED".to_string(), "job".to_string());
        job_env.insert("JOB_ONLY".to_string(), "yes".to_string());

        let ctx = ExecutionContext::new(
            BackendHandle::Host {
                workspace: PathBuf::from("/tmp/ws"),
            },
            job_env,
            "/tmp/ws",
            "/home/dev/project",
            "build",
        );

        let mut step_env = HashMap::new();
        step_env.insert("SHARED".to_string(), "step".to_string());
        let step_ctx = ctx.for_step("compile", step_env);

        assert_eq!(step_ctx.env["SHARED"], "step");
        assert_eq!(step_ctx.env["JOB_ONLY"], "yes");
        assert_eq!(step_ctx.step_id.as_deref(), Some("compile"));
        assert_eq!(step_ctx.source, PathBuf::from("/home/dev/project"));
        // The job-scoped context is untouched.
        assert_eq!(ctx.env["SHARED"], "job");
        assert!(ctx.step_id.is_none());
    }
}
