//! Pipeline runner. Executes jobs sequentially in dependency order over one
//! execution backend, emitting progress events on a channel.

use crate::scheduler::DependencyScheduler;
use runlocal_config::{StepFilter, VariableStore};
use runlocal_core::mask::SecretMasker;
use runlocal_core::pipeline::{Job, Pipeline};
use runlocal_core::result::{JobResult, SkipReason, StepResult};
use runlocal_core::{Error, Result};
use runlocal_executor::ExecutionBackend;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Event emitted during pipeline execution.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    JobStarted { job: String },
    JobCompleted { job: String, success: bool },
    JobSkipped { job: String, reason: String },
    PipelineCompleted { success: bool },
}

/// Final outcome of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub pipeline: String,
    pub success: bool,
    pub jobs: Vec<JobResult>,
    pub duration_ms: u64,
}

/// Orchestrates one pipeline run.
pub struct PipelineRunner {
    backend: Arc<dyn ExecutionBackend>,
    workspace: PathBuf,
    store: Arc<VariableStore>,
    masker: Arc<SecretMasker>,
}

impl PipelineRunner {
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        workspace: PathBuf,
        store: Arc<VariableStore>,
        masker: Arc<SecretMasker>,
    ) -> Self {
        Self {
            backend,
            workspace,
            store,
            masker,
        }
    }

    /// Execute a pipeline, returning a channel of events and a handle to the
    /// final result.
    pub fn execute(
        &self,
        pipeline: Pipeline,
        filter: StepFilter,
        cancel: CancellationToken,
    ) -> (
        mpsc::Receiver<RunnerEvent>,
        tokio::task::JoinHandle<Result<PipelineResult>>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let backend = self.backend.clone();
        let workspace = self.workspace.clone();
        let store = self.store.clone();
        let masker = self.masker.clone();

        let handle = tokio::spawn(async move {
            Self::execute_inner(backend, workspace, store, masker, pipeline, filter, cancel, tx)
                .await
        });

        (rx, handle)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_inner(
        backend: Arc<dyn ExecutionBackend>,
        workspace: PathBuf,
        store: Arc<VariableStore>,
        masker: Arc<SecretMasker>,
        pipeline: Pipeline,
        filter: StepFilter,
        cancel: CancellationToken,
        tx: mpsc::Sender<RunnerEvent>,
    ) -> Result<PipelineResult> {
        let started = Instant::now();

        // All authoring problems surface before any job resource is
        // acquired.
        let order = DependencyScheduler::execution_order(&pipeline)?;
        let findings = DependencyScheduler::validate_steps(&pipeline);
        if !findings.is_empty() {
            let joined = findings
                .iter()
                .map(|f| format!("{}/{}: {}", f.job_id, f.step_id, f.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::MissingReference(joined));
        }

        let mut results: Vec<JobResult> = Vec::with_capacity(order.len());
        let mut cancelled = false;

        for id in &order {
            let job = pipeline
                .job(id)
                .ok_or_else(|| Error::Internal(format!("ordered job '{id}' not in pipeline")))?;

            if cancel.is_cancelled() {
                warn!(job = %id, "cancelled before job start");
                cancelled = true;
                break;
            }

            // A dependency that failed outright poisons this job and, through
            // it, the rest of the chain.
            let failed_deps: Vec<&str> = job
                .depends_on
                .iter()
                .filter(|dep| {
                    results
                        .iter()
                        .find(|r| r.job_id == **dep)
                        .is_some_and(|r| !r.success)
                })
                .map(String::as_str)
                .collect();
            if !failed_deps.is_empty() {
                let reason = format!("dependency '{}' failed", failed_deps.join("', '"));
                info!(job = %id, reason = %reason, "skipping job");
                let _ = tx
                    .send(RunnerEvent::JobSkipped {
                        job: id.clone(),
                        reason: reason.clone(),
                    })
                    .await;
                results.push(skipped_job(job, SkipReason::DependencyFailed, &reason, false));
                continue;
            }

            // A false condition skips the job without failing it; dependents
            // still run.
            if job.condition == Some(false) {
                let reason = "condition is false".to_string();
                info!(job = %id, "skipping job, condition is false");
                let _ = tx
                    .send(RunnerEvent::JobSkipped {
                        job: id.clone(),
                        reason: reason.clone(),
                    })
                    .await;
                results.push(skipped_job(job, SkipReason::ConditionalSkip, &reason, true));
                continue;
            }

            // A job outside the allow-list is skipped here so no backend
            // resource is acquired for it. Per-step reasons still come from
            // the filter, which lets the skip set take precedence.
            let selected = filter.options().jobs.is_empty() || filter.options().jobs.contains(id);
            if !selected {
                let reason = format!("job '{id}' is not in the selected set");
                let _ = tx
                    .send(RunnerEvent::JobSkipped {
                        job: id.clone(),
                        reason: reason.clone(),
                    })
                    .await;
                results.push(filtered_job(job, &filter));
                continue;
            }

            let _ = tx.send(RunnerEvent::JobStarted { job: id.clone() }).await;

            let result = match backend
                .run_job(job, &workspace, &filter, &store, &masker, cancel.clone())
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    // Job-level fault outside any step (image pull, container
                    // create, image name expansion).
                    error!(job = %id, error = %e, "job failed to run");
                    JobResult {
                        job_id: job.id.clone(),
                        name: job.display_name().to_string(),
                        success: false,
                        steps: vec![],
                        duration_ms: 0,
                        message: Some(masker.mask(&e.to_string())),
                    }
                }
            };

            let _ = tx
                .send(RunnerEvent::JobCompleted {
                    job: id.clone(),
                    success: result.success,
                })
                .await;
            results.push(result);
        }

        let success = !cancelled && results.iter().all(|r| r.success);
        let _ = tx.send(RunnerEvent::PipelineCompleted { success }).await;

        Ok(PipelineResult {
            pipeline: pipeline.name.clone(),
            success,
            jobs: results,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// A job result whose every step carries the same skip reason.
fn skipped_job(job: &Job, reason: SkipReason, detail: &str, success: bool) -> JobResult {
    let steps = job
        .steps
        .iter()
        .map(|s| StepResult::skipped(&s.id, s.display_name(), reason, detail))
        .collect();
    JobResult {
        job_id: job.id.clone(),
        name: job.display_name().to_string(),
        success,
        steps,
        duration_ms: 0,
        message: Some(detail.to_string()),
    }
}

/// A job result for an unselected job, with per-step reasons decided by the
/// filter so explicit skips keep their own reason.
fn filtered_job(job: &Job, filter: &StepFilter) -> JobResult {
    let steps = job
        .steps
        .iter()
        .enumerate()
        .map(|(index, s)| {
            let decision = filter.should_execute(s, index, job);
            StepResult::skipped(
                &s.id,
                s.display_name(),
                decision.skip_reason.unwrap_or(SkipReason::JobNotSelected),
                decision.reason,
            )
        })
        .collect();
    JobResult {
        job_id: job.id.clone(),
        name: job.display_name().to_string(),
        success: true,
        steps,
        duration_ms: 0,
        message: None,
    }
}
