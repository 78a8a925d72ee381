//! Shared step loop driven by both backends.
//!
//! A backend acquires its job resource, hands a [`CommandRunner`] to
//! [`run_steps`], and releases the resource afterwards. The loop owns
//! filtering, variable expansion, fail-fast, and output masking so the two
//! backends cannot drift apart on those rules.

use crate::backend::ExecutionContext;
use crate::steps::{StepCommand, StepExecutorRegistry};
use async_trait::async_trait;
use runlocal_config::{StepFilter, VariableExpander, VariableStore};
use runlocal_core::context::VariableContext;
use runlocal_core::mask::SecretMasker;
use runlocal_core::pipeline::{Job, Step};
use runlocal_core::result::{SkipReason, StepResult, StepStatus};
use runlocal_core::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How one command invocation ended.
#[derive(Debug)]
pub(crate) enum ExecOutcome {
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    Cancelled,
    TimedOut,
}

/// Executes one prepared command on the backend's substrate.
#[async_trait]
pub(crate) trait CommandRunner: Send + Sync {
    async fn exec(
        &self,
        command: &StepCommand,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<ExecOutcome>;
}

/// Race a command future against its optional per-step timeout.
pub(crate) async fn with_timeout<F>(timeout: Option<Duration>, fut: F) -> Result<ExecOutcome>
where
    F: Future<Output = Result<ExecOutcome>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(ExecOutcome::TimedOut),
        },
        None => fut.await,
    }
}

/// Run a job's steps in declared order.
///
/// Returns the recorded step results and whether the job succeeded. Steps
/// after a fail-fast abort are not recorded. Every failure surfaces as a
/// failed step result rather than an `Err`, so callers always reach cleanup.
pub(crate) async fn run_steps(
    runner: &dyn CommandRunner,
    registry: &StepExecutorRegistry,
    job: &Job,
    job_ctx: &ExecutionContext,
    var_ctx: &VariableContext,
    filter: &StepFilter,
    store: &VariableStore,
    masker: &SecretMasker,
    cancel: &CancellationToken,
) -> (Vec<StepResult>, bool) {
    let mut results = Vec::with_capacity(job.steps.len());
    let mut success = true;

    for (index, step) in job.steps.iter().enumerate() {
        let decision = filter.should_execute(step, index, job);
        if !decision.should_execute {
            debug!(job = %job.id, step = %step.id, reason = %decision.reason, "step skipped");
            results.push(StepResult::skipped(
                &step.id,
                step.display_name(),
                decision.skip_reason.unwrap_or(SkipReason::FilteredOut),
                decision.reason,
            ));
            continue;
        }

        store.update_context(&var_ctx.for_step(step.display_name()));
        let expander = VariableExpander::new(store);

        let started = Instant::now();
        let prepared = expand_step(&expander, store, job, step).and_then(|(expanded, env)| {
            let step_ctx = job_ctx.for_step(&step.id, env);
            let command = registry.prepare(&expanded, &step_ctx)?;
            Ok((command, step_ctx))
        });
        let (command, step_ctx) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                // Authoring faults: record the step as failed and abort the
                // job, continue_on_error does not apply.
                results.push(failed(step, masker.mask(&err.to_string()), started));
                success = false;
                break;
            }
        };

        debug!(job = %job.id, step = %step.id, command = %command.display(), "running step");
        let timeout = step.timeout_minutes.map(|m| Duration::from_secs(m * 60));
        let outcome = runner.exec(&command, &step_ctx, cancel, timeout).await;

        match outcome {
            Ok(ExecOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            }) => {
                let ok = exit_code == 0;
                let status = if ok {
                    StepStatus::Succeeded
                } else {
                    StepStatus::Failed {
                        exit_code: Some(exit_code),
                        message: format!("exited with code {exit_code}"),
                    }
                };
                results.push(StepResult {
                    step_id: step.id.clone(),
                    name: step.display_name().to_string(),
                    status,
                    stdout: masker.mask(&stdout),
                    stderr: masker.mask(&stderr),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                if !ok {
                    success = false;
                    if step.continue_on_error {
                        warn!(job = %job.id, step = %step.id, exit_code, "step failed, continuing");
                        continue;
                    }
                    break;
                }
            }
            Ok(ExecOutcome::TimedOut) => {
                let minutes = step.timeout_minutes.unwrap_or(0);
                results.push(failed(
                    step,
                    format!("timed out after {minutes} minute(s)"),
                    started,
                ));
                success = false;
                if step.continue_on_error {
                    continue;
                }
                break;
            }
            Ok(ExecOutcome::Cancelled) | Err(Error::Cancelled) => {
                results.push(failed(step, "cancelled".to_string(), started));
                success = false;
                break;
            }
            Err(err) => {
                // Environment faults (missing tool, broken exec) abort the
                // job: retrying later steps on a broken machine helps nobody.
                results.push(failed(step, masker.mask(&err.to_string()), started));
                success = false;
                break;
            }
        }
    }

    (results, success)
}

/// Expand the step's command text, params, and environment, and resolve the
/// full environment the command should see.
fn expand_step(
    expander: &VariableExpander<'_>,
    store: &VariableStore,
    job: &Job,
    step: &Step,
) -> Result<(Step, HashMap<String, String>)> {
    let mut expanded = step.clone();
    if let Some(run) = &step.run {
        expanded.run = Some(expander.expand(run)?);
    }
    expanded.with = expander.expand_map(&step.with)?;
    expanded.env = expander.expand_map(&step.env)?;

    let mut env = store.tier_snapshot(runlocal_config::VariableSource::Builtin);
    env.extend(expander.expand_map(&job.env)?);
    env.extend(expanded.env.clone());
    Ok((expanded, env))
}

fn failed(step: &Step, message: String, started: Instant) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        name: step.display_name().to_string(),
        status: StepStatus::Failed {
            exit_code: None,
            message,
        },
        stdout: String::new(),
        stderr: String::new(),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
