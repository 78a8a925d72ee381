//! Local pipeline execution command.

use crate::{BackendArg, RunArgs};
use anyhow::{Context, Result, bail};
use runlocal_config::StepFilterBuilder;
use runlocal_core::result::{SkipReason, StepStatus};
use runlocal_executor::{ContainerBackend, ExecutionBackend, HostBackend};
use runlocal_scheduler::{PipelineResult, PipelineRunner, RunnerEvent};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub async fn run(args: RunArgs) -> Result<()> {
    let selection = &args.selection;
    let pipeline = super::load_pipeline(&selection.file)?;
    let project = super::project_dir(&selection.file)?;

    let store = Arc::new(super::build_store(selection)?);
    let masker = Arc::new(super::build_masker(&store));

    let filter = StepFilterBuilder::build(super::filter_options(selection), &pipeline);
    for suggestion in filter.suggestions() {
        if suggestion.candidates.is_empty() {
            eprintln!(
                "warning: no step named '{}' in this pipeline",
                suggestion.requested
            );
        } else {
            eprintln!(
                "warning: no step named '{}', did you mean {}?",
                suggestion.requested,
                suggestion
                    .candidates
                    .iter()
                    .map(|c| format!("'{c}'"))
                    .collect::<Vec<_>>()
                    .join(" or ")
            );
        }
    }

    if args.preview {
        return super::preview::preview(selection);
    }

    if args.confirm && !args.yes && !confirm_prompt(&pipeline.name, pipeline.jobs.len())? {
        println!("Aborted.");
        return Ok(());
    }

    let backend: Arc<dyn ExecutionBackend> = match selection.backend {
        BackendArg::Container => {
            Arc::new(ContainerBackend::new().context("failed to connect to container daemon")?)
        }
        BackendArg::Host => Arc::new(HostBackend::new()),
    };
    if !backend.is_available().await {
        bail!("backend '{}' is not available", backend.name());
    }

    println!("Running pipeline: {}", pipeline.name);
    println!(
        "Jobs: {} | Backend: {} | Project: {}",
        pipeline.jobs.len(),
        backend.name(),
        project.display()
    );

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupt received, stopping after the current step...");
            ctrl_c_cancel.cancel();
        }
    });

    let runner = PipelineRunner::new(backend, project, store, masker);
    let (mut rx, result_handle) = runner.execute(pipeline, filter, cancel);

    while let Some(event) = rx.recv().await {
        match event {
            RunnerEvent::JobStarted { job } => {
                println!("> Job '{job}' started");
            }
            RunnerEvent::JobCompleted { job, success } => {
                if success {
                    println!("+ Job '{job}' succeeded");
                } else {
                    println!("x Job '{job}' failed");
                }
            }
            RunnerEvent::JobSkipped { job, reason } => {
                println!("- Job '{job}' skipped: {reason}");
            }
            RunnerEvent::PipelineCompleted { success } => {
                debug!(success, "pipeline completed");
            }
        }
    }

    let result = result_handle
        .await
        .context("pipeline execution task failed")??;

    print_summary(&result);

    if result.success {
        Ok(())
    } else {
        bail!("pipeline '{}' failed", result.pipeline);
    }
}

fn confirm_prompt(pipeline: &str, jobs: usize) -> Result<bool> {
    print!("Run pipeline '{pipeline}' ({jobs} job(s))? [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn print_summary(result: &PipelineResult) {
    println!("\n--- Run summary ---");
    for job in &result.jobs {
        let marker = if job.success { "+" } else { "x" };
        println!(
            "{} {} ({} of {} steps executed, {} ms)",
            marker,
            job.name,
            job.executed_steps(),
            job.steps.len(),
            job.duration_ms
        );
        if let Some(message) = &job.message {
            println!("    {message}");
        }
        for step in &job.steps {
            match &step.status {
                StepStatus::Succeeded => {
                    println!("    + {} ({} ms)", step.name, step.duration_ms);
                }
                StepStatus::Failed { exit_code, message } => match exit_code {
                    Some(code) => println!("    x {} (exit {code})", step.name),
                    None => println!("    x {} ({message})", step.name),
                },
                StepStatus::Skipped { reason, detail } => {
                    println!("    - {} ({}: {detail})", step.name, skip_label(*reason));
                }
            }
        }
    }
    let verdict = if result.success { "succeeded" } else { "failed" };
    println!(
        "\nPipeline '{}' {} in {} ms",
        result.pipeline, verdict, result.duration_ms
    );
}

fn skip_label(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::FilteredOut => "filtered out",
        SkipReason::ExplicitlySkipped => "skipped",
        SkipReason::JobNotSelected => "job not selected",
        SkipReason::ConditionalSkip => "condition false",
        SkipReason::DependencyFailed => "dependency failed",
    }
}
