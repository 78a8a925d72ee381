//! Execution-plan preview: what a run would do, without running it.

use crate::SelectionArgs;
use anyhow::Result;
use runlocal_config::StepFilterBuilder;
use runlocal_scheduler::DependencyScheduler;

pub fn preview(selection: &SelectionArgs) -> Result<()> {
    let pipeline = super::load_pipeline(&selection.file)?;
    let filter = StepFilterBuilder::build(super::filter_options(selection), &pipeline);
    let order = DependencyScheduler::execution_order(&pipeline)?;

    println!("Pipeline: {}", pipeline.name);
    println!("Execution order:");

    for id in &order {
        let job = pipeline.job(id).expect("ordered job exists");
        let selected =
            filter.options().jobs.is_empty() || filter.options().jobs.contains(id);

        let note = if job.condition == Some(false) {
            " (skipped: condition is false)"
        } else if !selected {
            " (skipped: job not selected)"
        } else {
            ""
        };
        println!("  {}{}", job.display_name(), note);

        for (index, step) in job.steps.iter().enumerate() {
            let decision = filter.should_execute(step, index, job);
            if decision.should_execute && job.condition != Some(false) && selected {
                println!("    [{}] run  {}", index + 1, step.display_name());
            } else {
                let reason = if !decision.should_execute {
                    decision.reason.as_str()
                } else if job.condition == Some(false) {
                    "condition is false"
                } else {
                    "job not selected"
                };
                println!(
                    "    [{}] skip {} ({})",
                    index + 1,
                    step.display_name(),
                    reason
                );
            }
        }
    }

    let findings = DependencyScheduler::validate_steps(&pipeline);
    for finding in &findings {
        println!(
            "warning: {}/{}: {}",
            finding.job_id, finding.step_id, finding.message
        );
    }

    Ok(())
}
