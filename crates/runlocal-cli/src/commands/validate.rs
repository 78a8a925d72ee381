//! Pipeline definition validation.

use anyhow::Result;
use runlocal_scheduler::DependencyScheduler;
use std::path::Path;

pub fn validate(path: &Path) -> Result<()> {
    let pipeline = match super::load_pipeline(path) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            println!("Pipeline error: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = DependencyScheduler::order(&pipeline) {
        println!("Pipeline error: {e}");
        std::process::exit(1);
    }

    let findings = DependencyScheduler::validate_steps(&pipeline);
    for finding in &findings {
        println!(
            "Step reference problem in job '{}': {}",
            finding.job_id, finding.message
        );
    }
    if !findings.is_empty() {
        std::process::exit(1);
    }

    let steps: usize = pipeline.jobs.iter().map(|j| j.steps.len()).sum();
    println!(
        "Pipeline '{}' is valid: {} job(s), {} step(s)",
        pipeline.name,
        pipeline.jobs.len(),
        steps
    );
    Ok(())
}
