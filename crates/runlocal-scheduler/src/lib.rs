//! Dependency ordering and pipeline orchestration.

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{PipelineResult, PipelineRunner, RunnerEvent};
pub use scheduler::{DependencyScheduler, ValidationFinding};
