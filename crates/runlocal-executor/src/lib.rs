//! Job execution backends for runlocal.
//!
//! Provides the backend abstraction and two implementations:
//! - Container (one long-lived container per job, steps exec into it)
//! - Host (isolated temp workspace, steps run as spawned processes)

pub mod backend;
pub mod container;
mod drive;
pub mod host;
pub mod steps;

pub use backend::{BackendHandle, ExecutionBackend, ExecutionContext};
pub use container::ContainerBackend;
pub use host::HostBackend;
pub use steps::{StepCommand, StepExecutor, StepExecutorRegistry};
