//! Core domain types for runlocal.
//!
//! This crate contains:
//! - Pipeline, job, and step definitions (the common model produced by
//!   provider-specific parsers)
//! - Step and job execution results
//! - The per-scope variable context
//! - Secret redaction
//! - Error types shared across the workspace

pub mod context;
pub mod error;
pub mod mask;
pub mod pipeline;
pub mod result;

pub use context::{BackendKind, VariableContext};
pub use error::{Error, Result};
pub use mask::SecretMasker;
