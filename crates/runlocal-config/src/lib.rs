//! Run-shaping configuration for runlocal.
//!
//! This crate handles:
//! - The layered variable store and its precedence tiers
//! - `${NAME}` placeholder expansion
//! - Step-selection filtering

pub mod expand;
pub mod filter;
pub mod variables;

pub use expand::{DEFAULT_MAX_DEPTH, VariableExpander};
pub use filter::{FilterOptions, FilterResult, FilterSuggestion, StepFilter, StepFilterBuilder};
pub use variables::{VariableSource, VariableStore};
