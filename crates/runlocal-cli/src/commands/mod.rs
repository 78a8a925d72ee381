//! CLI command implementations.

pub mod preview;
pub mod run;
pub mod validate;

use crate::SelectionArgs;
use anyhow::{Context, Result, bail};
use runlocal_config::{FilterOptions, VariableSource, VariableStore};
use runlocal_core::mask::SecretMasker;
use runlocal_core::pipeline::Pipeline;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variables with this prefix are treated as secrets: their
/// values are registered with the masker before anything runs.
pub const SECRET_ENV_PREFIX: &str = "RUNLOCAL_SECRET_";

pub fn load_pipeline(path: &Path) -> Result<Pipeline> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pipeline file: {}", path.display()))?;
    let pipeline: Pipeline = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse pipeline file: {}", path.display()))?;
    if pipeline.jobs.is_empty() {
        bail!("pipeline '{}' has no jobs", pipeline.name);
    }
    Ok(pipeline)
}

/// The project directory a run works on: the directory containing the
/// pipeline file.
pub fn project_dir(pipeline_file: &Path) -> Result<PathBuf> {
    let parent = pipeline_file.parent().filter(|p| !p.as_os_str().is_empty());
    parent
        .unwrap_or(Path::new("."))
        .canonicalize()
        .context("failed to resolve project directory")
}

/// Build the variable store from the process environment, the optional
/// variable file, and `--var` overrides.
pub fn build_store(selection: &SelectionArgs) -> Result<VariableStore> {
    let store = VariableStore::new();
    store.load_environment();

    if let Some(var_file) = &selection.var_file {
        let content = std::fs::read_to_string(var_file)
            .with_context(|| format!("failed to read variable file: {}", var_file.display()))?;
        let values: HashMap<String, String> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse variable file: {}", var_file.display()))?;
        store.set_many(VariableSource::Config, values);
    }

    for var in &selection.vars {
        let Some((key, value)) = var.split_once('=') else {
            bail!("invalid --var '{var}', expected KEY=VALUE");
        };
        store.set(VariableSource::CommandLine, key, value);
    }

    Ok(store)
}

/// Register every `RUNLOCAL_SECRET_*` value from the store as a masked
/// literal.
pub fn build_masker(store: &VariableStore) -> SecretMasker {
    let mut masker = SecretMasker::new();
    for (key, value) in store.snapshot() {
        if key.starts_with(SECRET_ENV_PREFIX) {
            masker.register(value);
        }
    }
    masker
}

pub fn filter_options(selection: &SelectionArgs) -> FilterOptions {
    FilterOptions {
        step_names: selection.steps.iter().cloned().collect(),
        step_indices: selection.indices.iter().copied().collect(),
        skip_names: selection.skips.iter().cloned().collect(),
        skip_indices: selection.skip_indices.iter().copied().collect(),
        jobs: selection.jobs.iter().cloned().collect(),
        include_dependencies: selection.include_deps,
        ..Default::default()
    }
}
