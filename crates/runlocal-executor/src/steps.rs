//! Step executors and the kind registry.
//!
//! Each step kind maps to one executor that turns the step into a concrete
//! command. New kinds are added by registering an implementation, never by
//! extending a base type.

use crate::backend::ExecutionContext;
use runlocal_core::pipeline::{Step, StepKind};
use runlocal_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Directory under the workspace where artifact steps stage files.
pub const ARTIFACT_DIR: &str = ".artifacts";

/// A concrete command to run for a step.
///
/// Kept as program + args (not a pre-joined shell line) so host execution
/// can tell a missing tool apart from a failing one at spawn time.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl StepCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Wrap a script in `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.into()],
        }
    }

    /// One-line rendering for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Turns a step of one kind into a runnable command.
pub trait StepExecutor: Send + Sync {
    fn kind(&self) -> StepKind;

    fn prepare(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepCommand>;
}

/// Closed map from step kind to executor.
#[derive(Clone)]
pub struct StepExecutorRegistry {
    executors: HashMap<StepKind, Arc<dyn StepExecutor>>,
}

impl StepExecutorRegistry {
    /// An empty registry. Most callers want [`Self::with_defaults`].
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registry with the built-in executors for every known kind.
    /// `Unknown` deliberately has no entry.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ScriptExecutor));
        registry.register(Arc::new(CheckoutExecutor));
        registry.register(Arc::new(PackageManagerExecutor));
        registry.register(Arc::new(ContainerCommandExecutor));
        registry.register(Arc::new(UploadArtifactExecutor));
        registry.register(Arc::new(DownloadArtifactExecutor));
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(executor.kind(), executor);
    }

    pub fn get(&self, kind: StepKind) -> Option<&Arc<dyn StepExecutor>> {
        self.executors.get(&kind)
    }

    /// Build the command for a step, failing for unregistered kinds.
    pub fn prepare(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepCommand> {
        let executor = self
            .executors
            .get(&step.kind)
            .ok_or_else(|| Error::UnsupportedStep(step.kind.as_str().to_string()))?;
        executor.prepare(step, ctx)
    }
}

impl Default for StepExecutorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Minimal single-quoting for paths and refs interpolated into shell text.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn script_text(step: &Step) -> Result<String> {
    step.run
        .clone()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::InvalidStep(format!("step '{}' has no command text", step.id)))
}

/// `script`: run the step's text through the shell.
struct ScriptExecutor;

impl StepExecutor for ScriptExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Script
    }

    fn prepare(&self, step: &Step, _ctx: &ExecutionContext) -> Result<StepCommand> {
        Ok(StepCommand::shell(script_text(step)?))
    }
}

/// `checkout`: clone a repository into the workspace, or sync the local
/// working tree when no repository is given.
struct CheckoutExecutor;

impl StepExecutor for CheckoutExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Checkout
    }

    fn prepare(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepCommand> {
        let Some(repository) = step.with.get("repository").filter(|r| !r.is_empty()) else {
            if ctx.source == ctx.working_dir {
                // The working tree is already mounted as the workspace.
                return Ok(StepCommand::new("true", vec![]));
            }
            return Ok(StepCommand::shell(format!(
                "cp -R {}/. .",
                quote(&ctx.source.to_string_lossy()),
            )));
        };
        let target = step.with.get("path").map(String::as_str).unwrap_or(".");
        let mut script = format!("git clone {} {}", quote(repository), quote(target));
        if let Some(git_ref) = step.with.get("ref").filter(|r| !r.is_empty()) {
            script.push_str(&format!(" && git -C {} checkout {}", quote(target), quote(git_ref)));
        }
        Ok(StepCommand::shell(script))
    }
}

/// `package_manager`: run a package-manager subcommand as a direct process
/// so a missing manager is a spawn failure, not a shell 127.
struct PackageManagerExecutor;

impl StepExecutor for PackageManagerExecutor {
    fn kind(&self) -> StepKind {
        StepKind::PackageManager
    }

    fn prepare(&self, step: &Step, _ctx: &ExecutionContext) -> Result<StepCommand> {
        let manager = step
            .with
            .get("manager")
            .map(String::as_str)
            .unwrap_or("npm");
        let command = match step.with.get("command") {
            Some(command) if !command.trim().is_empty() => command.clone(),
            _ => script_text(step)?,
        };
        let args: Vec<String> = command.split_whitespace().map(String::from).collect();
        if args.is_empty() {
            return Err(Error::InvalidStep(format!(
                "step '{}' has an empty package manager command",
                step.id
            )));
        }
        Ok(StepCommand::new(manager, args))
    }
}

/// `container_command`: run a declared entrypoint with arguments.
struct ContainerCommandExecutor;

impl StepExecutor for ContainerCommandExecutor {
    fn kind(&self) -> StepKind {
        StepKind::ContainerCommand
    }

    fn prepare(&self, step: &Step, _ctx: &ExecutionContext) -> Result<StepCommand> {
        if let Some(entrypoint) = step.with.get("entrypoint").filter(|e| !e.is_empty()) {
            let args = step
                .with
                .get("args")
                .map(|a| a.split_whitespace().map(String::from).collect())
                .unwrap_or_default();
            return Ok(StepCommand::new(entrypoint.clone(), args));
        }
        Ok(StepCommand::shell(script_text(step)?))
    }
}

/// `upload_artifact`: stage files into the run's artifact directory.
struct UploadArtifactExecutor;

impl StepExecutor for UploadArtifactExecutor {
    fn kind(&self) -> StepKind {
        StepKind::UploadArtifact
    }

    fn prepare(&self, step: &Step, _ctx: &ExecutionContext) -> Result<StepCommand> {
        let path = step
            .with
            .get("path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                Error::InvalidStep(format!("upload step '{}' is missing 'with.path'", step.id))
            })?;
        let name = step
            .with
            .get("name")
            .map(String::as_str)
            .unwrap_or(step.id.as_str());
        let dest = format!("{}/{}", ARTIFACT_DIR, name);
        Ok(StepCommand::shell(format!(
            "mkdir -p {dest} && cp -r {path} {dest}/",
            dest = quote(&dest),
            path = quote(path),
        )))
    }
}

/// `download_artifact`: copy a previously staged artifact back out.
struct DownloadArtifactExecutor;

impl StepExecutor for DownloadArtifactExecutor {
    fn kind(&self) -> StepKind {
        StepKind::DownloadArtifact
    }

    fn prepare(&self, step: &Step, _ctx: &ExecutionContext) -> Result<StepCommand> {
        let name = step
            .with
            .get("name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::InvalidStep(format!("download step '{}' is missing 'with.name'", step.id))
            })?;
        let target = step.with.get("path").map(String::as_str).unwrap_or(".");
        let source = format!("{}/{}", ARTIFACT_DIR, name);
        Ok(StepCommand::shell(format!(
            "mkdir -p {target} && cp -r {source}/. {target}/",
            source = quote(&source),
            target = quote(target),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendHandle;
    use std::path::PathBuf;

    fn make_ctx() -> ExecutionContext {
        ExecutionContext::new(
            BackendHandle::Host {
                workspace: PathBuf::from("/tmp/ws"),
            },
            HashMap::new(),
            "/tmp/ws",
            "/tmp/ws",
            "build",
        )
    }

    fn make_step(kind: StepKind, run: Option<&str>, with: &[(&str, &str)]) -> Step {
        Step {
            id: "s1".to_string(),
            name: String::new(),
            kind,
            run: run.map(String::from),
            with: with
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            needs: vec![],
            continue_on_error: false,
            timeout_minutes: None,
            env: HashMap::new(),
        }
    }

    #[test]
    fn test_script_step_wraps_in_shell() {
        let registry = StepExecutorRegistry::with_defaults();
        let step = make_step(StepKind::Script, Some("echo hi && echo bye"), &[]);
        let cmd = registry.prepare(&step, &make_ctx()).unwrap();
        assert_eq!(cmd.program, "sh");
        assert_eq!(cmd.args, vec!["-c", "echo hi && echo bye"]);
    }

    #[test]
    fn test_script_without_text_is_invalid() {
        let registry = StepExecutorRegistry::with_defaults();
        let step = make_step(StepKind::Script, None, &[]);
        assert!(matches!(
            registry.prepare(&step, &make_ctx()),
            Err(Error::InvalidStep(_))
        ));
    }

    #[test]
    fn test_unknown_kind_has_no_executor() {
        let registry = StepExecutorRegistry::with_defaults();
        let step = make_step(StepKind::Unknown, Some("echo"), &[]);
        assert!(matches!(
            registry.prepare(&step, &make_ctx()),
            Err(Error::UnsupportedStep(_))
        ));
    }

    #[test]
    fn test_checkout_without_repository_is_noop_in_place() {
        let registry = StepExecutorRegistry::with_defaults();
        let step = make_step(StepKind::Checkout, None, &[]);
        let cmd = registry.prepare(&step, &make_ctx()).unwrap();
        assert_eq!(cmd.program, "true");
    }

    #[test]
    fn test_checkout_without_repository_syncs_isolated_workspace() {
        let registry = StepExecutorRegistry::with_defaults();
        let ctx = ExecutionContext::new(
            BackendHandle::Host {
                workspace: PathBuf::from("/tmp/scratch"),
            },
            HashMap::new(),
            "/tmp/scratch",
            "/home/dev/project",
            "build",
        );
        let step = make_step(StepKind::Checkout, None, &[]);
        let cmd = registry.prepare(&step, &ctx).unwrap();
        assert_eq!(cmd.program, "sh");
        assert!(cmd.args[1].contains("/home/dev/project"));
    }

    #[test]
    fn test_checkout_with_repository_and_ref() {
        let registry = StepExecutorRegistry::with_defaults();
        let step = make_step(
            StepKind::Checkout,
            None,
            &[
                ("repository", "https://example.com/repo.git"),
                ("ref", "v1.2"),
                ("path", "src"),
            ],
        );
        let cmd = registry.prepare(&step, &make_ctx()).unwrap();
        assert_eq!(cmd.program, "sh");
        let script = &cmd.args[1];
        assert!(script.contains("git clone 'https://example.com/repo.git' 'src'"));
        assert!(script.contains("checkout 'v1.2'"));
    }

    #[test]
    fn test_package_manager_spawns_tool_directly() {
        let registry = StepExecutorRegistry::with_defaults();
        let step = make_step(
            StepKind::PackageManager,
            None,
            &[("manager", "cargo"), ("command", "build --release")],
        );
        let cmd = registry.prepare(&step, &make_ctx()).unwrap();
        assert_eq!(cmd.program, "cargo");
        assert_eq!(cmd.args, vec!["build", "--release"]);
    }

    #[test]
    fn test_upload_artifact_requires_path() {
        let registry = StepExecutorRegistry::with_defaults();
        let step = make_step(StepKind::UploadArtifact, None, &[]);
        assert!(matches!(
            registry.prepare(&step, &make_ctx()),
            Err(Error::InvalidStep(_))
        ));
    }

    #[test]
    fn test_upload_and_download_round_trip_dirs() {
        let registry = StepExecutorRegistry::with_defaults();
        let upload = make_step(
            StepKind::UploadArtifact,
            None,
            &[("path", "target/out"), ("name", "bundle")],
        );
        let cmd = registry.prepare(&upload, &make_ctx()).unwrap();
        assert!(cmd.args[1].contains(".artifacts/bundle"));

        let download = make_step(StepKind::DownloadArtifact, None, &[("name", "bundle")]);
        let cmd = registry.prepare(&download, &make_ctx()).unwrap();
        assert!(cmd.args[1].contains(".artifacts/bundle"));
    }

    #[test]
    fn test_registering_a_custom_kind() {
        struct NoopUnknown;
        impl StepExecutor for NoopUnknown {
            fn kind(&self) -> StepKind {
                StepKind::Unknown
            }
            fn prepare(&self, _step: &Step, _ctx: &ExecutionContext) -> Result<StepCommand> {
                Ok(StepCommand::new("true", vec![]))
            }
        }

        let mut registry = StepExecutorRegistry::with_defaults();
        registry.register(Arc::new(NoopUnknown));
        let step = make_step(StepKind::Unknown, None, &[]);
        assert_eq!(
            registry.prepare(&step, &make_ctx()).unwrap().program,
            "true"
        );
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("it's"), r"'it'\''s'");
    }
}
