//! Container execution backend.
//!
//! One long-lived container per job: created from the job's image during
//! Preparing, kept alive with a sleep entrypoint, and every step execs into
//! it so filesystem state carries across steps. The container is stopped and
//! removed on every exit path, including cancellation.

use crate::backend::{BackendHandle, ExecutionBackend, ExecutionContext};
use crate::drive::{self, CommandRunner, ExecOutcome};
use crate::steps::{StepCommand, StepExecutorRegistry};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use runlocal_config::{StepFilter, VariableExpander, VariableStore};
use runlocal_core::context::{BackendKind, VariableContext};
use runlocal_core::mask::SecretMasker;
use runlocal_core::pipeline::Job;
use runlocal_core::result::JobResult;
use runlocal_core::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where the project directory is mounted inside job containers.
const CONTAINER_WORKSPACE: &str = "/workspace";

const DEFAULT_IMAGE: &str = "alpine:latest";

pub struct ContainerBackend {
    docker: Docker,
    registry: StepExecutorRegistry,
}

impl ContainerBackend {
    /// Connect to the local container daemon.
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;
        Ok(Self::with_client(docker))
    }

    /// Create with a custom client.
    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            registry: StepExecutorRegistry::with_defaults(),
        }
    }

    fn container_name(job_id: &str) -> String {
        // Random suffix so repeated runs of the same job never collide.
        let suffix = Uuid::new_v4().simple().to_string();
        format!("runlocal-job-{}-{}", job_id, &suffix[..8])
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image = %image, "pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(status = %status, "pull progress");
                    }
                }
                Err(e) => {
                    // A pull error for a locally cached image is not fatal;
                    // the inspect below decides.
                    warn!(error = %e, "pull warning");
                }
            }
        }

        self.docker
            .inspect_image(image)
            .await
            .map_err(|e| Error::ImagePull {
                image: image.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Create and start the job container. Mounts the project directory at
    /// [`CONTAINER_WORKSPACE`] and parks the entrypoint so steps can exec in.
    async fn prepare_container(
        &self,
        image: &str,
        name: &str,
        workspace: &Path,
    ) -> Result<String> {
        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                workspace.display(),
                CONTAINER_WORKSPACE
            )]),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "sleep infinity".to_string(),
            ]),
            working_dir: Some(CONTAINER_WORKSPACE.to_string()),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        info!(container = %name, image = %image, "creating job container");
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::ContainerCreate(e.to_string()))?;

        if let Err(e) = self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            // Created but never started: remove before reporting.
            self.cleanup_container(name).await;
            return Err(Error::ContainerCreate(e.to_string()));
        }

        Ok(container.id)
    }

    /// Stop and remove the job container. Failures are logged, never
    /// propagated: cleanup runs on paths that already carry an error.
    async fn cleanup_container(&self, name: &str) {
        if let Err(e) = self
            .docker
            .stop_container(name, Some(StopContainerOptions { t: 5 }))
            .await
        {
            debug!(container = %name, error = %e, "stop during cleanup failed");
        }

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(name, Some(options)).await {
            warn!(container = %name, error = %e, "failed to remove job container");
        }
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn run_job(
        &self,
        job: &Job,
        workspace: &Path,
        filter: &StepFilter,
        store: &VariableStore,
        masker: &SecretMasker,
        cancel: CancellationToken,
    ) -> Result<JobResult> {
        let started = Instant::now();

        let var_ctx = VariableContext::new(CONTAINER_WORKSPACE, BackendKind::Container)
            .for_job(job.display_name());
        store.update_context(&var_ctx);

        let image = {
            let expander = VariableExpander::new(store);
            let raw = if job.runs_on.is_empty() {
                DEFAULT_IMAGE
            } else {
                job.runs_on.as_str()
            };
            expander.expand(raw)?
        };

        // Preparing: acquire the one container this job runs in.
        self.pull_image(&image).await?;
        let name = Self::container_name(&job.id);
        let container_id = self.prepare_container(&image, &name, workspace).await?;

        let handle = BackendHandle::Container {
            id: container_id,
            name: name.clone(),
        };
        let job_ctx = ExecutionContext::new(
            handle,
            HashMap::new(),
            CONTAINER_WORKSPACE,
            CONTAINER_WORKSPACE,
            &job.id,
        );

        let runner = ContainerRunner {
            docker: &self.docker,
            container: &name,
        };
        let (steps, success) = drive::run_steps(
            &runner, &self.registry, job, &job_ctx, &var_ctx, filter, store, masker, &cancel,
        )
        .await;

        // Cleanup runs whatever happened above.
        self.cleanup_container(&name).await;

        Ok(JobResult {
            job_id: job.id.clone(),
            name: job.display_name().to_string(),
            success,
            steps,
            duration_ms: started.elapsed().as_millis() as u64,
            message: None,
        })
    }
}

struct ContainerRunner<'a> {
    docker: &'a Docker,
    container: &'a str,
}

impl ContainerRunner<'_> {
    async fn exec_once(
        &self,
        command: &StepCommand,
        ctx: &ExecutionContext,
    ) -> Result<ExecOutcome> {
        let env: Vec<String> = ctx.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let mut cmd = vec![command.program.clone()];
        cmd.extend(command.args.iter().cloned());

        let options = CreateExecOptions {
            cmd: Some(cmd),
            env: Some(env),
            working_dir: Some(ctx.working_dir.to_string_lossy().into_owned()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(self.container, options)
            .await
            .map_err(|e| Error::ExecSetup(e.to_string()))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        match self
            .docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await
            .map_err(|e| Error::ExecSetup(e.to_string()))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message })
                        | Ok(LogOutput::Console { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "exec output stream error");
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(Error::ExecSetup("exec started detached".to_string()));
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::ExecSetup(e.to_string()))?;
        let exit_code = inspect.exit_code.unwrap_or(-1) as i32;

        Ok(ExecOutcome::Completed {
            exit_code,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl CommandRunner for ContainerRunner<'_> {
    async fn exec(
        &self,
        command: &StepCommand,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<ExecOutcome> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(ExecOutcome::Cancelled),
            outcome = drive::with_timeout(timeout, self.exec_once(command, ctx)) => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_carries_job_id() {
        let name = ContainerBackend::container_name("build");
        assert!(name.starts_with("runlocal-job-build-"));
    }

    #[test]
    fn test_container_name_unique_per_call() {
        let a = ContainerBackend::container_name("build");
        let b = ContainerBackend::container_name("build");
        assert_ne!(a, b);
    }
}

/// Integration tests that require a running container daemon.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use runlocal_config::{FilterOptions, StepFilterBuilder};
    use runlocal_core::pipeline::{Pipeline, Step, StepKind};
    use std::collections::HashMap;

    fn make_job(steps: Vec<Step>) -> Job {
        Job {
            id: "it".to_string(),
            name: String::new(),
            runs_on: "alpine:latest".to_string(),
            steps,
            depends_on: vec![],
            condition: None,
            env: HashMap::new(),
        }
    }

    fn script_step(id: &str, run: &str) -> Step {
        Step {
            id: id.to_string(),
            name: String::new(),
            kind: StepKind::Script,
            run: Some(run.to_string()),
            with: HashMap::new(),
            needs: vec![],
            continue_on_error: false,
            timeout_minutes: None,
            env: HashMap::new(),
        }
    }

    fn open_filter(job: &Job) -> StepFilter {
        let pipeline = Pipeline {
            name: "it".to_string(),
            jobs: vec![job.clone()],
        };
        StepFilterBuilder::build(FilterOptions::default(), &pipeline)
    }

    #[tokio::test]
    #[ignore]
    async fn test_job_runs_steps_in_one_container() {
        let backend = ContainerBackend::new().unwrap();
        let job = make_job(vec![
            script_step("write", "echo data > state.txt"),
            script_step("read", "cat state.txt"),
        ]);
        let filter = open_filter(&job);
        let store = VariableStore::new();
        let masker = SecretMasker::new();

        let tmp = tempfile::tempdir().unwrap();
        let result = backend
            .run_job(
                &job,
                tmp.path(),
                &filter,
                &store,
                &masker,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.success, "job failed: {:?}", result);
        assert_eq!(result.steps.len(), 2);
        // Filesystem state written by the first step is visible to the second.
        assert!(result.steps[1].stdout.contains("data"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_failing_step_stops_the_job() {
        let backend = ContainerBackend::new().unwrap();
        let job = make_job(vec![
            script_step("boom", "exit 3"),
            script_step("after", "echo never"),
        ]);
        let filter = open_filter(&job);
        let store = VariableStore::new();
        let masker = SecretMasker::new();

        let tmp = tempfile::tempdir().unwrap();
        let result = backend
            .run_job(
                &job,
                tmp.path(),
                &filter,
                &store,
                &masker,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].exit_code(), Some(3));
    }

    #[tokio::test]
    #[ignore]
    async fn test_unknown_image_is_environment_error() {
        let backend = ContainerBackend::new().unwrap();
        let mut job = make_job(vec![script_step("noop", "true")]);
        job.runs_on = "runlocal-test/does-not-exist:latest".to_string();
        let filter = open_filter(&job);
        let store = VariableStore::new();
        let masker = SecretMasker::new();

        let tmp = tempfile::tempdir().unwrap();
        let err = backend
            .run_job(
                &job,
                tmp.path(),
                &filter,
                &store,
                &masker,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_environment(), "unexpected error: {err}");
    }
}
