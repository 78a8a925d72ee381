//! Host execution backend.
//!
//! Runs steps as local processes inside a per-job temporary workspace. The
//! process environment is rebuilt from scratch for every step: a snapshot of
//! the resolved variables plus a small passthrough set, never the caller's
//! full environment.

use crate::backend::{BackendHandle, ExecutionBackend, ExecutionContext};
use crate::drive::{self, CommandRunner, ExecOutcome};
use crate::steps::StepCommand;
use crate::steps::StepExecutorRegistry;
use async_trait::async_trait;
use runlocal_config::{StepFilter, VariableStore};
use runlocal_core::context::{BackendKind, VariableContext};
use runlocal_core::mask::SecretMasker;
use runlocal_core::pipeline::Job;
use runlocal_core::result::JobResult;
use runlocal_core::{Error, Result};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Environment variables forwarded from the invoking shell. Everything else
/// a step sees comes from the variable store.
const PASSTHROUGH_ENV: &[&str] = &["PATH", "HOME", "TMPDIR"];

pub struct HostBackend {
    registry: StepExecutorRegistry,
}

impl HostBackend {
    pub fn new() -> Self {
        Self {
            registry: StepExecutorRegistry::with_defaults(),
        }
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn is_available(&self) -> bool {
        true
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

        // Preparing: the job's one resource is its scratch workspace.
        let scratch = tempfile::Builder::new()
            .prefix(&format!("runlocal-{}-", job.id))
            .tempdir()?;
        let job_workspace = scratch.path().to_path_buf();
        info!(job = %job.id, workspace = %job_workspace.display(), "created host workspace");

        let var_ctx =
            VariableContext::new(&job_workspace, BackendKind::Host).for_job(job.display_name());
        store.update_context(&var_ctx);

        let job_ctx = ExecutionContext::new(
            BackendHandle::Host {
                workspace: job_workspace.clone(),
            },
            HashMap::new(),
            &job_workspace,
            workspace,
            &job.id,
        );

        let (steps, success) = drive::run_steps(
            &HostRunner,
            &self.registry,
            job,
            &job_ctx,
            &var_ctx,
            filter,
            store,
            masker,
            &cancel,
        )
        .await;

        // Cleanup: remove the scratch workspace on every path.
        if let Err(e) = scratch.close() {
            warn!(job = %job.id, error = %e, "failed to remove host workspace");
        }

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

struct HostRunner;

#[async_trait]
impl CommandRunner for HostRunner {
    async fn exec(
        &self,
        command: &StepCommand,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<ExecOutcome> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&ctx.working_dir)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in PASSTHROUGH_ENV {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.envs(&ctx.env);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ToolNotFound(command.program.clone()));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("child stderr not captured".to_string()))?;
        let out_task = collect_lines(stdout);
        let err_task = collect_lines(stderr);

        enum Waited {
            Status(std::process::ExitStatus),
            TimedOut,
            Cancelled,
        }

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => Waited::Cancelled,
            res = async {
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                        Ok(status) => status.map(Some),
                        Err(_) => Ok(None),
                    },
                    None => child.wait().await.map(Some),
                }
            } => match res? {
                Some(status) => Waited::Status(status),
                None => Waited::TimedOut,
            },
        };

        if matches!(waited, Waited::Cancelled | Waited::TimedOut) {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        let stdout = out_task
            .await
            .map_err(|e| Error::Internal(format!("stdout reader failed: {e}")))?;
        let stderr = err_task
            .await
            .map_err(|e| Error::Internal(format!("stderr reader failed: {e}")))?;

        match waited {
            Waited::Cancelled => Ok(ExecOutcome::Cancelled),
            Waited::TimedOut => Ok(ExecOutcome::TimedOut),
            Waited::Status(status) => Ok(ExecOutcome::Completed {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
            }),
        }
    }
}

fn collect_lines<R>(reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut buf = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            buf.push_str(&line);
            buf.push('\n');
        }
        buf
    })
}
