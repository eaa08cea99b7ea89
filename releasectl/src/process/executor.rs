//! Shell command execution with streamed output
//!
//! Each command runs through `sh -c` in a working directory with an explicit
//! environment. Output lines are forwarded to the execution log as they are
//! produced and also accumulated for the caller. A command that outlives its
//! timeout is killed. Dropping an in-flight execution kills the child.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::AbortHandle;

use crate::command::Operation;
use crate::errors::DeployError;
use crate::logs::LogContext;
use crate::process::pool::{PoolBounds, WorkerPool};
use crate::process::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionStatus {
    Success,
    Failure,
}

/// What a finished command produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandExecutionResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(1),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Error stream first, then standard output
    pub fn output_with_error_stream(&self) -> String {
        let stderr = self.stderr.trim_end();
        let stdout = self.stdout.trim_end();
        if stderr.is_empty() {
            stdout.to_string()
        } else if stdout.is_empty() {
            stderr.to_string()
        } else {
            format!("{} {}", stderr, stdout)
        }
    }
}

/// Result of a command that must succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed(CommandExecutionResult),
    /// A release lookup reported that the release does not exist
    ReleaseNotFound,
}

/// Where the command's supervising task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// A task of its own
    #[default]
    Dedicated,
    /// A slot in the pool shared by ordinary CLI calls
    SharedPool,
    /// A slot in the pool reserved for artifact fetches
    FetchPool,
}

/// A fully rendered command plus everything needed to run it
#[derive(Debug)]
pub struct CommandRequest {
    pub operation: Operation,
    pub command_line: String,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Exported to the child, never logged
    pub secret_env: Vec<(String, SecretString)>,
    pub timeout: Duration,
    pub strategy: ExecutionStrategy,
}

impl CommandRequest {
    pub fn new(
        operation: Operation,
        command_line: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            operation,
            command_line: command_line.into(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            secret_env: Vec::new(),
            timeout,
            strategy: ExecutionStrategy::default(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn secret_env(mut self, key: impl Into<String>, value: SecretString) -> Self {
        self.secret_env.push((key.into(), value));
        self
    }

    pub fn strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// True for CLI output meaning "no such release"
pub fn is_release_not_found(output: &str) -> bool {
    let lowered = output.to_lowercase();
    lowered.contains("not found") && lowered.contains("release")
}

/// Turn a finished execution into an outcome, or a `ToolProcess` error
pub fn classify(
    operation: Operation,
    command_line: &str,
    result: CommandExecutionResult,
) -> Result<CommandOutcome, DeployError> {
    if result.is_success() {
        return Ok(CommandOutcome::Completed(result));
    }
    let output = result.output_with_error_stream();
    if operation.is_release_lookup() && is_release_not_found(&output) {
        return Ok(CommandOutcome::ReleaseNotFound);
    }
    Err(DeployError::ToolProcess {
        command: command_line.to_string(),
        output,
    })
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs commands under the configured pools and retry policy
#[derive(Debug)]
pub struct ProcessExecutor {
    shared: WorkerPool,
    fetch: WorkerPool,
    retry: RetryPolicy,
}

impl ProcessExecutor {
    pub fn new(
        shared: PoolBounds,
        fetch: PoolBounds,
        retry: RetryPolicy,
    ) -> Result<Self, DeployError> {
        Ok(Self {
            shared: WorkerPool::new("shared", shared)?,
            fetch: WorkerPool::new("fetch", fetch)?,
            retry,
        })
    }

    pub fn shared_pool(&self) -> &WorkerPool {
        &self.shared
    }

    pub fn fetch_pool(&self) -> &WorkerPool {
        &self.fetch
    }

    /// Run once. A non-zero exit is a `Failure` result, not an error.
    pub async fn execute(
        &self,
        request: &CommandRequest,
        log: &LogContext,
    ) -> Result<CommandExecutionResult, DeployError> {
        let _permit = match request.strategy {
            ExecutionStrategy::Dedicated => None,
            ExecutionStrategy::SharedPool => Some(self.shared.acquire().await?),
            ExecutionStrategy::FetchPool => Some(self.fetch.acquire().await?),
        };

        log.debug(format!("Executing: {}", request.command_line));
        let child = spawn_child(request)?;
        let supervise = supervise(
            child,
            request.command_line.clone(),
            request.timeout,
            log.clone(),
        );

        match request.strategy {
            ExecutionStrategy::Dedicated => {
                let handle = tokio::spawn(supervise);
                let _guard = AbortOnDrop(handle.abort_handle());
                handle.await.map_err(|e| {
                    if e.is_cancelled() {
                        DeployError::Cancelled(request.command_line.clone())
                    } else {
                        DeployError::Internal(format!("Command task panicked: {}", e))
                    }
                })?
            }
            ExecutionStrategy::SharedPool | ExecutionStrategy::FetchPool => supervise.await,
        }
    }

    /// Run, retrying launch failures per the retry policy
    pub async fn execute_with_retry(
        &self,
        request: &CommandRequest,
        log: &LogContext,
    ) -> Result<CommandExecutionResult, DeployError> {
        let mut attempt = 1;
        loop {
            match self.execute(request, log).await {
                Err(e) if e.is_retryable() && self.retry.allows_another(attempt) => {
                    let delay = self.retry.delay_after(attempt);
                    log.warn(format!(
                        "Attempt {} failed ({}), retrying in {:?}",
                        attempt, e, delay
                    ));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Run with retry and require success
    pub async fn execute_or_fail(
        &self,
        request: &CommandRequest,
        log: &LogContext,
    ) -> Result<CommandOutcome, DeployError> {
        let result = self.execute_with_retry(request, log).await?;
        let outcome = classify(request.operation, &request.command_line, result);
        if let Err(e) = &outcome {
            log.error(e.to_string());
        }
        outcome
    }
}

fn spawn_child(request: &CommandRequest) -> Result<Child, DeployError> {
    if !request.working_dir.is_dir() {
        return Err(DeployError::config(format!(
            "Working directory {} does not exist",
            request.working_dir.display()
        )));
    }

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(&request.command_line)
        .current_dir(&request.working_dir)
        .envs(&request.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &request.secret_env {
        command.env(key, value.expose_secret());
    }

    command.spawn().map_err(|source| DeployError::Launch {
        command: request.command_line.clone(),
        source,
    })
}

async fn collect_lines<R>(
    stream: Option<R>,
    forward: impl Fn(String),
) -> Result<String, std::io::Error>
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(stream) = stream else {
        return Ok(collected);
    };
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        collected.push_str(&line);
        collected.push('\n');
        forward(line);
    }
    Ok(collected)
}

async fn supervise(
    mut child: Child,
    command_line: String,
    timeout: Duration,
    log: LogContext,
) -> Result<CommandExecutionResult, DeployError> {
    let out_log = log.clone();
    let err_log = log;
    let stdout = collect_lines(child.stdout.take(), move |line| out_log.info(line));
    let stderr = collect_lines(child.stderr.take(), move |line| err_log.error(line));

    let finished = tokio::time::timeout(timeout, async {
        tokio::join!(stdout, stderr, child.wait())
    })
    .await;

    let (stdout, stderr, status) = match finished {
        Ok(parts) => parts,
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill timed out command: {}", e);
            }
            return Err(DeployError::TimedOut {
                command: command_line,
                timeout,
            });
        }
    };

    let launch_error = |source| DeployError::Launch {
        command: command_line.clone(),
        source,
    };
    let stdout = stdout.map_err(launch_error)?;
    let stderr = stderr.map_err(launch_error)?;
    let status = status.map_err(launch_error)?;

    Ok(CommandExecutionResult {
        status: if status.success() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failure
        },
        stdout,
        stderr,
        exit_code: status.code(),
    })
}
