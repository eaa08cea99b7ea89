//! Process execution engine tests, running real `sh` commands

use std::sync::Arc;
use std::time::{Duration, Instant};

use releasectl::command::Operation;
use releasectl::errors::DeployError;
use releasectl::logs::{LogContext, LogLevel, MemoryLogSink};
use releasectl::process::{
    CommandOutcome, CommandRequest, ExecutionStatus, ExecutionStrategy, PoolBounds,
    ProcessExecutor, RetryPolicy,
};
use secrecy::SecretString;

fn executor(shared: PoolBounds) -> ProcessExecutor {
    ProcessExecutor::new(shared, PoolBounds::default(), RetryPolicy::once()).unwrap()
}

fn request(line: &str) -> CommandRequest {
    CommandRequest::new(
        Operation::CfListApps,
        line,
        std::env::temp_dir(),
        Duration::from_secs(10),
    )
}

fn memory_log() -> (Arc<MemoryLogSink>, LogContext) {
    let sink = Arc::new(MemoryLogSink::new());
    let log = LogContext::new(sink.clone(), "Test");
    (sink, log)
}

#[tokio::test]
async fn test_success_streams_stdout_to_info() {
    let (sink, log) = memory_log();
    let result = executor(PoolBounds::default())
        .execute(&request("echo first; echo second"), &log)
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stdout, "first\nsecond\n");
    assert!(sink.contains(LogLevel::Info, "first"));
    assert!(sink.contains(LogLevel::Info, "second"));
}

#[tokio::test]
async fn test_nonzero_exit_is_failure_result() {
    let (sink, log) = memory_log();
    let result = executor(PoolBounds::default())
        .execute(&request("echo 'FAILED to stage' >&2; exit 3"), &log)
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failure);
    assert_eq!(result.exit_code, Some(3));
    assert!(sink.contains(LogLevel::Error, "FAILED to stage"));
}

#[tokio::test]
async fn test_execute_or_fail_prefers_stderr() {
    let (_sink, log) = memory_log();
    let err = executor(PoolBounds::default())
        .execute_or_fail(&request("echo out; echo 'App web-9 not found' >&2; exit 1"), &log)
        .await
        .unwrap_err();

    match err {
        DeployError::ToolProcess { command, output } => {
            assert!(command.starts_with("echo out"));
            assert!(output.starts_with("App web-9 not found"));
            assert!(output.ends_with("out"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_release_lookup_not_found_is_benign() {
    let (_sink, log) = memory_log();
    let lookup = CommandRequest::new(
        Operation::HelmReleaseHistory,
        "echo 'Error: release: not found' >&2; exit 1",
        std::env::temp_dir(),
        Duration::from_secs(10),
    );
    let outcome = executor(PoolBounds::default())
        .execute_or_fail(&lookup, &log)
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::ReleaseNotFound);
}

#[tokio::test]
async fn test_timeout_kills_command() {
    let (_sink, log) = memory_log();
    let mut slow = request("sleep 30");
    slow.timeout = Duration::from_millis(200);

    let started = Instant::now();
    let err = executor(PoolBounds::default())
        .execute(&slow, &log)
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::TimedOut { .. }));
    assert!(!err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_missing_working_dir_is_configuration_error() {
    let (_sink, log) = memory_log();
    let mut request = request("true");
    request.working_dir = std::env::temp_dir().join(format!("missing-{}", uuid::Uuid::new_v4()));

    let executor = ProcessExecutor::new(
        PoolBounds::default(),
        PoolBounds::default(),
        RetryPolicy {
            max_attempts: 2,
            cooldown: Default::default(),
        },
    )
    .unwrap();
    let err = executor.execute_with_retry(&request, &log).await.unwrap_err();
    assert!(matches!(err, DeployError::Configuration(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_launch_failures_are_retried() {
    let (sink, log) = memory_log();
    // Spawn resolves `sh` through the child's PATH, so a bogus PATH fails to launch
    let request = request("true").env("PATH", "/nonexistent");

    let executor = ProcessExecutor::new(
        PoolBounds::default(),
        PoolBounds::default(),
        RetryPolicy {
            max_attempts: 3,
            cooldown: releasectl::utils::CooldownOptions {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
            },
        },
    )
    .unwrap();
    let err = executor.execute_with_retry(&request, &log).await.unwrap_err();

    assert!(matches!(err, DeployError::Launch { .. }));
    assert!(sink.contains(LogLevel::Warn, "Attempt 1 failed"));
    assert!(sink.contains(LogLevel::Warn, "Attempt 2 failed"));
    assert!(!sink.contains(LogLevel::Warn, "Attempt 3 failed"));
}

#[tokio::test]
async fn test_env_and_secret_env_reach_child() {
    let (sink, log) = memory_log();
    let request = request("echo \"$CF_HOME:$CF_PASSWORD\"")
        .env("CF_HOME", "/tmp/home")
        .secret_env("CF_PASSWORD", SecretString::from("hunter2".to_string()));

    let result = executor(PoolBounds::default())
        .execute(&request, &log)
        .await
        .unwrap();
    assert_eq!(result.stdout.trim(), "/tmp/home:hunter2");
    // The command line itself never carries the secret
    assert!(!sink.contains(LogLevel::Debug, "hunter2"));
}

#[tokio::test]
async fn test_shared_pool_bounds_concurrency() {
    let executor = Arc::new(executor(PoolBounds {
        core_size: 1,
        max_size: 2,
    }));

    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let executor = executor.clone();
        handles.push(tokio::spawn(async move {
            let request = request("sleep 0.3").strategy(ExecutionStrategy::SharedPool);
            executor
                .execute(&request, &LogContext::tracing("Pool"))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    // Four commands, two slots: at least two rounds
    assert!(started.elapsed() >= Duration::from_millis(550));
    assert_eq!(executor.shared_pool().size(), 2);
}

#[tokio::test]
async fn test_dropping_execution_kills_child() {
    let marker = std::env::temp_dir().join(format!("killed-{}", uuid::Uuid::new_v4()));
    let line = format!("sleep 1 && touch {}", marker.display());
    let executor = executor(PoolBounds::default());

    let attempt = tokio::time::timeout(
        Duration::from_millis(100),
        executor.execute(&request(&line), &LogContext::tracing("Cancel")),
    )
    .await;
    assert!(attempt.is_err());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists());
}
