//! releasectl - task runner
//!
//! Reads one task request (setup, rollback or helm) from a JSON file, runs it
//! against the platform or package-manager CLI and prints the task response
//! as JSON.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use releasectl::cache::OverrideFileCache;
use releasectl::collaborators::{EnvSecretResolver, LocalArtifactFetcher};
use releasectl::command::TemplateRegistry;
use releasectl::filesys::File;
use releasectl::helm::HelmClient;
use releasectl::logs::{init_logging, ConsoleLogSink, LogContext};
use releasectl::orchestrator::{Collaborators, HelmOrchestrator, TaskDispatcher};
use releasectl::platform::CfCliClient;
use releasectl::process::ProcessExecutor;
use releasectl::storage::{Settings, StorageLayout};
use releasectl::utils::version_info;
use releasectl::workdir::WorkingDirectoryManager;
use task_api::{TaskRequest, TaskResponse};

const USAGE: &str = "Usage: releasectl --task=<request.json> [--settings=<file>] \
                     [--base-dir=<dir>] [--log-level=<level>]";

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}", e),
        }
        return;
    }

    if cli_args.contains_key("help") {
        println!("{}", USAGE);
        return;
    }

    let code = match run(&cli_args).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("releasectl: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}

async fn run(cli_args: &HashMap<String, String>) -> Result<bool> {
    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let mut settings = Settings::load(&settings_file)
        .await
        .with_context(|| format!("Unable to read settings {}", settings_file.path().display()))?;
    if let Some(level) = cli_args.get("log-level") {
        settings.log_level = level.parse().map_err(anyhow::Error::msg)?;
    }

    layout
        .setup()
        .await
        .with_context(|| format!("Unable to prepare {}", layout.base_dir.display()))?;
    let _guard = init_logging(settings.log_options(Some(layout.logs_dir().path().to_path_buf())))?;

    let task_path = cli_args
        .get("task")
        .with_context(|| format!("Missing --task\n{}", USAGE))?;
    let request: TaskRequest = File::new(task_path)
        .read_json()
        .await
        .with_context(|| format!("Unable to read task request {}", task_path))?;

    let executor = Arc::new(ProcessExecutor::new(
        settings.shared_pool,
        settings.fetch_pool,
        settings.retry_policy(),
    )?);
    let templates = Arc::new(TemplateRegistry::builtin());
    let workdirs = WorkingDirectoryManager::new(layout.workdirs_dir());

    let platform = Arc::new(CfCliClient::new(executor.clone(), templates.clone()));
    let overrides = Arc::new(OverrideFileCache::new(
        layout.overrides_dir(),
        settings.override_ttl(),
    ));
    let helm = HelmOrchestrator::new(
        Arc::new(HelmClient::new(executor, templates, overrides)),
        workdirs.clone(),
        settings.helm_tool_version()?,
        settings.default_timeout_secs,
    );

    let dispatcher = TaskDispatcher::new(Collaborators {
        platform,
        decryptor: Arc::new(EnvSecretResolver::new()),
        fetcher: Arc::new(LocalArtifactFetcher),
        workdirs,
        default_cli_version: settings.cf_version.clone(),
        default_timeout_secs: settings.default_timeout_secs,
    })
    .with_helm(helm);

    info!("Running task from {} ({})", task_path, version_info().version);
    let log = LogContext::new(Arc::new(ConsoleLogSink), "Task");

    // Dropping the dispatch future kills any running child process
    let response = tokio::select! {
        response = dispatcher.dispatch(&request, &log) => response,
        signal = await_shutdown_signal() => {
            warn!("{} received, cancelling task", signal?);
            TaskResponse::failure("Task cancelled")
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.is_success())
}

/// Resolves with the name of the first termination signal received
async fn await_shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => Ok("SIGTERM"),
            _ = sigint.recv() => Ok("SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("Ctrl+C")
    }
}
