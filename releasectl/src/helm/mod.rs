//! Package-manager (`helm`) client
//!
//! Shares the template registry and execution engine with the platform
//! client. Value overrides are written through the content-addressed
//! [`OverrideFileCache`] so identical content maps to one file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::OverrideFileCache;
use crate::command::{
    placeholders, shell_quote, CommandFlags, CommandTemplate, Operation, TemplateRegistry,
    ToolVersion,
};
use crate::errors::DeployError;
use crate::logs::LogContext;
use crate::process::{
    CommandExecutionResult, CommandOutcome, CommandRequest, ExecutionStrategy, ProcessExecutor,
};

/// Template prefix dropped when no kubeconfig is supplied
const KUBECONFIG_PREFIX: &str = "KUBECONFIG=${KUBECONFIG_PATH} ";

/// Where and how helm commands run
#[derive(Debug, Clone)]
pub struct HelmContext {
    pub version: ToolVersion,
    pub namespace: String,
    pub kubeconfig: Option<PathBuf>,
    /// Exported as `GOOGLE_APPLICATION_CREDENTIALS`
    pub cloud_key_path: Option<PathBuf>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    pub flags: CommandFlags,
}

/// One line of `helm history`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseHistoryEntry {
    pub revision: u32,
    pub updated: String,
    pub status: String,
    pub chart: String,
    pub description: String,
}

/// One line of `helm list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HelmReleaseInfo {
    pub name: String,
    pub revision: u32,
    pub status: String,
    pub chart: String,
    pub namespace: String,
}

/// Rows of a tab-separated helm table keyed by upper-cased header
pub fn parse_table(output: &str) -> Vec<HashMap<String, String>> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<String> = header
        .split('\t')
        .map(|c| c.trim().to_uppercase())
        .collect();

    lines
        .map(|line| {
            columns
                .iter()
                .cloned()
                .zip(line.split('\t').map(|v| v.trim().to_string()))
                .collect()
        })
        .collect()
}

fn column(row: &HashMap<String, String>, name: &str) -> String {
    row.get(name).cloned().unwrap_or_default()
}

pub fn parse_history(output: &str) -> Vec<ReleaseHistoryEntry> {
    parse_table(output)
        .into_iter()
        .filter_map(|row| {
            Some(ReleaseHistoryEntry {
                revision: row.get("REVISION")?.parse().ok()?,
                updated: column(&row, "UPDATED"),
                status: column(&row, "STATUS"),
                chart: column(&row, "CHART"),
                description: column(&row, "DESCRIPTION"),
            })
        })
        .collect()
}

pub fn parse_list(output: &str) -> Vec<HelmReleaseInfo> {
    parse_table(output)
        .into_iter()
        .filter_map(|row| {
            Some(HelmReleaseInfo {
                name: row.get("NAME")?.clone(),
                revision: row.get("REVISION")?.parse().ok()?,
                status: column(&row, "STATUS"),
                chart: column(&row, "CHART"),
                namespace: column(&row, "NAMESPACE"),
            })
        })
        .collect()
}

pub struct HelmClient {
    executor: Arc<ProcessExecutor>,
    templates: Arc<TemplateRegistry>,
    overrides: Arc<OverrideFileCache>,
}

impl HelmClient {
    pub fn new(
        executor: Arc<ProcessExecutor>,
        templates: Arc<TemplateRegistry>,
        overrides: Arc<OverrideFileCache>,
    ) -> Self {
        Self {
            executor,
            templates,
            overrides,
        }
    }

    fn request(
        &self,
        ctx: &HelmContext,
        operation: Operation,
        fill: impl FnOnce(CommandTemplate) -> CommandTemplate,
    ) -> Result<CommandRequest, DeployError> {
        let version = Some(ctx.version);
        let template = self.templates.resolve(operation, version)?;
        let template = self
            .templates
            .apply_flags(template, operation, &ctx.flags, version);
        let template = match &ctx.kubeconfig {
            Some(path) => template.set(
                placeholders::KUBECONFIG_PATH,
                shell_quote(&path.to_string_lossy()),
            ),
            None => template.strip(KUBECONFIG_PREFIX),
        };
        let line = fill(template.set(placeholders::NAMESPACE, shell_quote(&ctx.namespace)))
            .render()?;

        let mut request = CommandRequest::new(operation, line, &ctx.working_dir, ctx.timeout);
        if let Some(key) = &ctx.cloud_key_path {
            request = request.env("GOOGLE_APPLICATION_CREDENTIALS", key.to_string_lossy());
        }
        Ok(request)
    }

    async fn run(
        &self,
        log: &LogContext,
        request: CommandRequest,
    ) -> Result<CommandOutcome, DeployError> {
        self.executor.execute_or_fail(&request, log).await
    }

    async fn run_completed(
        &self,
        log: &LogContext,
        request: CommandRequest,
    ) -> Result<CommandExecutionResult, DeployError> {
        match self.run(log, request).await? {
            CommandOutcome::Completed(result) => Ok(result),
            CommandOutcome::ReleaseNotFound => Err(DeployError::Platform(
                "Release not found".to_string(),
            )),
        }
    }

    async fn override_args(&self, overrides: &[String]) -> Result<String, DeployError> {
        let files = self.overrides.materialize_all(overrides).await?;
        Ok(files
            .iter()
            .map(|f| format!("-f {}", shell_quote(&f.path().to_string_lossy())))
            .collect::<Vec<_>>()
            .join(" "))
    }

    pub async fn install(
        &self,
        ctx: &HelmContext,
        log: &LogContext,
        release: &str,
        chart_reference: &str,
        overrides: &[String],
    ) -> Result<CommandExecutionResult, DeployError> {
        let values = self.override_args(overrides).await?;
        let request = self.request(ctx, Operation::HelmInstall, |t| {
            t.set(placeholders::RELEASE_NAME, shell_quote(release))
                .set(placeholders::CHART_REFERENCE, shell_quote(chart_reference))
                .set(placeholders::OVERRIDE_VALUES, &values)
        })?;
        self.run_completed(log, request).await
    }

    pub async fn upgrade(
        &self,
        ctx: &HelmContext,
        log: &LogContext,
        release: &str,
        chart_reference: &str,
        overrides: &[String],
    ) -> Result<CommandExecutionResult, DeployError> {
        let values = self.override_args(overrides).await?;
        let request = self.request(ctx, Operation::HelmUpgrade, |t| {
            t.set(placeholders::RELEASE_NAME, shell_quote(release))
                .set(placeholders::CHART_REFERENCE, shell_quote(chart_reference))
                .set(placeholders::OVERRIDE_VALUES, &values)
        })?;
        self.run_completed(log, request).await
    }

    pub async fn rollback(
        &self,
        ctx: &HelmContext,
        log: &LogContext,
        release: &str,
        revision: u32,
    ) -> Result<CommandExecutionResult, DeployError> {
        let request = self.request(ctx, Operation::HelmRollback, |t| {
            t.set(placeholders::RELEASE_NAME, shell_quote(release))
                .set(placeholders::REVISION, revision.to_string())
        })?;
        self.run_completed(log, request).await
    }

    /// Release history; empty when the release does not exist yet
    pub async fn release_history(
        &self,
        ctx: &HelmContext,
        log: &LogContext,
        release: &str,
    ) -> Result<Vec<ReleaseHistoryEntry>, DeployError> {
        let request = self.request(ctx, Operation::HelmReleaseHistory, |t| {
            t.set(placeholders::RELEASE_NAME, shell_quote(release))
        })?;
        match self.run(log, request).await? {
            CommandOutcome::Completed(result) => Ok(parse_history(&result.stdout)),
            CommandOutcome::ReleaseNotFound => {
                log.info(format!("No history for {}, first deployment", release));
                Ok(Vec::new())
            }
        }
    }

    /// Releases matching `release` exactly; empty when none exist
    pub async fn list_releases(
        &self,
        ctx: &HelmContext,
        log: &LogContext,
        release: &str,
    ) -> Result<Vec<HelmReleaseInfo>, DeployError> {
        let request = self.request(ctx, Operation::HelmListReleases, |t| {
            t.set(placeholders::RELEASE_NAME, shell_quote(release))
        })?;
        match self.run(log, request).await? {
            CommandOutcome::Completed(result) => Ok(parse_list(&result.stdout)),
            CommandOutcome::ReleaseNotFound => Ok(Vec::new()),
        }
    }

    pub async fn repo_add(
        &self,
        ctx: &HelmContext,
        log: &LogContext,
        repo_name: &str,
        repo_url: &str,
    ) -> Result<CommandExecutionResult, DeployError> {
        let request = self.request(ctx, Operation::HelmRepoAdd, |t| {
            t.set(placeholders::REPO_NAME, shell_quote(repo_name))
                .set(placeholders::REPO_URL, shell_quote(repo_url))
        })?;
        self.run_completed(log, request).await
    }

    /// Runs on the shared pool
    pub async fn repo_update(
        &self,
        ctx: &HelmContext,
        log: &LogContext,
    ) -> Result<CommandExecutionResult, DeployError> {
        let request = self
            .request(ctx, Operation::HelmRepoUpdate, |t| t)?
            .strategy(ExecutionStrategy::SharedPool);
        self.run_completed(log, request).await
    }

    /// Download and unpack a chart into `dest_dir`. Runs on the fetch pool.
    pub async fn fetch_chart(
        &self,
        ctx: &HelmContext,
        log: &LogContext,
        repo_name: &str,
        chart_name: &str,
        chart_version: Option<&str>,
        dest_dir: &Path,
    ) -> Result<CommandExecutionResult, DeployError> {
        let version = chart_version
            .filter(|v| !v.trim().is_empty())
            .map(|v| format!("--version {}", shell_quote(v)))
            .unwrap_or_default();
        let request = self
            .request(ctx, Operation::HelmFetch, |t| {
                t.set(placeholders::REPO_NAME, shell_quote(repo_name))
                    .set(placeholders::CHART_NAME, shell_quote(chart_name))
                    .set(placeholders::DEST_DIR, shell_quote(&dest_dir.to_string_lossy()))
                    .set(placeholders::CHART_VERSION, &version)
            })?
            .strategy(ExecutionStrategy::FetchPool);
        self.run_completed(log, request).await
    }

    pub async fn uninstall(
        &self,
        ctx: &HelmContext,
        log: &LogContext,
        release: &str,
    ) -> Result<CommandExecutionResult, DeployError> {
        let request = self.request(ctx, Operation::HelmDelete, |t| {
            t.set(placeholders::RELEASE_NAME, shell_quote(release))
        })?;
        self.run_completed(log, request).await
    }

    /// Client version string, e.g. `v3.12.0+gc9f554d`
    pub async fn version(
        &self,
        ctx: &HelmContext,
        log: &LogContext,
    ) -> Result<String, DeployError> {
        let request = self.request(ctx, Operation::HelmVersion, |t| t)?;
        let result = self.run_completed(log, request).await?;
        Ok(result.stdout.trim().to_string())
    }
}

impl std::fmt::Debug for HelmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelmClient")
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}
