//! Package-manager tasks: deploy, roll back or uninstall one cluster release

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use task_api::{HelmAction, HelmRequest, HelmResult, HelmRevision, TaskPayload, TaskResponse};

use crate::command::{CommandFlags, Tool, ToolVersion};
use crate::errors::DeployError;
use crate::helm::{HelmClient, HelmContext, ReleaseHistoryEntry};
use crate::logs::LogContext;
use crate::workdir::WorkingDirectoryManager;

#[derive(Clone)]
pub struct HelmOrchestrator {
    client: Arc<HelmClient>,
    workdirs: WorkingDirectoryManager,
    default_version: ToolVersion,
    default_timeout_secs: u64,
}

impl HelmOrchestrator {
    pub fn new(
        client: Arc<HelmClient>,
        workdirs: WorkingDirectoryManager,
        default_version: ToolVersion,
        default_timeout_secs: u64,
    ) -> Self {
        Self {
            client,
            workdirs,
            default_version,
            default_timeout_secs,
        }
    }

    /// Run a package-manager task. The working directory is gone when this returns.
    pub async fn run(&self, request: &HelmRequest, log: &LogContext) -> TaskResponse {
        let workdir = match self.workdirs.allocate().await {
            Ok(workdir) => workdir,
            Err(e) => {
                log.error(format!("Helm task failed: {}", e));
                return TaskResponse::failure(e.to_string());
            }
        };

        let outcome = match self.context(request, workdir.path()) {
            Ok(ctx) => self.execute(&ctx, request, log).await,
            Err(e) => Err(e),
        };
        workdir.release().await;

        match outcome {
            Ok(result) => {
                log.info(format!("{} of {} completed", result.performed, result.release_name));
                TaskResponse::success(TaskPayload::Helm(result))
            }
            Err(e) => {
                log.error(format!("Helm task failed: {}", e));
                TaskResponse::failure(e.to_string())
            }
        }
    }

    fn context(&self, request: &HelmRequest, workdir: &Path) -> Result<HelmContext, DeployError> {
        let version = match request.cli_version.as_deref() {
            Some(tag) => ToolVersion::from_tag(Tool::Helm, Some(tag))?,
            None => self.default_version,
        };
        let timeout_secs = match request.timeout_secs {
            0 => self.default_timeout_secs,
            secs => secs,
        };
        let flags = match request.command_flags.as_deref() {
            Some(flags) if !flags.trim().is_empty() => CommandFlags::raw(flags),
            _ => CommandFlags::none(),
        };

        Ok(HelmContext {
            version,
            namespace: request.namespace.clone(),
            kubeconfig: request.kubeconfig_path.as_ref().map(PathBuf::from),
            cloud_key_path: request.cloud_key_path.as_ref().map(PathBuf::from),
            working_dir: workdir.to_path_buf(),
            timeout: Duration::from_secs(timeout_secs),
            flags,
        })
    }

    async fn execute(
        &self,
        ctx: &HelmContext,
        request: &HelmRequest,
        log: &LogContext,
    ) -> Result<HelmResult, DeployError> {
        let release = request.release_name.as_str();

        if let Some(repo) = &request.repository {
            let repo_log = log.with_section("Repository");
            self.client
                .repo_add(ctx, &repo_log, &repo.name, &repo.url)
                .await?;
            self.client.repo_update(ctx, &repo_log).await?;
        }

        let performed = match &request.action {
            HelmAction::Deploy {
                chart,
                chart_version,
                value_overrides,
            } => {
                let chart_ref = match &request.repository {
                    Some(repo) => {
                        let charts = ctx.working_dir.join("charts");
                        self.client
                            .fetch_chart(
                                ctx,
                                &log.with_section("FetchChart"),
                                &repo.name,
                                chart,
                                chart_version.as_deref(),
                                &charts,
                            )
                            .await?;
                        charts.join(chart).to_string_lossy().into_owned()
                    }
                    None => chart.clone(),
                };

                let deploy_log = log.with_section("Deploy");
                let history = self.client.release_history(ctx, &deploy_log, release).await?;
                if history.is_empty() {
                    deploy_log.info(format!("Installing {} from {}", release, chart_ref));
                    self.client
                        .install(ctx, &deploy_log, release, &chart_ref, value_overrides)
                        .await?;
                    "install"
                } else {
                    deploy_log.info(format!("Upgrading {} to {}", release, chart_ref));
                    self.client
                        .upgrade(ctx, &deploy_log, release, &chart_ref, value_overrides)
                        .await?;
                    "upgrade"
                }
            }
            HelmAction::Rollback { revision } => {
                let rollback_log = log.with_section("Rollback");
                rollback_log.info(format!("Rolling {} back to revision {}", release, revision));
                self.client
                    .rollback(ctx, &rollback_log, release, *revision)
                    .await?;
                "rollback"
            }
            HelmAction::Uninstall => {
                self.client
                    .uninstall(ctx, &log.with_section("Uninstall"), release)
                    .await?;
                "uninstall"
            }
        };

        let history = self
            .client
            .release_history(ctx, &log.with_section("History"), release)
            .await?;
        Ok(HelmResult {
            release_name: release.to_string(),
            performed: performed.to_string(),
            history: history.into_iter().map(revision).collect(),
        })
    }
}

fn revision(entry: ReleaseHistoryEntry) -> HelmRevision {
    HelmRevision {
        revision: entry.revision,
        status: entry.status,
        chart: entry.chart,
        description: entry.description,
    }
}

impl std::fmt::Debug for HelmOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelmOrchestrator")
            .field("workdirs", &self.workdirs)
            .field("default_version", &self.default_version)
            .field("default_timeout_secs", &self.default_timeout_secs)
            .finish_non_exhaustive()
    }
}
