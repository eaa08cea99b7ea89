//! Setup: prune old releases and create the next one

use task_api::{
    AppSetupTimeSnapshot, DeploymentRequest, NewReleaseInfo, ReleaseMarker, ReleaseSummary,
    SetupResult, TaskPayload, TaskResponse,
};

use crate::autoscaler::AutoscalerController;
use crate::errors::DeployError;
use crate::logs::LogContext;
use crate::manifest::write_manifest_files;
use crate::orchestrator::fsm::{SetupEvent, SetupFsm};
use crate::orchestrator::Collaborators;
use crate::platform::{PlatformContext, PushSpec};
use crate::tracker::{
    find_active, find_most_recent_inactive, next_revision, plan_prune, release_name,
    total_instances, PrunePlan,
};
use crate::workdir::ScopedWorkDir;

/// Names of releases pruning actually handled
#[derive(Debug, Default)]
struct PruneOutcome {
    downsized: Vec<String>,
    deleted: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SetupOrchestrator {
    deps: Collaborators,
    autoscaler: AutoscalerController,
}

impl SetupOrchestrator {
    pub fn new(deps: Collaborators) -> Self {
        let autoscaler = AutoscalerController::new(deps.platform.clone());
        Self { deps, autoscaler }
    }

    /// Run a setup task. The working directory is gone when this returns.
    pub async fn run(&self, request: &DeploymentRequest, log: &LogContext) -> TaskResponse {
        let (workdir, ctx) = match self
            .deps
            .open_session(
                &request.platform,
                request.cli_version.as_deref(),
                request.timeout_secs,
                log,
            )
            .await
        {
            Ok(session) => session,
            Err(e) => {
                log.error(format!("Setup failed: {}", e));
                return TaskResponse::failure(e.to_string());
            }
        };

        let mut fsm = SetupFsm::new();
        let outcome = self.execute(&mut fsm, &workdir, &ctx, request, log).await;
        workdir.release().await;

        match outcome {
            Ok(result) => {
                log.info(format!("Created release {}", result.new_release.name));
                TaskResponse::success(TaskPayload::Setup(result))
            }
            Err(e) => {
                record_failure(&mut fsm, &e, log);
                TaskResponse::failure(e.to_string())
            }
        }
    }

    async fn execute(
        &self,
        fsm: &mut SetupFsm,
        workdir: &ScopedWorkDir,
        ctx: &PlatformContext,
        request: &DeploymentRequest,
        log: &LogContext,
    ) -> Result<SetupResult, DeployError> {
        let platform = &self.deps.platform;
        let prefix = request.release_name_prefix.as_str();
        let blue_green = request.is_blue_green;

        platform.login(ctx, &log.with_section("Login")).await?;

        advance(fsm, log)?;
        let existing = platform
            .list_releases(ctx, &log.with_section("FetchExisting"), prefix, blue_green)
            .await?;
        log.info(format!("Found {} existing releases for {}", existing.len(), prefix));

        advance(fsm, log)?;
        let active = find_active(&existing, blue_green).cloned();
        let active_snapshot = active.as_ref().map(AppSetupTimeSnapshot::from);
        let most_recent_inactive = if blue_green {
            find_most_recent_inactive(&existing, active.as_ref()).map(AppSetupTimeSnapshot::from)
        } else {
            None
        };
        let plan = plan_prune(&existing, active.as_ref(), request.older_version_count_to_keep);
        if let Some(active) = &active {
            log.info(format!("Active release: {}", active.name));
        }

        advance(fsm, log)?;
        let pruned = self
            .prune(ctx, &plan, request, &log.with_section("Prune"))
            .await;

        advance(fsm, log)?;
        let current = platform
            .list_releases(ctx, &log.with_section("RefetchExisting"), prefix, blue_green)
            .await?;

        advance(fsm, log)?;
        let total_previous_instance_count = total_instances(&current);
        let most_recent_instance_count = current.last().map_or(0, |r| r.running_instances);
        let revision = next_revision(&current)?.max(next_revision(&existing)?);
        let name = release_name(prefix, revision);

        advance(fsm, log)?;
        let build_log = log.with_section("BuildArtifacts");
        let artifact_path = if request.artifact.is_container_image() {
            None
        } else {
            Some(
                self.deps
                    .fetcher
                    .fetch(&request.artifact, workdir.path(), &build_log)
                    .await?,
            )
        };
        let files = write_manifest_files(workdir, request, &name, artifact_path.as_deref()).await?;
        build_log.info(format!(
            "Wrote manifest and {} variables files",
            files.vars_files.len()
        ));

        advance(fsm, log)?;
        let create_log = log.with_section("CreateRelease");
        create_log.info(format!("Creating release {}", name));
        let created = platform
            .push_release(
                ctx,
                &create_log,
                &PushSpec {
                    name: name.clone(),
                    manifest: files.manifest,
                    vars_files: files.vars_files,
                },
            )
            .await?;
        if blue_green {
            platform
                .set_marker(ctx, &create_log, &created.name, ReleaseMarker::Stage)
                .await?;
        }

        advance(fsm, log)?;
        let result = SetupResult {
            new_release: NewReleaseInfo {
                guid: created.id.clone(),
                name: created.name.clone(),
                urls: created.urls.iter().cloned().collect(),
                instance_count: 0,
            },
            total_previous_instance_count,
            most_recent_instance_count,
            active_release: active_snapshot,
            most_recent_inactive,
            downsized: pruned.downsized,
            deleted: pruned.deleted,
        };

        advance(fsm, log)?;
        Ok(result)
    }

    /// Downsize then delete per `plan`. A failing release is logged and skipped.
    async fn prune(
        &self,
        ctx: &PlatformContext,
        plan: &PrunePlan,
        request: &DeploymentRequest,
        log: &LogContext,
    ) -> PruneOutcome {
        let mut outcome = PruneOutcome::default();

        for release in &plan.downsize {
            match self.downsize(ctx, release, request, log).await {
                Ok(()) => outcome.downsized.push(release.name.clone()),
                Err(e) => log.warn(format!("Failed to downsize {}: {}", release.name, e)),
            }
        }

        for release in &plan.delete {
            log.info(format!("Deleting {}", release.name));
            match self.deps.platform.delete_release(ctx, log, &release.name).await {
                Ok(()) => outcome.deleted.push(release.name.clone()),
                Err(e) => log.warn(format!("Failed to delete {}: {}", release.name, e)),
            }
        }

        outcome
    }

    async fn downsize(
        &self,
        ctx: &PlatformContext,
        release: &ReleaseSummary,
        request: &DeploymentRequest,
        log: &LogContext,
    ) -> Result<(), DeployError> {
        let platform = &self.deps.platform;

        if request.use_app_autoscaler {
            self.autoscaler
                .disable_if_present(ctx, log, &release.name)
                .await?;
        }
        if release.total_instances > 0 {
            log.info(format!(
                "Downsizing {} from {} to 0",
                release.name, release.total_instances
            ));
            platform.scale_release(ctx, log, &release.name, 0).await?;
        }
        if !release.urls.is_empty() {
            let urls: Vec<String> = release.urls.iter().cloned().collect();
            platform.unmap_routes(ctx, log, &release.name, &urls).await?;
        }
        if request.is_blue_green && release.marker.is_some() {
            platform.clear_marker(ctx, log, &release.name).await?;
        }
        Ok(())
    }
}

/// Move `fsm` to `Failed` and log the phase the error came from
fn record_failure(fsm: &mut SetupFsm, error: &DeployError, log: &LogContext) {
    match fsm.process(SetupEvent::Fail(error.to_string())) {
        Ok(_) => match fsm.failed_in() {
            Some(phase) => log.error(format!("Setup failed during {:?}: {}", phase, error)),
            None => log.error(format!("Setup failed: {}", error)),
        },
        Err(transition) => {
            log.warn(format!("Setup state not updated: {}", transition));
            log.error(format!("Setup failed after {:?}: {}", fsm.state(), error));
        }
    }
}

fn advance(fsm: &mut SetupFsm, log: &LogContext) -> Result<(), DeployError> {
    let state = fsm
        .process(SetupEvent::Advance)
        .map_err(DeployError::Internal)?;
    log.debug(format!("Setup phase: {:?}", state));
    Ok(())
}
