//! Rollback: restore the previous release and retire the new one
//!
//! Steps run in a fixed order, each relying on the platform state the
//! previous one left behind:
//!
//! 1. upsize releases whose desired count grew
//! 2. restore routes on the previous release (skipped for standard blue-green)
//! 3. re-enable autoscalers on upsized releases
//! 4. downsize releases whose desired count shrank
//! 5. unmap routes from the new release once it is at zero (skipped for
//!    standard blue-green)
//!
//! A failing step aborts the rest, except route restoration, whose failures
//! are logged and passed over.

use task_api::{
    InstanceData, InstanceDelta, ReleaseSummary, RollbackRequest, RollbackResult, TaskPayload,
    TaskResponse,
};

use crate::autoscaler::AutoscalerController;
use crate::errors::DeployError;
use crate::logs::LogContext;
use crate::orchestrator::Collaborators;
use crate::platform::PlatformContext;
use crate::tracker::partition_deltas;

#[derive(Debug, Clone)]
pub struct RollbackOrchestrator {
    deps: Collaborators,
    autoscaler: AutoscalerController,
}

impl RollbackOrchestrator {
    pub fn new(deps: Collaborators) -> Self {
        let autoscaler = AutoscalerController::new(deps.platform.clone());
        Self { deps, autoscaler }
    }

    /// Run a rollback task. The working directory is gone when this returns.
    pub async fn run(&self, request: &RollbackRequest, log: &LogContext) -> TaskResponse {
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
                log.error(format!("Rollback failed: {}", e));
                return TaskResponse::failure(e.to_string());
            }
        };

        let outcome = self.execute(&ctx, request, log).await;
        workdir.release().await;

        match outcome {
            Ok(result) => {
                log.info("Rollback completed");
                TaskResponse::success(TaskPayload::Rollback(result))
            }
            Err(e) => {
                log.error(format!("Rollback failed: {}", e));
                TaskResponse::failure(e.to_string())
            }
        }
    }

    async fn execute(
        &self,
        ctx: &PlatformContext,
        request: &RollbackRequest,
        log: &LogContext,
    ) -> Result<RollbackResult, DeployError> {
        let platform = &self.deps.platform;
        platform.login(ctx, &log.with_section("Login")).await?;

        let plan = partition_deltas(&request.deltas);
        let mut instance_data = Vec::new();

        let upsize_log = log.with_section("Upsize");
        for delta in &plan.upsize {
            instance_data.push(self.resize(ctx, delta, &upsize_log).await?);
        }

        if !request.standard_blue_green {
            if let Some(old) = &request.app_to_downsize {
                let routes_log = log.with_section("RestoreRoutes");
                if let Err(e) = self.restore_routes(ctx, old, &routes_log).await {
                    routes_log.warn(format!("Failed to restore routes on {}: {}", old.name, e));
                }
            }
        }

        if request.use_app_autoscaler {
            let autoscaler_log = log.with_section("EnableAutoscaler");
            for delta in &plan.upsize {
                self.autoscaler
                    .enable_if_present(ctx, &autoscaler_log, &delta.release_name)
                    .await?;
            }
        }

        let downsize_log = log.with_section("Downsize");
        for delta in &plan.downsize {
            if request.use_app_autoscaler {
                self.autoscaler
                    .disable_if_present(ctx, &downsize_log, &delta.release_name)
                    .await?;
            }
            instance_data.push(self.resize(ctx, delta, &downsize_log).await?);
        }

        if !request.standard_blue_green {
            if let Some(new_app) = &request.new_app_details {
                self.unmap_if_idle(ctx, new_app, &log.with_section("UnmapRoutes"))
                    .await?;
            }
        }

        Ok(RollbackResult { instance_data })
    }

    async fn resize(
        &self,
        ctx: &PlatformContext,
        delta: &InstanceDelta,
        log: &LogContext,
    ) -> Result<InstanceData, DeployError> {
        log.info(format!(
            "Scaling {} from {} to {}",
            delta.release_name, delta.previous_count, delta.desired_count
        ));
        let updated = self
            .deps
            .platform
            .scale_release(ctx, log, &delta.release_name, delta.desired_count)
            .await?;
        Ok(InstanceData {
            release_id: delta.release_id.clone(),
            release_name: updated.name,
            instance_count: delta.desired_count,
        })
    }

    /// Map only the recorded routes the release is missing.
    /// Returns the number of routes mapped.
    pub async fn restore_routes(
        &self,
        ctx: &PlatformContext,
        old: &ReleaseSummary,
        log: &LogContext,
    ) -> Result<usize, DeployError> {
        if old.urls.is_empty() {
            return Ok(0);
        }
        let current = self.deps.platform.get_release(ctx, log, &old.name).await?;
        let missing: Vec<String> = old.urls.difference(&current.urls).cloned().collect();
        if missing.is_empty() {
            log.info(format!("Routes of {} are already in place", old.name));
            return Ok(0);
        }

        log.info(format!("Restoring routes on {}: {}", old.name, missing.join(", ")));
        self.deps
            .platform
            .map_routes(ctx, log, &old.name, &missing)
            .await?;
        Ok(missing.len())
    }

    async fn unmap_if_idle(
        &self,
        ctx: &PlatformContext,
        new_app: &ReleaseSummary,
        log: &LogContext,
    ) -> Result<(), DeployError> {
        let current = self
            .deps
            .platform
            .get_release(ctx, log, &new_app.name)
            .await?;
        if current.total_instances > 0 || current.urls.is_empty() {
            return Ok(());
        }
        let urls: Vec<String> = current.urls.iter().cloned().collect();
        log.info(format!("Unmapping routes from {}", new_app.name));
        self.deps
            .platform
            .unmap_routes(ctx, log, &new_app.name, &urls)
            .await
    }
}
