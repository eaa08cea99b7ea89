//! Autoscaler toggling around instance changes

use std::sync::Arc;

use crate::errors::DeployError;
use crate::logs::LogContext;
use crate::platform::{PlatformClient, PlatformContext};

/// Turns a release's autoscaling policy off before a downsize and back on
/// after an upsize. A release without a policy is left alone.
#[derive(Clone)]
pub struct AutoscalerController {
    platform: Arc<dyn PlatformClient>,
}

impl AutoscalerController {
    pub fn new(platform: Arc<dyn PlatformClient>) -> Self {
        Self { platform }
    }

    /// Returns true when a policy was enabled and has been disabled
    pub async fn disable_if_present(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<bool, DeployError> {
        match self.platform.autoscaler_state(ctx, log, name).await? {
            None => {
                log.info(format!("No autoscaler policy attached to {}", name));
                Ok(false)
            }
            Some(false) => {
                log.info(format!("Autoscaler for {} is already disabled", name));
                Ok(false)
            }
            Some(true) => {
                self.platform.set_autoscaler(ctx, log, name, false).await?;
                log.info(format!("Autoscaler for {} disabled", name));
                Ok(true)
            }
        }
    }

    /// Returns true when a disabled policy has been enabled
    pub async fn enable_if_present(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<bool, DeployError> {
        match self.platform.autoscaler_state(ctx, log, name).await? {
            None => {
                log.info(format!("No autoscaler policy attached to {}", name));
                Ok(false)
            }
            Some(true) => {
                log.info(format!("Autoscaler for {} is already enabled", name));
                Ok(false)
            }
            Some(false) => {
                self.platform.set_autoscaler(ctx, log, name, true).await?;
                log.info(format!("Autoscaler for {} enabled", name));
                Ok(true)
            }
        }
    }
}

impl std::fmt::Debug for AutoscalerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoscalerController").finish_non_exhaustive()
    }
}
