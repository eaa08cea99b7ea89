//! Target platform seam
//!
//! Orchestrators talk to the platform only through [`PlatformClient`].
//! [`cf::CfCliClient`] drives the `cf` CLI.

pub mod cf;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use task_api::{ReleaseMarker, ReleaseSummary};

use crate::collaborators::PlatformCredentials;
use crate::command::ToolVersion;
use crate::errors::DeployError;
use crate::logs::LogContext;

pub use cf::CfCliClient;

/// Environment variable carrying a release's status marker
pub const STATUS_IDENTIFIER_ENV: &str = "HARNESS__STATUS__IDENTIFIER";

/// Per-call platform session state
#[derive(Debug, Clone)]
pub struct PlatformContext {
    /// CLI home, the canonical task working directory
    pub home: String,
    pub credentials: Arc<PlatformCredentials>,
    pub cli_version: ToolVersion,
    pub timeout: Duration,
}

/// What `push_release` needs to create a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSpec {
    pub name: String,
    pub manifest: PathBuf,
    pub vars_files: Vec<PathBuf>,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn login(&self, ctx: &PlatformContext, log: &LogContext) -> Result<(), DeployError>;

    /// Releases named `<prefix>-<revision>`, oldest first. Markers are read
    /// only when `include_markers` is set.
    async fn list_releases(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        prefix: &str,
        include_markers: bool,
    ) -> Result<Vec<ReleaseSummary>, DeployError>;

    async fn get_release(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<ReleaseSummary, DeployError>;

    /// Create a release from a manifest; it starts with zero instances
    async fn push_release(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        spec: &PushSpec,
    ) -> Result<ReleaseSummary, DeployError>;

    async fn scale_release(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
        instances: u32,
    ) -> Result<ReleaseSummary, DeployError>;

    async fn delete_release(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<(), DeployError>;

    async fn map_routes(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
        urls: &[String],
    ) -> Result<(), DeployError>;

    async fn unmap_routes(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
        urls: &[String],
    ) -> Result<(), DeployError>;

    async fn set_marker(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
        marker: ReleaseMarker,
    ) -> Result<(), DeployError>;

    async fn clear_marker(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<(), DeployError>;

    /// `None` when the release has no autoscaling policy, otherwise whether it is enabled
    async fn autoscaler_state(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<Option<bool>, DeployError>;

    async fn set_autoscaler(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
        enabled: bool,
    ) -> Result<(), DeployError>;
}
