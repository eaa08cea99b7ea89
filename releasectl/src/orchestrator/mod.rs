//! Task orchestration
//!
//! [`TaskDispatcher`] receives a closed [`TaskRequest`] and hands it to the
//! matching orchestrator. Orchestrators never return errors: every outcome is
//! a [`TaskResponse`].

pub mod fsm;
pub mod helm;
pub mod rollback;
pub mod setup;

use std::sync::Arc;
use std::time::Duration;

use task_api::{PlatformConfig, TaskRequest, TaskResponse};

use crate::collaborators::{ArtifactFetcher, CredentialDecryptor};
use crate::command::{Tool, ToolVersion};
use crate::errors::DeployError;
use crate::logs::LogContext;
use crate::platform::{PlatformClient, PlatformContext};
use crate::workdir::{ScopedWorkDir, WorkingDirectoryManager};

pub use fsm::{SetupEvent, SetupFsm, SetupState};
pub use helm::HelmOrchestrator;
pub use rollback::RollbackOrchestrator;
pub use setup::SetupOrchestrator;

/// Everything an orchestrator talks to, built once at startup
#[derive(Clone)]
pub struct Collaborators {
    pub platform: Arc<dyn PlatformClient>,
    pub decryptor: Arc<dyn CredentialDecryptor>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub workdirs: WorkingDirectoryManager,
    /// CLI version tag used when a request carries none
    pub default_cli_version: Option<String>,
    /// Command timeout used when a request asks for 0 seconds
    pub default_timeout_secs: u64,
}

impl Collaborators {
    /// Decrypt credentials, then allocate the task's working directory.
    /// The caller owns the directory and must release it.
    pub(crate) async fn open_session(
        &self,
        config: &PlatformConfig,
        cli_version: Option<&str>,
        timeout_secs: u64,
        log: &LogContext,
    ) -> Result<(ScopedWorkDir, PlatformContext), DeployError> {
        let credentials = self.decryptor.decrypt(config).await?;
        let version = ToolVersion::from_tag(
            Tool::Cf,
            cli_version.or(self.default_cli_version.as_deref()),
        )?;
        let timeout_secs = match timeout_secs {
            0 => self.default_timeout_secs,
            secs => secs,
        };
        let workdir = self.workdirs.allocate().await?;
        log.debug(format!("Working directory {}", workdir.home_path()));

        let ctx = PlatformContext {
            home: workdir.home_path(),
            credentials: Arc::new(credentials),
            cli_version: version,
            timeout: Duration::from_secs(timeout_secs),
        };
        Ok((workdir, ctx))
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("workdirs", &self.workdirs)
            .field("default_cli_version", &self.default_cli_version)
            .field("default_timeout_secs", &self.default_timeout_secs)
            .finish_non_exhaustive()
    }
}

/// Routes each task to its orchestrator
#[derive(Debug, Clone)]
pub struct TaskDispatcher {
    setup: SetupOrchestrator,
    rollback: RollbackOrchestrator,
    helm: Option<HelmOrchestrator>,
}

impl TaskDispatcher {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            setup: SetupOrchestrator::new(collaborators.clone()),
            rollback: RollbackOrchestrator::new(collaborators),
            helm: None,
        }
    }

    /// Accept package-manager tasks
    pub fn with_helm(mut self, helm: HelmOrchestrator) -> Self {
        self.helm = Some(helm);
        self
    }

    pub async fn dispatch(&self, request: &TaskRequest, log: &LogContext) -> TaskResponse {
        match request {
            TaskRequest::Setup(request) => {
                self.setup
                    .run(request, &log.with_section("Setup"))
                    .await
            }
            TaskRequest::Rollback(request) => {
                self.rollback
                    .run(request, &log.with_section("Rollback"))
                    .await
            }
            TaskRequest::Helm(request) => match &self.helm {
                Some(helm) => helm.run(request, &log.with_section("Helm")).await,
                None => {
                    let e = DeployError::config("Helm tasks are not configured");
                    log.error(e.to_string());
                    TaskResponse::failure(e.to_string())
                }
            },
        }
    }
}
