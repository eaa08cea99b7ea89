//! Release task models

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

fn default_keep_count() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    600
}

/// Overall status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failure,
}

/// Status marker carried by a release in blue-green rollouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReleaseMarker {
    /// Serving production traffic
    Active,
    /// Freshly created, not yet promoted
    Stage,
}

impl ReleaseMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseMarker::Active => "ACTIVE",
            ReleaseMarker::Stage => "STAGE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(ReleaseMarker::Active),
            "STAGE" => Some(ReleaseMarker::Stage),
            _ => None,
        }
    }
}

/// Point-in-time view of one release on the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSummary {
    /// Platform handle (application GUID)
    pub id: String,

    /// Release name, `<prefix>-<revision>`
    pub name: String,

    /// Revision parsed from the name suffix
    pub revision: u32,

    /// Requested instance count
    pub total_instances: u32,

    /// Instances currently running
    pub running_instances: u32,

    /// Routes bound to the release
    #[serde(default)]
    pub urls: BTreeSet<String>,

    /// Status marker, when the platform query asked for it
    #[serde(default)]
    pub marker: Option<ReleaseMarker>,
}

/// Routes and instances a release had before it was downsized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSetupTimeSnapshot {
    pub application_guid: String,
    pub application_name: String,
    pub urls: Vec<String>,
    pub initial_instance_count: u32,
}

impl From<&ReleaseSummary> for AppSetupTimeSnapshot {
    fn from(release: &ReleaseSummary) -> Self {
        Self {
            application_guid: release.id.clone(),
            application_name: release.name.clone(),
            urls: release.urls.iter().cloned().collect(),
            initial_instance_count: release.total_instances,
        }
    }
}

/// Reference to an encrypted credential field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedField {
    /// Name of the field in the platform config (e.g. "password")
    pub field_name: String,

    /// Opaque reference handed to the decryption service
    pub reference: String,
}

/// Target platform coordinates and encrypted credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// API endpoint of the application scheduler
    pub endpoint: String,

    /// Organization / namespace
    pub organization: String,

    /// Space within the organization
    pub space: String,

    /// Login user name
    pub username: String,

    /// Skip TLS validation when talking to the endpoint
    #[serde(default)]
    pub skip_ssl_validation: bool,

    /// Encrypted secrets (password and friends)
    #[serde(default)]
    pub encrypted_fields: Vec<EncryptedField>,
}

/// Deployable artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactReference {
    /// Build artifact fetched to a local file before push
    File { location: String },

    /// Container image, pushed by reference
    ContainerImage { image: String },
}

impl ArtifactReference {
    pub fn is_container_image(&self) -> bool {
        matches!(self, ArtifactReference::ContainerImage { .. })
    }
}

/// Create a new versioned release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Releases are named `<prefix>-<revision>`
    pub release_name_prefix: String,

    pub platform: PlatformConfig,

    pub artifact: ArtifactReference,

    /// Application manifest with `${...}` placeholders
    pub manifest_template: String,

    /// Variable override files, one document each
    #[serde(default)]
    pub variable_overrides: Vec<String>,

    #[serde(default)]
    pub is_blue_green: bool,

    /// Number of older releases to retain (active one included)
    #[serde(default = "default_keep_count")]
    pub older_version_count_to_keep: u32,

    /// Toggle autoscaler policies around instance changes
    #[serde(default)]
    pub use_app_autoscaler: bool,

    /// Per-command timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// CLI major version tag ("v6", "v7"); oldest supported when unset
    #[serde(default)]
    pub cli_version: Option<String>,
}

/// Instance change a rollback must apply to one release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDelta {
    pub release_id: String,
    pub release_name: String,
    pub desired_count: u32,
    pub previous_count: u32,
}

/// Reverse a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub platform: PlatformConfig,

    pub deltas: Vec<InstanceDelta>,

    #[serde(default)]
    pub standard_blue_green: bool,

    /// Previous release whose routes may need restoring
    #[serde(default)]
    pub app_to_downsize: Option<ReleaseSummary>,

    /// Release created by the deployment being reversed
    #[serde(default)]
    pub new_app_details: Option<ReleaseSummary>,

    #[serde(default)]
    pub use_app_autoscaler: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub cli_version: Option<String>,
}

/// Chart repository registered before a package-manager command runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartRepository {
    pub name: String,
    pub url: String,
}

/// What a package-manager task does to its release
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HelmAction {
    /// Install the release, or upgrade it when it already has history.
    /// With a repository, `chart` is a chart name pulled from it at
    /// `chart_version`; otherwise it is passed to the CLI as is.
    Deploy {
        chart: String,
        #[serde(default)]
        chart_version: Option<String>,
        #[serde(default)]
        value_overrides: Vec<String>,
    },
    Rollback {
        revision: u32,
    },
    Uninstall,
}

/// Run one package-manager action against a cluster release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmRequest {
    pub release_name: String,

    pub namespace: String,

    #[serde(flatten)]
    pub action: HelmAction,

    #[serde(default)]
    pub repository: Option<ChartRepository>,

    /// Cluster credentials; the CLI default applies when unset
    #[serde(default)]
    pub kubeconfig_path: Option<String>,

    /// Exported as `GOOGLE_APPLICATION_CREDENTIALS`
    #[serde(default)]
    pub cloud_key_path: Option<String>,

    /// Extra flags appended to every command, verbatim
    #[serde(default)]
    pub command_flags: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// CLI major version tag ("v2", "v3"); configured default when unset
    #[serde(default)]
    pub cli_version: Option<String>,
}

/// One entry of a release's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmRevision {
    pub revision: u32,
    pub status: String,
    pub chart: String,
    pub description: String,
}

/// Package-manager task payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmResult {
    pub release_name: String,

    /// Command actually run: install, upgrade, rollback or uninstall
    pub performed: String,

    /// Release history after the command, newest last
    pub history: Vec<HelmRevision>,
}

/// One orchestration request, discriminated once at the dispatch boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command_type", rename_all = "snake_case")]
pub enum TaskRequest {
    Setup(DeploymentRequest),
    Rollback(RollbackRequest),
    Helm(HelmRequest),
}

/// The release created by a setup task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReleaseInfo {
    pub guid: String,
    pub name: String,
    pub urls: Vec<String>,
    pub instance_count: u32,
}

/// Setup task payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupResult {
    pub new_release: NewReleaseInfo,

    /// Sum of instances across the remaining previous releases
    pub total_previous_instance_count: u32,

    /// Running instances of the most recent previous release
    pub most_recent_instance_count: u32,

    pub active_release: Option<AppSetupTimeSnapshot>,

    /// Blue-green only: candidate a later rollback restores
    pub most_recent_inactive: Option<AppSetupTimeSnapshot>,

    pub downsized: Vec<String>,
    pub deleted: Vec<String>,
}

/// Instance count of a release after a rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceData {
    pub release_id: String,
    pub release_name: String,
    pub instance_count: u32,
}

/// Rollback task payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub instance_data: Vec<InstanceData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    Setup(SetupResult),
    Rollback(RollbackResult),
    Helm(HelmResult),
}

/// Structured result of every orchestration call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub status: TaskStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<TaskPayload>,
}

impl TaskResponse {
    pub fn success(payload: TaskPayload) -> Self {
        Self {
            status: TaskStatus::Success,
            error_message: None,
            payload: Some(payload),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failure,
            error_message: Some(message.into()),
            payload: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}
