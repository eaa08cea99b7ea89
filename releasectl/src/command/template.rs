//! Template registry
//!
//! Maps an (operation, major version) pair to a shell command line with named
//! `${...}` placeholders. The registry is built once at startup and shared by
//! reference.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::command::flags::CommandFlags;
use crate::errors::DeployError;

/// Placeholder tokens
pub mod placeholders {
    pub const KUBECONFIG_PATH: &str = "${KUBECONFIG_PATH}";
    pub const COMMAND_FLAGS: &str = "${COMMAND_FLAGS}";

    // package manager
    pub const RELEASE_NAME: &str = "${RELEASE_NAME}";
    pub const CHART_REFERENCE: &str = "${CHART_REFERENCE}";
    pub const OVERRIDE_VALUES: &str = "${OVERRIDE_VALUES}";
    pub const NAMESPACE: &str = "${NAMESPACE}";
    pub const REVISION: &str = "${REVISION}";
    pub const REPO_NAME: &str = "${REPO_NAME}";
    pub const REPO_URL: &str = "${REPO_URL}";
    pub const CHART_NAME: &str = "${CHART_NAME}";
    pub const CHART_VERSION: &str = "${CHART_VERSION}";
    pub const DEST_DIR: &str = "${DEST_DIR}";

    // application scheduler
    pub const ENDPOINT: &str = "${ENDPOINT}";
    pub const ORG: &str = "${ORG}";
    pub const SPACE: &str = "${SPACE}";
    pub const APP_NAME: &str = "${APP_NAME}";
    pub const INSTANCE_COUNT: &str = "${INSTANCE_COUNT}";
    pub const MANIFEST_FILE: &str = "${MANIFEST_FILE}";
    pub const VARS_FILES: &str = "${VARS_FILES}";
    pub const DOMAIN: &str = "${DOMAIN}";
    pub const ROUTE_OPTIONS: &str = "${ROUTE_OPTIONS}";
    pub const ENV_NAME: &str = "${ENV_NAME}";
    pub const ENV_VALUE: &str = "${ENV_VALUE}";

    // manifest
    pub const APP_PATH: &str = "${APP_PATH}";
    pub const DOCKER_IMAGE: &str = "${DOCKER_IMAGE}";
}

/// External CLI family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Application-scheduler CLI (`cf`)
    Cf,
    /// Package-deployment CLI (`helm`)
    Helm,
}

/// Major version of an external CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolVersion {
    CfV6,
    CfV7,
    HelmV2,
    HelmV3,
}

impl ToolVersion {
    pub fn tool(&self) -> Tool {
        match self {
            ToolVersion::CfV6 | ToolVersion::CfV7 => Tool::Cf,
            ToolVersion::HelmV2 | ToolVersion::HelmV3 => Tool::Helm,
        }
    }

    /// Oldest supported major version, used when no tag is set
    pub fn oldest(tool: Tool) -> Self {
        match tool {
            Tool::Cf => ToolVersion::CfV6,
            Tool::Helm => ToolVersion::HelmV2,
        }
    }

    /// Parse a tag such as `v7` or `3` for the given tool; `None` and blank
    /// tags resolve to the oldest version.
    pub fn from_tag(tool: Tool, tag: Option<&str>) -> Result<Self, DeployError> {
        let tag = match tag.map(str::trim) {
            None | Some("") => return Ok(Self::oldest(tool)),
            Some(tag) => tag.trim_start_matches(['v', 'V']),
        };
        match (tool, tag) {
            (Tool::Cf, "6") => Ok(ToolVersion::CfV6),
            (Tool::Cf, "7") => Ok(ToolVersion::CfV7),
            (Tool::Helm, "2") => Ok(ToolVersion::HelmV2),
            (Tool::Helm, "3") => Ok(ToolVersion::HelmV3),
            _ => Err(DeployError::config(format!(
                "Unsupported {:?} version tag: {}",
                tool, tag
            ))),
        }
    }
}

/// Abstract operation performed through a CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CfApi,
    CfAuth,
    CfTarget,
    CfListApps,
    CfAppGuid,
    CfAppEnv,
    CfPush,
    CfScale,
    CfDelete,
    CfMapRoute,
    CfUnmapRoute,
    CfSetEnv,
    CfUnsetEnv,
    CfAutoscalingApps,
    CfEnableAutoscaling,
    CfDisableAutoscaling,

    HelmInstall,
    HelmUpgrade,
    HelmRollback,
    HelmReleaseHistory,
    HelmListReleases,
    HelmRepoAdd,
    HelmRepoUpdate,
    HelmFetch,
    HelmDelete,
    HelmVersion,
}

impl Operation {
    pub fn tool(&self) -> Tool {
        match self {
            Operation::CfApi
            | Operation::CfAuth
            | Operation::CfTarget
            | Operation::CfListApps
            | Operation::CfAppGuid
            | Operation::CfAppEnv
            | Operation::CfPush
            | Operation::CfScale
            | Operation::CfDelete
            | Operation::CfMapRoute
            | Operation::CfUnmapRoute
            | Operation::CfSetEnv
            | Operation::CfUnsetEnv
            | Operation::CfAutoscalingApps
            | Operation::CfEnableAutoscaling
            | Operation::CfDisableAutoscaling => Tool::Cf,
            _ => Tool::Helm,
        }
    }

    /// Operations probing a release that may not exist yet
    pub fn is_release_lookup(&self) -> bool {
        matches!(
            self,
            Operation::HelmReleaseHistory | Operation::HelmListReleases
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Stands in for `$` inside substituted values until `render`, so a value's
/// own `${...}` is never taken for a template token.
const VALUE_DOLLAR: char = '\u{E000}';

/// A command line with some placeholders still open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    text: String,
}

impl CommandTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Literal replacement of every occurrence of `token`. The value is
    /// inserted verbatim and never substituted into again.
    pub fn set(mut self, token: &str, value: impl AsRef<str>) -> Self {
        let value = value.as_ref().replace('$', &VALUE_DOLLAR.to_string());
        self.text = self.text.replace(token, &value);
        self
    }

    /// Remove `fragment` entirely (used for optional prefixes such as
    /// `KUBECONFIG=${KUBECONFIG_PATH}`)
    pub fn strip(mut self, fragment: &str) -> Self {
        self.text = self.text.replace(fragment, "");
        self
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Final command line. A template token left at this point is a bug in
    /// the caller's substitutions, reported as a configuration error.
    pub fn render(self) -> Result<String, DeployError> {
        if let Some(start) = self.text.find("${") {
            let end = self.text[start..]
                .find('}')
                .map(|i| start + i + 1)
                .unwrap_or(self.text.len());
            tracing::error!("Unresolved placeholder in command template: {}", self.text);
            return Err(DeployError::config(format!(
                "Unresolved placeholder {} in command template",
                &self.text[start..end]
            )));
        }
        Ok(self.text.replace(VALUE_DOLLAR, "$").trim().to_string())
    }
}

/// Single-quote `value` for `sh`
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Registry of command templates keyed by (operation, version)
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<(Operation, ToolVersion), &'static str>,
}

impl TemplateRegistry {
    /// Empty registry, for callers that register their own templates
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn register(&mut self, operation: Operation, version: ToolVersion, template: &'static str) {
        self.templates.insert((operation, version), template);
    }

    /// Registry with every built-in CLI template
    pub fn builtin() -> Self {
        use Operation::*;
        use ToolVersion::*;

        let mut registry = Self::empty();

        for version in [CfV6, CfV7] {
            registry.register(CfApi, version, "cf api ${ENDPOINT} ${COMMAND_FLAGS}");
            registry.register(CfAuth, version, "cf auth \"$CF_USERNAME\" \"$CF_PASSWORD\"");
            registry.register(CfTarget, version, "cf target -o ${ORG} -s ${SPACE}");
            registry.register(CfListApps, version, "cf apps");
            registry.register(CfAppGuid, version, "cf app ${APP_NAME} --guid");
            registry.register(CfAppEnv, version, "cf env ${APP_NAME}");
            registry.register(CfSetEnv, version, "cf set-env ${APP_NAME} ${ENV_NAME} ${ENV_VALUE}");
            registry.register(CfUnsetEnv, version, "cf unset-env ${APP_NAME} ${ENV_NAME}");
            registry.register(
                CfScale,
                version,
                "cf scale ${APP_NAME} -i ${INSTANCE_COUNT} ${COMMAND_FLAGS}",
            );
            registry.register(CfDelete, version, "cf delete ${APP_NAME} -f");
            registry.register(
                CfMapRoute,
                version,
                "cf map-route ${APP_NAME} ${DOMAIN} ${ROUTE_OPTIONS}",
            );
            registry.register(
                CfUnmapRoute,
                version,
                "cf unmap-route ${APP_NAME} ${DOMAIN} ${ROUTE_OPTIONS}",
            );
            registry.register(CfAutoscalingApps, version, "cf autoscaling-apps");
            registry.register(CfEnableAutoscaling, version, "cf enable-autoscaling ${APP_NAME}");
            registry.register(CfDisableAutoscaling, version, "cf disable-autoscaling ${APP_NAME}");
        }
        registry.register(
            CfPush,
            CfV6,
            "cf push -f ${MANIFEST_FILE} ${VARS_FILES} --no-start ${COMMAND_FLAGS}",
        );
        registry.register(
            CfPush,
            CfV7,
            "cf push -f ${MANIFEST_FILE} ${VARS_FILES} --no-start --strategy=null ${COMMAND_FLAGS}",
        );

        registry.register(
            HelmInstall,
            HelmV2,
            "KUBECONFIG=${KUBECONFIG_PATH} helm install ${CHART_REFERENCE} ${COMMAND_FLAGS} --name ${RELEASE_NAME} --namespace ${NAMESPACE} ${OVERRIDE_VALUES}",
        );
        registry.register(
            HelmInstall,
            HelmV3,
            "KUBECONFIG=${KUBECONFIG_PATH} helm install ${RELEASE_NAME} ${CHART_REFERENCE} ${COMMAND_FLAGS} --namespace ${NAMESPACE} ${OVERRIDE_VALUES}",
        );
        registry.register(
            HelmUpgrade,
            HelmV2,
            "KUBECONFIG=${KUBECONFIG_PATH} helm upgrade ${COMMAND_FLAGS} ${RELEASE_NAME} ${CHART_REFERENCE} ${OVERRIDE_VALUES}",
        );
        registry.register(
            HelmUpgrade,
            HelmV3,
            "KUBECONFIG=${KUBECONFIG_PATH} helm upgrade ${COMMAND_FLAGS} ${RELEASE_NAME} ${CHART_REFERENCE} --namespace ${NAMESPACE} ${OVERRIDE_VALUES}",
        );
        registry.register(
            HelmRollback,
            HelmV2,
            "KUBECONFIG=${KUBECONFIG_PATH} helm rollback ${COMMAND_FLAGS} ${RELEASE_NAME} ${REVISION}",
        );
        registry.register(
            HelmRollback,
            HelmV3,
            "KUBECONFIG=${KUBECONFIG_PATH} helm rollback ${RELEASE_NAME} ${REVISION} ${COMMAND_FLAGS} --namespace ${NAMESPACE}",
        );
        registry.register(
            HelmReleaseHistory,
            HelmV2,
            "KUBECONFIG=${KUBECONFIG_PATH} helm hist ${COMMAND_FLAGS} ${RELEASE_NAME} --max 5",
        );
        registry.register(
            HelmReleaseHistory,
            HelmV3,
            "KUBECONFIG=${KUBECONFIG_PATH} helm hist ${RELEASE_NAME} ${COMMAND_FLAGS} --max 5 --namespace ${NAMESPACE}",
        );
        registry.register(
            HelmListReleases,
            HelmV2,
            "KUBECONFIG=${KUBECONFIG_PATH} helm list ${COMMAND_FLAGS} ^${RELEASE_NAME}$",
        );
        registry.register(
            HelmListReleases,
            HelmV3,
            "KUBECONFIG=${KUBECONFIG_PATH} helm list ${COMMAND_FLAGS} --namespace ${NAMESPACE} --filter ^${RELEASE_NAME}$",
        );
        registry.register(
            HelmRepoAdd,
            HelmV2,
            "helm repo add ${REPO_NAME} ${REPO_URL} ${COMMAND_FLAGS}",
        );
        registry.register(
            HelmRepoAdd,
            HelmV3,
            "helm repo add ${REPO_NAME} ${REPO_URL} ${COMMAND_FLAGS}",
        );
        registry.register(
            HelmRepoUpdate,
            HelmV2,
            "KUBECONFIG=${KUBECONFIG_PATH} helm repo update ${COMMAND_FLAGS}",
        );
        registry.register(
            HelmRepoUpdate,
            HelmV3,
            "KUBECONFIG=${KUBECONFIG_PATH} helm repo update ${COMMAND_FLAGS}",
        );
        registry.register(
            HelmFetch,
            HelmV2,
            "helm fetch ${COMMAND_FLAGS} ${REPO_NAME}/${CHART_NAME} --untar --untardir ${DEST_DIR} ${CHART_VERSION}",
        );
        registry.register(
            HelmFetch,
            HelmV3,
            "helm pull ${COMMAND_FLAGS} ${REPO_NAME}/${CHART_NAME} --untar --untardir ${DEST_DIR} ${CHART_VERSION}",
        );
        registry.register(
            HelmDelete,
            HelmV2,
            "KUBECONFIG=${KUBECONFIG_PATH} helm delete ${COMMAND_FLAGS} --purge ${RELEASE_NAME}",
        );
        registry.register(
            HelmDelete,
            HelmV3,
            "KUBECONFIG=${KUBECONFIG_PATH} helm uninstall ${RELEASE_NAME} ${COMMAND_FLAGS} --namespace ${NAMESPACE}",
        );
        registry.register(
            HelmVersion,
            HelmV2,
            "KUBECONFIG=${KUBECONFIG_PATH} helm version --short ${COMMAND_FLAGS}",
        );
        registry.register(
            HelmVersion,
            HelmV3,
            "KUBECONFIG=${KUBECONFIG_PATH} helm version --short ${COMMAND_FLAGS}",
        );

        registry
    }

    /// Template for `operation`; an unset version resolves to the oldest
    /// supported major version of the operation's tool.
    pub fn resolve(
        &self,
        operation: Operation,
        version: Option<ToolVersion>,
    ) -> Result<CommandTemplate, DeployError> {
        let version = version.unwrap_or_else(|| ToolVersion::oldest(operation.tool()));
        self.templates
            .get(&(operation, version))
            .map(|t| CommandTemplate::new(*t))
            .ok_or_else(|| {
                DeployError::config(format!(
                    "Command template not found for {} ({:?})",
                    operation, version
                ))
            })
    }

    /// Fill the extra-flags placeholder of `template`
    pub fn apply_flags(
        &self,
        template: CommandTemplate,
        operation: Operation,
        flags: &CommandFlags,
        version: Option<ToolVersion>,
    ) -> CommandTemplate {
        let version = version.unwrap_or_else(|| ToolVersion::oldest(operation.tool()));
        let flags = flags.for_operation(operation, version);
        template.set(placeholders::COMMAND_FLAGS, flags)
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
