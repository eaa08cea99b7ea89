//! `cf` CLI platform client

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use task_api::{ReleaseMarker, ReleaseSummary};

use crate::command::{
    placeholders, shell_quote, CommandFlags, CommandTemplate, Operation, TemplateRegistry,
    ToolVersion,
};
use crate::errors::DeployError;
use crate::logs::LogContext;
use crate::platform::{PlatformClient, PlatformContext, PushSpec, STATUS_IDENTIFIER_ENV};
use crate::process::{CommandExecutionResult, CommandOutcome, CommandRequest, ProcessExecutor};
use crate::tracker::parse_revision;

/// One row of `cf apps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRow {
    pub name: String,
    pub running: u32,
    pub total: u32,
    pub urls: BTreeSet<String>,
}

/// A route split into the parts `map-route` takes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub host: Option<String>,
    pub domain: String,
    pub path: Option<String>,
}

/// Parse the table printed by `cf apps` (v6 `instances`/`urls` or v7
/// `processes`/`routes` columns).
pub fn parse_apps_table(output: &str) -> Vec<AppRow> {
    let mut lines = output.lines();
    let Some(header) = lines
        .by_ref()
        .find(|l| l.trim_start().starts_with("name") && l.contains("requested state"))
    else {
        return Vec::new();
    };
    let url_column = header.find("urls").or_else(|| header.find("routes"));

    lines
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let name = line.split_whitespace().next()?.to_string();
            let (running, total) = line
                .split_whitespace()
                .map(|t| t.trim_end_matches(','))
                .filter_map(parse_instances)
                .next()
                .unwrap_or((0, 0));
            let urls = url_column
                .and_then(|col| line.get(col..))
                .map(|rest| {
                    rest.split(',')
                        .map(str::trim)
                        .filter(|u| !u.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Some(AppRow {
                name,
                running,
                total,
                urls,
            })
        })
        .collect()
}

// `2/3` or `web:2/3`
fn parse_instances(token: &str) -> Option<(u32, u32)> {
    let counts = match token.split_once(':') {
        Some(("web", counts)) => counts,
        Some(_) => return None,
        None => token,
    };
    let (running, total) = counts.split_once('/')?;
    Some((running.parse().ok()?, total.parse().ok()?))
}

/// Status marker from `cf env` output
pub fn parse_marker(output: &str) -> Option<ReleaseMarker> {
    output.lines().find_map(|line| {
        let (key, value) = line.trim().split_once(':')?;
        if key.trim().trim_matches('"') == STATUS_IDENTIFIER_ENV {
            ReleaseMarker::parse(value.trim().trim_end_matches(',').trim_matches('"'))
        } else {
            None
        }
    })
}

/// Autoscaler state for `name` from `cf autoscaling-apps` output.
/// `None` when the app has no policy attached.
pub fn parse_autoscaler_state(output: &str, name: &str) -> Option<bool> {
    output.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [app, .., enabled] if *app == name => {
                Some(enabled.eq_ignore_ascii_case("true"))
            }
            _ => None,
        }
    })
}

/// Split `host.domain/path`: the path at the first `/`, the host at the first `.`
pub fn parse_route(url: &str) -> Route {
    let url = url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let (authority, path) = match url.split_once('/') {
        Some((authority, path)) if !path.is_empty() => (authority, Some(path.to_string())),
        Some((authority, _)) => (authority, None),
        None => (url, None),
    };
    match authority.split_once('.') {
        Some((host, domain)) => Route {
            host: Some(host.to_string()),
            domain: domain.to_string(),
            path,
        },
        None => Route {
            host: None,
            domain: authority.to_string(),
            path,
        },
    }
}

fn route_options(route: &Route, version: ToolVersion) -> String {
    let mut options = Vec::new();
    if let Some(host) = &route.host {
        options.push(format!("--hostname {}", shell_quote(host)));
    }
    if let Some(path) = &route.path {
        let path = match version {
            ToolVersion::CfV7 => format!("/{}", path),
            _ => path.clone(),
        };
        options.push(format!("--path {}", shell_quote(&path)));
    }
    options.join(" ")
}

fn release_from_row(row: AppRow, id: String, marker: Option<ReleaseMarker>) -> ReleaseSummary {
    ReleaseSummary {
        id,
        revision: parse_revision(&row.name).unwrap_or(0),
        name: row.name,
        total_instances: row.total,
        running_instances: row.running,
        urls: row.urls,
        marker,
    }
}

/// True when `name` is `<prefix>-<revision>`
pub fn matches_prefix(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
        .is_some_and(|suffix| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()))
}

/// Drives the `cf` CLI with `CF_HOME` pointed at the task working directory
pub struct CfCliClient {
    executor: Arc<ProcessExecutor>,
    templates: Arc<TemplateRegistry>,
    flags: CommandFlags,
}

impl CfCliClient {
    pub fn new(executor: Arc<ProcessExecutor>, templates: Arc<TemplateRegistry>) -> Self {
        Self {
            executor,
            templates,
            flags: CommandFlags::none(),
        }
    }

    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags = flags;
        self
    }

    fn request(
        &self,
        ctx: &PlatformContext,
        operation: Operation,
        fill: impl FnOnce(CommandTemplate) -> CommandTemplate,
    ) -> Result<CommandRequest, DeployError> {
        let version = Some(ctx.cli_version);
        let template = self.templates.resolve(operation, version)?;
        let template = self
            .templates
            .apply_flags(template, operation, &self.flags, version);
        let line = fill(template).render()?;
        Ok(CommandRequest::new(operation, line, &ctx.home, ctx.timeout).env("CF_HOME", &ctx.home))
    }

    async fn run(
        &self,
        log: &LogContext,
        request: CommandRequest,
    ) -> Result<CommandExecutionResult, DeployError> {
        match self.executor.execute_or_fail(&request, log).await? {
            CommandOutcome::Completed(result) => Ok(result),
            CommandOutcome::ReleaseNotFound => Err(DeployError::Platform(format!(
                "Unexpected not-found result from {}",
                request.command_line
            ))),
        }
    }

    async fn run_op(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        operation: Operation,
        fill: impl FnOnce(CommandTemplate) -> CommandTemplate,
    ) -> Result<CommandExecutionResult, DeployError> {
        let request = self.request(ctx, operation, fill)?;
        self.run(log, request).await
    }

    async fn app_rows(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
    ) -> Result<Vec<AppRow>, DeployError> {
        let result = self.run_op(ctx, log, Operation::CfListApps, |t| t).await?;
        Ok(parse_apps_table(&result.stdout))
    }

    async fn app_guid(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<String, DeployError> {
        let result = self
            .run_op(ctx, log, Operation::CfAppGuid, |t| {
                t.set(placeholders::APP_NAME, shell_quote(name))
            })
            .await?;
        result
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| DeployError::Platform(format!("No GUID reported for {}", name)))
    }

    async fn app_marker(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<Option<ReleaseMarker>, DeployError> {
        let result = self
            .run_op(ctx, log, Operation::CfAppEnv, |t| {
                t.set(placeholders::APP_NAME, shell_quote(name))
            })
            .await?;
        Ok(parse_marker(&result.stdout))
    }
}

#[async_trait]
impl PlatformClient for CfCliClient {
    async fn login(&self, ctx: &PlatformContext, log: &LogContext) -> Result<(), DeployError> {
        let creds = &ctx.credentials;
        let mut endpoint = shell_quote(&creds.endpoint);
        if creds.skip_ssl_validation {
            endpoint.push_str(" --skip-ssl-validation");
        }
        log.info(format!("Logging in to {}", creds.endpoint));
        self.run_op(ctx, log, Operation::CfApi, |t| {
            t.set(placeholders::ENDPOINT, &endpoint)
        })
        .await?;

        let auth = self
            .request(ctx, Operation::CfAuth, |t| t)?
            .env("CF_USERNAME", &creds.username)
            .secret_env(
                "CF_PASSWORD",
                SecretString::from(creds.password.expose_secret().to_string()),
            );
        self.run(log, auth).await?;

        self.run_op(ctx, log, Operation::CfTarget, |t| {
            t.set(placeholders::ORG, shell_quote(&creds.organization))
                .set(placeholders::SPACE, shell_quote(&creds.space))
        })
        .await?;
        Ok(())
    }

    async fn list_releases(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        prefix: &str,
        include_markers: bool,
    ) -> Result<Vec<ReleaseSummary>, DeployError> {
        let mut rows: Vec<AppRow> = self
            .app_rows(ctx, log)
            .await?
            .into_iter()
            .filter(|row| matches_prefix(&row.name, prefix))
            .collect();
        rows.sort_by_key(|row| parse_revision(&row.name).unwrap_or(0));

        let mut releases = Vec::with_capacity(rows.len());
        for row in rows {
            let id = self.app_guid(ctx, log, &row.name).await?;
            let marker = if include_markers {
                self.app_marker(ctx, log, &row.name).await?
            } else {
                None
            };
            releases.push(release_from_row(row, id, marker));
        }
        Ok(releases)
    }

    async fn get_release(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<ReleaseSummary, DeployError> {
        let row = self
            .app_rows(ctx, log)
            .await?
            .into_iter()
            .find(|row| row.name == name)
            .ok_or_else(|| DeployError::Platform(format!("Application {} not found", name)))?;
        let id = self.app_guid(ctx, log, name).await?;
        Ok(release_from_row(row, id, None))
    }

    async fn push_release(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        spec: &PushSpec,
    ) -> Result<ReleaseSummary, DeployError> {
        let manifest = shell_quote(&spec.manifest.to_string_lossy());
        let vars_files = spec
            .vars_files
            .iter()
            .map(|p| format!("--vars-file {}", shell_quote(&p.to_string_lossy())))
            .collect::<Vec<_>>()
            .join(" ");
        self.run_op(ctx, log, Operation::CfPush, |t| {
            t.set(placeholders::MANIFEST_FILE, &manifest)
                .set(placeholders::VARS_FILES, &vars_files)
        })
        .await?;
        self.get_release(ctx, log, &spec.name).await
    }

    async fn scale_release(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
        instances: u32,
    ) -> Result<ReleaseSummary, DeployError> {
        self.run_op(ctx, log, Operation::CfScale, |t| {
            t.set(placeholders::APP_NAME, shell_quote(name))
                .set(placeholders::INSTANCE_COUNT, instances.to_string())
        })
        .await?;
        self.get_release(ctx, log, name).await
    }

    async fn delete_release(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<(), DeployError> {
        self.run_op(ctx, log, Operation::CfDelete, |t| {
            t.set(placeholders::APP_NAME, shell_quote(name))
        })
        .await?;
        Ok(())
    }

    async fn map_routes(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
        urls: &[String],
    ) -> Result<(), DeployError> {
        for url in urls {
            let route = parse_route(url);
            let options = route_options(&route, ctx.cli_version);
            self.run_op(ctx, log, Operation::CfMapRoute, |t| {
                t.set(placeholders::APP_NAME, shell_quote(name))
                    .set(placeholders::DOMAIN, shell_quote(&route.domain))
                    .set(placeholders::ROUTE_OPTIONS, &options)
            })
            .await?;
        }
        Ok(())
    }

    async fn unmap_routes(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
        urls: &[String],
    ) -> Result<(), DeployError> {
        for url in urls {
            let route = parse_route(url);
            let options = route_options(&route, ctx.cli_version);
            self.run_op(ctx, log, Operation::CfUnmapRoute, |t| {
                t.set(placeholders::APP_NAME, shell_quote(name))
                    .set(placeholders::DOMAIN, shell_quote(&route.domain))
                    .set(placeholders::ROUTE_OPTIONS, &options)
            })
            .await?;
        }
        Ok(())
    }

    async fn set_marker(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
        marker: ReleaseMarker,
    ) -> Result<(), DeployError> {
        self.run_op(ctx, log, Operation::CfSetEnv, |t| {
            t.set(placeholders::APP_NAME, shell_quote(name))
                .set(placeholders::ENV_NAME, STATUS_IDENTIFIER_ENV)
                .set(placeholders::ENV_VALUE, marker.as_str())
        })
        .await?;
        Ok(())
    }

    async fn clear_marker(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<(), DeployError> {
        self.run_op(ctx, log, Operation::CfUnsetEnv, |t| {
            t.set(placeholders::APP_NAME, shell_quote(name))
                .set(placeholders::ENV_NAME, STATUS_IDENTIFIER_ENV)
        })
        .await?;
        Ok(())
    }

    async fn autoscaler_state(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
    ) -> Result<Option<bool>, DeployError> {
        let result = self
            .run_op(ctx, log, Operation::CfAutoscalingApps, |t| t)
            .await?;
        Ok(parse_autoscaler_state(&result.stdout, name))
    }

    async fn set_autoscaler(
        &self,
        ctx: &PlatformContext,
        log: &LogContext,
        name: &str,
        enabled: bool,
    ) -> Result<(), DeployError> {
        let operation = if enabled {
            Operation::CfEnableAutoscaling
        } else {
            Operation::CfDisableAutoscaling
        };
        self.run_op(ctx, log, operation, |t| {
            t.set(placeholders::APP_NAME, shell_quote(name))
        })
        .await?;
        Ok(())
    }
}
