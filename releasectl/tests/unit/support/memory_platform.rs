//! In-memory platform shared by the orchestration tests
//!
//! `MemoryPlatform` keeps releases in a `Vec`, applies every mutating call to
//! them and records the call, so orchestration tests can assert both the end
//! state and the exact sequence of platform mutations.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use task_api::{ReleaseMarker, ReleaseSummary};

use releasectl::errors::DeployError;
use releasectl::logs::LogContext;
use releasectl::platform::cf::matches_prefix;
use releasectl::platform::{PlatformClient, PlatformContext, PushSpec};
use releasectl::tracker::parse_revision;

/// Mutating platform calls, in the order they were made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Login,
    Push { name: String },
    Scale { name: String, instances: u32 },
    Delete { name: String },
    MapRoutes { name: String, urls: Vec<String> },
    UnmapRoutes { name: String, urls: Vec<String> },
    SetMarker { name: String, marker: ReleaseMarker },
    ClearMarker { name: String },
    SetAutoscaler { name: String, enabled: bool },
}

/// Call kinds that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Login,
    List,
    Push,
    Scale,
    Delete,
    MapRoutes,
    UnmapRoutes,
    SetMarker,
    ClearMarker,
    SetAutoscaler,
}

#[derive(Debug, Clone)]
struct StoredRelease {
    summary: ReleaseSummary,
    autoscaler: Option<bool>,
}

#[derive(Debug, Default)]
struct State {
    releases: Vec<StoredRelease>,
    calls: Vec<PlatformCall>,
    failures: HashSet<(CallKind, String)>,
    push_urls: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryPlatform {
    state: Mutex<State>,
}

/// A release summary with a GUID derived from its name
pub fn release(name: &str, instances: u32, urls: &[&str]) -> ReleaseSummary {
    ReleaseSummary {
        id: format!("guid-{}", name),
        name: name.to_string(),
        revision: parse_revision(name).unwrap_or(0),
        total_instances: instances,
        running_instances: instances,
        urls: urls.iter().map(|u| u.to_string()).collect(),
        marker: None,
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_release(self, summary: ReleaseSummary) -> Self {
        self.lock().releases.push(StoredRelease {
            summary,
            autoscaler: None,
        });
        self
    }

    /// Attach an autoscaling policy to an existing release
    pub fn with_autoscaler(self, name: &str, enabled: bool) -> Self {
        if let Some(r) = self.lock().releases.iter_mut().find(|r| r.summary.name == name) {
            r.autoscaler = Some(enabled);
        }
        self
    }

    /// Routes given to every pushed release
    pub fn with_push_urls(self, urls: &[&str]) -> Self {
        self.lock().push_urls = urls.iter().map(|u| u.to_string()).collect();
        self
    }

    /// Make calls of `kind` against `name` fail. Use `""` for calls without a name.
    pub fn fail(&self, kind: CallKind, name: &str) {
        self.lock().failures.insert((kind, name.to_string()));
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.lock().calls.clone()
    }

    pub fn release(&self, name: &str) -> Option<ReleaseSummary> {
        self.lock()
            .releases
            .iter()
            .find(|r| r.summary.name == name)
            .map(|r| r.summary.clone())
    }

    pub fn autoscaler(&self, name: &str) -> Option<bool> {
        self.lock()
            .releases
            .iter()
            .find(|r| r.summary.name == name)
            .and_then(|r| r.autoscaler)
    }

    pub fn release_names(&self) -> Vec<String> {
        self.lock()
            .releases
            .iter()
            .map(|r| r.summary.name.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(state: &State, kind: CallKind, name: &str) -> Result<(), DeployError> {
        if state.failures.contains(&(kind, name.to_string())) {
            return Err(DeployError::ToolProcess {
                command: format!("{:?} {}", kind, name),
                output: "FAILED injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn find<'a>(state: &'a mut State, name: &str) -> Result<&'a mut StoredRelease, DeployError> {
        state
            .releases
            .iter_mut()
            .find(|r| r.summary.name == name)
            .ok_or_else(|| DeployError::Platform(format!("Application {} not found", name)))
    }
}

#[async_trait]
impl PlatformClient for MemoryPlatform {
    async fn login(&self, _ctx: &PlatformContext, _log: &LogContext) -> Result<(), DeployError> {
        let mut state = self.lock();
        Self::check(&state, CallKind::Login, "")?;
        state.calls.push(PlatformCall::Login);
        Ok(())
    }

    async fn list_releases(
        &self,
        _ctx: &PlatformContext,
        _log: &LogContext,
        prefix: &str,
        include_markers: bool,
    ) -> Result<Vec<ReleaseSummary>, DeployError> {
        let state = self.lock();
        Self::check(&state, CallKind::List, "")?;
        let mut releases: Vec<ReleaseSummary> = state
            .releases
            .iter()
            .filter(|r| matches_prefix(&r.summary.name, prefix))
            .map(|r| {
                let mut summary = r.summary.clone();
                if !include_markers {
                    summary.marker = None;
                }
                summary
            })
            .collect();
        releases.sort_by_key(|r| r.revision);
        Ok(releases)
    }

    async fn get_release(
        &self,
        _ctx: &PlatformContext,
        _log: &LogContext,
        name: &str,
    ) -> Result<ReleaseSummary, DeployError> {
        let mut state = self.lock();
        Ok(Self::find(&mut state, name)?.summary.clone())
    }

    async fn push_release(
        &self,
        _ctx: &PlatformContext,
        _log: &LogContext,
        spec: &PushSpec,
    ) -> Result<ReleaseSummary, DeployError> {
        let mut state = self.lock();
        Self::check(&state, CallKind::Push, &spec.name)?;
        let urls: Vec<&str> = state.push_urls.iter().map(String::as_str).collect();
        let summary = release(&spec.name, 0, &urls);
        state.releases.push(StoredRelease {
            summary: summary.clone(),
            autoscaler: None,
        });
        state.calls.push(PlatformCall::Push {
            name: spec.name.clone(),
        });
        Ok(summary)
    }

    async fn scale_release(
        &self,
        _ctx: &PlatformContext,
        _log: &LogContext,
        name: &str,
        instances: u32,
    ) -> Result<ReleaseSummary, DeployError> {
        let mut state = self.lock();
        Self::check(&state, CallKind::Scale, name)?;
        let stored = Self::find(&mut state, name)?;
        stored.summary.total_instances = instances;
        stored.summary.running_instances = instances;
        let summary = stored.summary.clone();
        state.calls.push(PlatformCall::Scale {
            name: name.to_string(),
            instances,
        });
        Ok(summary)
    }

    async fn delete_release(
        &self,
        _ctx: &PlatformContext,
        _log: &LogContext,
        name: &str,
    ) -> Result<(), DeployError> {
        let mut state = self.lock();
        Self::check(&state, CallKind::Delete, name)?;
        Self::find(&mut state, name)?;
        state.releases.retain(|r| r.summary.name != name);
        state.calls.push(PlatformCall::Delete {
            name: name.to_string(),
        });
        Ok(())
    }

    async fn map_routes(
        &self,
        _ctx: &PlatformContext,
        _log: &LogContext,
        name: &str,
        urls: &[String],
    ) -> Result<(), DeployError> {
        let mut state = self.lock();
        Self::check(&state, CallKind::MapRoutes, name)?;
        Self::find(&mut state, name)?
            .summary
            .urls
            .extend(urls.iter().cloned());
        state.calls.push(PlatformCall::MapRoutes {
            name: name.to_string(),
            urls: urls.to_vec(),
        });
        Ok(())
    }

    async fn unmap_routes(
        &self,
        _ctx: &PlatformContext,
        _log: &LogContext,
        name: &str,
        urls: &[String],
    ) -> Result<(), DeployError> {
        let mut state = self.lock();
        Self::check(&state, CallKind::UnmapRoutes, name)?;
        let stored = Self::find(&mut state, name)?;
        for url in urls {
            stored.summary.urls.remove(url);
        }
        state.calls.push(PlatformCall::UnmapRoutes {
            name: name.to_string(),
            urls: urls.to_vec(),
        });
        Ok(())
    }

    async fn set_marker(
        &self,
        _ctx: &PlatformContext,
        _log: &LogContext,
        name: &str,
        marker: ReleaseMarker,
    ) -> Result<(), DeployError> {
        let mut state = self.lock();
        Self::check(&state, CallKind::SetMarker, name)?;
        Self::find(&mut state, name)?.summary.marker = Some(marker);
        state.calls.push(PlatformCall::SetMarker {
            name: name.to_string(),
            marker,
        });
        Ok(())
    }

    async fn clear_marker(
        &self,
        _ctx: &PlatformContext,
        _log: &LogContext,
        name: &str,
    ) -> Result<(), DeployError> {
        let mut state = self.lock();
        Self::check(&state, CallKind::ClearMarker, name)?;
        Self::find(&mut state, name)?.summary.marker = None;
        state.calls.push(PlatformCall::ClearMarker {
            name: name.to_string(),
        });
        Ok(())
    }

    async fn autoscaler_state(
        &self,
        _ctx: &PlatformContext,
        _log: &LogContext,
        name: &str,
    ) -> Result<Option<bool>, DeployError> {
        let mut state = self.lock();
        Ok(Self::find(&mut state, name)?.autoscaler)
    }

    async fn set_autoscaler(
        &self,
        _ctx: &PlatformContext,
        _log: &LogContext,
        name: &str,
        enabled: bool,
    ) -> Result<(), DeployError> {
        let mut state = self.lock();
        Self::check(&state, CallKind::SetAutoscaler, name)?;
        Self::find(&mut state, name)?.autoscaler = Some(enabled);
        state.calls.push(PlatformCall::SetAutoscaler {
            name: name.to_string(),
            enabled,
        });
        Ok(())
    }
}
