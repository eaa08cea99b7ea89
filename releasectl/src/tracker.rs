//! Release version tracking
//!
//! Pure functions over a release list ordered oldest to newest, as returned by
//! [`crate::platform::PlatformClient::list_releases`].

use task_api::{InstanceDelta, ReleaseMarker, ReleaseSummary};

use crate::errors::DeployError;

/// Revision encoded in a `<prefix>-<revision>` release name
pub fn parse_revision(name: &str) -> Option<u32> {
    name.rsplit_once('-')
        .and_then(|(_, suffix)| suffix.parse().ok())
}

/// Name of the release created for `revision`
pub fn release_name(prefix: &str, revision: u32) -> String {
    format!("{}-{}", prefix, revision)
}

/// Revision for the next release: highest existing suffix plus one, or 0.
/// Fails when the highest suffix is already the largest revision.
pub fn next_revision(releases: &[ReleaseSummary]) -> Result<u32, DeployError> {
    let Some(last) = releases.last() else {
        return Ok(0);
    };
    parse_revision(&last.name)
        .unwrap_or(last.revision)
        .checked_add(1)
        .ok_or_else(|| {
            DeployError::Platform(format!(
                "Release {} has the largest revision, no next revision exists",
                last.name
            ))
        })
}

/// The release currently serving traffic.
///
/// Blue-green lookups prefer an explicit `ACTIVE` marker. Otherwise the most
/// recent release with instances wins, then the most recent release at all.
pub fn find_active(releases: &[ReleaseSummary], is_blue_green: bool) -> Option<&ReleaseSummary> {
    if is_blue_green {
        if let Some(marked) = releases
            .iter()
            .rev()
            .find(|r| r.marker == Some(ReleaseMarker::Active))
        {
            return Some(marked);
        }
    }

    releases
        .iter()
        .rev()
        .find(|r| r.total_instances > 0)
        .or_else(|| releases.last())
}

/// The newest release other than `active` that still has instances.
///
/// When no such release exists and there are at least two releases, the
/// second most recent release is returned instead. This fallback is a
/// best-effort heuristic: the platform gives no guarantee that the release it
/// names is a usable rollback target.
pub fn find_most_recent_inactive<'a>(
    releases: &'a [ReleaseSummary],
    active: Option<&ReleaseSummary>,
) -> Option<&'a ReleaseSummary> {
    let is_active = |r: &ReleaseSummary| active.is_some_and(|a| a.id == r.id);

    releases
        .iter()
        .rev()
        .filter(|r| !is_active(r))
        .find(|r| r.total_instances > 0)
        .or_else(|| {
            if releases.len() >= 2 {
                releases.get(releases.len() - 2)
            } else {
                None
            }
        })
}

/// Releases to downsize and delete before a new release is created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    pub downsize: Vec<ReleaseSummary>,
    pub delete: Vec<ReleaseSummary>,
}

impl PrunePlan {
    pub fn is_empty(&self) -> bool {
        self.downsize.is_empty() && self.delete.is_empty()
    }
}

/// Keep the `keep` most recent releases, counting the active one.
///
/// Walking newest to oldest and skipping `active`, the first `keep - 1`
/// releases are downsized and the rest deleted.
pub fn plan_prune(
    releases: &[ReleaseSummary],
    active: Option<&ReleaseSummary>,
    keep: u32,
) -> PrunePlan {
    let window = keep.saturating_sub(1) as usize;
    let mut plan = PrunePlan::default();

    for release in releases
        .iter()
        .rev()
        .filter(|r| active.map_or(true, |a| a.id != r.id))
    {
        if plan.downsize.len() < window {
            plan.downsize.push(release.clone());
        } else {
            plan.delete.push(release.clone());
        }
    }
    plan
}

/// Sum of requested instances across `releases`
pub fn total_instances(releases: &[ReleaseSummary]) -> u32 {
    releases.iter().map(|r| r.total_instances).sum()
}

/// Rollback deltas split by direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackPlan {
    pub upsize: Vec<InstanceDelta>,
    pub downsize: Vec<InstanceDelta>,
    pub unchanged: Vec<InstanceDelta>,
}

pub fn partition_deltas(deltas: &[InstanceDelta]) -> RollbackPlan {
    let mut plan = RollbackPlan::default();
    for delta in deltas {
        match delta.desired_count.cmp(&delta.previous_count) {
            std::cmp::Ordering::Greater => plan.upsize.push(delta.clone()),
            std::cmp::Ordering::Less => plan.downsize.push(delta.clone()),
            std::cmp::Ordering::Equal => plan.unchanged.push(delta.clone()),
        }
    }
    plan
}
