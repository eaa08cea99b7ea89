//! Extra command flags supplied by users or policy

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::command::template::{Operation, ToolVersion};

/// CLI sub-command a structured flag entry targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubCommand {
    Install,
    Upgrade,
    Rollback,
    History,
    List,
    Delete,
    Uninstall,
    RepoAdd,
    RepoUpdate,
    Fetch,
    Pull,
    Version,
    Api,
    Push,
    Scale,
}

impl SubCommand {
    /// The sub-command an operation runs under a given major version.
    /// Renamed commands (delete → uninstall, fetch → pull) follow the version.
    pub fn for_operation(operation: Operation, version: ToolVersion) -> Option<Self> {
        let v3 = version == ToolVersion::HelmV3;
        match operation {
            Operation::HelmInstall => Some(SubCommand::Install),
            Operation::HelmUpgrade => Some(SubCommand::Upgrade),
            Operation::HelmRollback => Some(SubCommand::Rollback),
            Operation::HelmReleaseHistory => Some(SubCommand::History),
            Operation::HelmListReleases => Some(SubCommand::List),
            Operation::HelmDelete if v3 => Some(SubCommand::Uninstall),
            Operation::HelmDelete => Some(SubCommand::Delete),
            Operation::HelmRepoAdd => Some(SubCommand::RepoAdd),
            Operation::HelmRepoUpdate => Some(SubCommand::RepoUpdate),
            Operation::HelmFetch if v3 => Some(SubCommand::Pull),
            Operation::HelmFetch => Some(SubCommand::Fetch),
            Operation::HelmVersion => Some(SubCommand::Version),
            Operation::CfApi => Some(SubCommand::Api),
            Operation::CfPush => Some(SubCommand::Push),
            Operation::CfScale => Some(SubCommand::Scale),
            _ => None,
        }
    }
}

/// Flags injected into the `${COMMAND_FLAGS}` placeholder.
///
/// A raw string applies verbatim to every command. A per-sub-command map
/// applies only to the matching command, and takes precedence over the raw
/// string when both are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFlags {
    #[serde(default)]
    pub raw: Option<String>,

    #[serde(default)]
    pub by_subcommand: HashMap<SubCommand, String>,
}

impl CommandFlags {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn raw(flags: impl Into<String>) -> Self {
        Self {
            raw: Some(flags.into()),
            by_subcommand: HashMap::new(),
        }
    }

    pub fn structured(by_subcommand: HashMap<SubCommand, String>) -> Self {
        Self {
            raw: None,
            by_subcommand,
        }
    }

    /// Flags for `operation`, empty when nothing applies
    pub fn for_operation(&self, operation: Operation, version: ToolVersion) -> String {
        if !self.by_subcommand.is_empty() {
            return SubCommand::for_operation(operation, version)
                .and_then(|sub| self.by_subcommand.get(&sub))
                .cloned()
                .unwrap_or_default();
        }
        self.raw.clone().unwrap_or_default()
    }
}
