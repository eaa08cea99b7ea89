//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::{Tool, ToolVersion};
use crate::errors::DeployError;
use crate::filesys::File;
use crate::logs::{LogLevel, LogOptions};
use crate::process::{PoolBounds, RetryPolicy};
use crate::utils::CooldownOptions;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Write daily-rolling log files to the storage layout's log directory
    #[serde(default)]
    pub file_logs: bool,

    /// Timeout for commands whose request carries none
    #[serde(default = "default_command_timeout")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Backoff between retried launches
    #[serde(default)]
    pub retry_cooldown: CooldownOptions,

    /// Pool for repository updates
    #[serde(default)]
    pub shared_pool: PoolBounds,

    /// Pool for chart downloads
    #[serde(default)]
    pub fetch_pool: PoolBounds,

    /// Idle time after which an override file is evicted
    #[serde(default = "default_override_ttl")]
    pub override_ttl_secs: u64,

    /// CF CLI major version used when a request names none ("6" or "7")
    #[serde(default)]
    pub cf_version: Option<String>,

    /// Helm major version ("2" or "3")
    #[serde(default)]
    pub helm_version: Option<String>,
}

fn default_command_timeout() -> u64 {
    600
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_override_ttl() -> u64 {
    1800
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            file_logs: false,
            default_timeout_secs: default_command_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_cooldown: CooldownOptions::default(),
            shared_pool: PoolBounds::default(),
            fetch_pool: PoolBounds::default(),
            override_ttl_secs: default_override_ttl(),
            cf_version: None,
            helm_version: None,
        }
    }
}

impl Settings {
    /// Read `file`, falling back to defaults when it does not exist
    pub async fn load(file: &File) -> Result<Self, DeployError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        let settings: Settings = file.read_json().await?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), DeployError> {
        self.shared_pool.validate()?;
        self.fetch_pool.validate()?;
        if self.retry_attempts == 0 {
            return Err(DeployError::config("retry_attempts must be at least 1"));
        }
        ToolVersion::from_tag(Tool::Cf, self.cf_version.as_deref())?;
        self.helm_tool_version()?;
        Ok(())
    }

    /// Helm major version; the oldest supported one when unset
    pub fn helm_tool_version(&self) -> Result<ToolVersion, DeployError> {
        ToolVersion::from_tag(Tool::Helm, self.helm_version.as_deref())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            cooldown: self.retry_cooldown.clone(),
        }
    }

    pub fn override_ttl(&self) -> Duration {
        Duration::from_secs(self.override_ttl_secs)
    }

    pub fn log_options(&self, log_dir: Option<std::path::PathBuf>) -> LogOptions {
        LogOptions {
            log_level: self.log_level,
            stdout: true,
            log_dir: log_dir.filter(|_| self.file_logs),
            json_format: self.json_logs,
        }
    }
}
