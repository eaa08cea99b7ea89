//! Collaborators consumed by the orchestrators

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::SecretString;
use task_api::{ArtifactReference, PlatformConfig};

use crate::errors::DeployError;
use crate::logs::LogContext;

/// Platform login details with the secret decrypted
#[derive(Debug)]
pub struct PlatformCredentials {
    pub endpoint: String,
    pub organization: String,
    pub space: String,
    pub username: String,
    pub password: SecretString,
    pub skip_ssl_validation: bool,
}

/// Turns a platform config with encrypted field references into credentials.
/// Called once per orchestration, before any command is built.
#[async_trait]
pub trait CredentialDecryptor: Send + Sync {
    async fn decrypt(&self, config: &PlatformConfig) -> Result<PlatformCredentials, DeployError>;
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves each encrypted field reference as the name of an environment variable
pub struct EnvSecretResolver {
    lookup: Lookup,
}

impl EnvSecretResolver {
    pub fn new() -> Self {
        Self {
            lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Resolve references through `lookup` instead of the process environment
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }
}

impl Default for EnvSecretResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialDecryptor for EnvSecretResolver {
    async fn decrypt(&self, config: &PlatformConfig) -> Result<PlatformCredentials, DeployError> {
        let mut username = config.username.clone();
        let mut password = None;

        for field in &config.encrypted_fields {
            let value = (self.lookup)(&field.reference).ok_or_else(|| {
                DeployError::config(format!(
                    "Secret reference {} for field {} is not set",
                    field.reference, field.field_name
                ))
            })?;
            match field.field_name.as_str() {
                "password" => password = Some(SecretString::from(value)),
                "username" => username = value,
                other => {
                    return Err(DeployError::config(format!(
                        "Unsupported encrypted field: {}",
                        other
                    )))
                }
            }
        }

        let password =
            password.ok_or_else(|| {
                DeployError::config("Platform config has no encrypted password")
            })?;

        Ok(PlatformCredentials {
            endpoint: config.endpoint.clone(),
            organization: config.organization.clone(),
            space: config.space.clone(),
            username,
            password,
            skip_ssl_validation: config.skip_ssl_validation,
        })
    }
}

/// Makes a build artifact available as a local path
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(
        &self,
        artifact: &ArtifactReference,
        workdir: &Path,
        log: &LogContext,
    ) -> Result<PathBuf, DeployError>;
}

/// Copies a file artifact from the local filesystem into the working directory.
/// Directories are pushed in place.
#[derive(Debug, Default)]
pub struct LocalArtifactFetcher;

#[async_trait]
impl ArtifactFetcher for LocalArtifactFetcher {
    async fn fetch(
        &self,
        artifact: &ArtifactReference,
        workdir: &Path,
        log: &LogContext,
    ) -> Result<PathBuf, DeployError> {
        let location = match artifact {
            ArtifactReference::File { location } => PathBuf::from(location),
            ArtifactReference::ContainerImage { image } => {
                return Err(DeployError::config(format!(
                    "Container image {} has no local artifact",
                    image
                )))
            }
        };

        let metadata = tokio::fs::metadata(&location).await.map_err(|e| {
            DeployError::config(format!("Artifact {} is not readable: {}", location.display(), e))
        })?;
        if metadata.is_dir() {
            log.info(format!("Using artifact directory {}", location.display()));
            return Ok(location);
        }

        let file_name = location
            .file_name()
            .ok_or_else(|| {
                DeployError::config(format!(
                    "Artifact {} has no file name",
                    location.display()
                ))
            })?;
        let target_dir = workdir.join("artifact");
        tokio::fs::create_dir_all(&target_dir).await?;
        let target = target_dir.join(file_name);
        let bytes = tokio::fs::copy(&location, &target).await?;
        log.info(format!("Fetched artifact {} ({} bytes)", location.display(), bytes));
        Ok(target)
    }
}
