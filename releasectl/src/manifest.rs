//! Manifest and variables files for a new release

use std::path::{Path, PathBuf};

use task_api::{ArtifactReference, DeploymentRequest};

use crate::command::placeholders;
use crate::errors::DeployError;
use crate::workdir::ScopedWorkDir;

/// Files handed to `cf push`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFiles {
    pub manifest: PathBuf,
    pub vars_files: Vec<PathBuf>,
}

/// Fill the manifest template for `release_name`. New releases always
/// start with zero instances.
pub fn render_manifest(
    template: &str,
    release_name: &str,
    artifact: &ArtifactReference,
    artifact_path: Option<&Path>,
) -> String {
    let mut manifest = template
        .replace(placeholders::APP_NAME, release_name)
        .replace(placeholders::INSTANCE_COUNT, "0");
    match artifact {
        ArtifactReference::ContainerImage { image } => {
            manifest = manifest.replace(placeholders::DOCKER_IMAGE, image);
        }
        ArtifactReference::File { .. } => {
            if let Some(path) = artifact_path {
                manifest = manifest.replace(placeholders::APP_PATH, &path.to_string_lossy());
            }
        }
    }
    manifest
}

/// Write the manifest and one variables file per non-blank override
pub async fn write_manifest_files(
    workdir: &ScopedWorkDir,
    request: &DeploymentRequest,
    release_name: &str,
    artifact_path: Option<&Path>,
) -> Result<ManifestFiles, DeployError> {
    let manifest = workdir.file("manifest.yml");
    manifest
        .write_string(&render_manifest(
            &request.manifest_template,
            release_name,
            &request.artifact,
            artifact_path,
        ))
        .await?;

    let mut vars_files = Vec::new();
    for (index, content) in request
        .variable_overrides
        .iter()
        .filter(|c| !c.trim().is_empty())
        .enumerate()
    {
        let file = workdir.file(&format!("vars-{}.yml", index));
        file.write_string(content).await?;
        vars_files.push(file.path().to_path_buf());
    }

    Ok(ManifestFiles {
        manifest: manifest.path().to_path_buf(),
        vars_files,
    })
}
