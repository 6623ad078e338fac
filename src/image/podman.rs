use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::models::{Annotations, Descriptor, Digest, MediaType, platform};
use super::{LocalImageClient, ResolveError, Runtime};

/// Local lookups by shelling out to `podman image inspect`.
#[derive(Debug, Clone)]
pub struct PodmanCli {
    program: String,
}

impl Default for PodmanCli {
    fn default() -> Self {
        Self {
            program: "podman".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PodmanImage {
    #[serde(default)]
    digest: String,
    #[serde(default)]
    manifest_type: String,
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    os: String,
    #[serde(default)]
    annotations: Option<Annotations>,
}

fn local_error(reference: &str, reason: impl ToString) -> ResolveError {
    ResolveError::Local {
        backend: Runtime::Podman,
        reference: reference.to_string(),
        reason: reason.to_string(),
    }
}

impl PodmanCli {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl LocalImageClient for PodmanCli {
    async fn inspect(&self, image_ref: &str) -> Result<Descriptor, ResolveError> {
        let output = Command::new(&self.program)
            .args(["image", "inspect", image_ref])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ResolveError::ToolNotFound("podman"),
                _ => local_error(image_ref, format!("failed to run {}: {e}", self.program())),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(local_error(image_ref, stderr.trim()));
        }

        descriptor_from_inspect(image_ref, &output.stdout)
    }
}

/// `podman image inspect` has no manifest size, so `size` stays 0.
fn descriptor_from_inspect(image_ref: &str, stdout: &[u8]) -> Result<Descriptor, ResolveError> {
    let images: Vec<PodmanImage> = serde_json::from_slice(stdout)
        .map_err(|e| local_error(image_ref, format!("malformed inspect output: {e}")))?;
    let image = images
        .into_iter()
        .next()
        .ok_or_else(|| local_error(image_ref, "inspect returned no images"))?;

    if image.manifest_type.is_empty() {
        return Err(local_error(image_ref, "image has no manifest type"));
    }

    let digest: Digest = image
        .digest
        .parse()
        .map_err(|e| local_error(image_ref, format!("bad image digest {:?}: {e}", image.digest)))?;

    let mut descriptor = Descriptor::new(MediaType::from(image.manifest_type.as_str()), 0, digest);
    let target = (!image.os.is_empty() && !image.architecture.is_empty())
        .then(|| platform(&image.os, &image.architecture));
    descriptor
        .set_platform(target)
        .set_annotations(image.annotations.filter(|a| !a.is_empty()));
    Ok(descriptor)
}
