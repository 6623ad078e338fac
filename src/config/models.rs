use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::image::{Platform, Runtime};
use crate::pkgmgr::UpdatePackage;

/// Settings shared with the build step. Passed through the package manager
/// factory untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub(crate) image: String,
    #[serde(default)]
    pub(crate) platform: Option<Platform>,
    #[serde(default, rename = "buildkitAddr", alias = "buildkit_addr")]
    pub(crate) buildkit_addr: Option<String>,
    #[serde(default)]
    pub(crate) runtime: Runtime,
}

impl BuildConfig {
    pub fn new(image: impl Into<String>, runtime: Runtime) -> Self {
        Self {
            image: image.into(),
            runtime,
            ..Self::default()
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn platform(&self) -> Option<&Platform> {
        self.platform.as_ref()
    }

    pub fn buildkit_addr(&self) -> Option<&str> {
        self.buildkit_addr.as_deref()
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime
    }
}

/// One patch job: which image, which OS family, where to stage, what to fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    pub(crate) build: BuildConfig,
    #[serde(rename = "osType", alias = "os_type")]
    pub(crate) os_type: String,
    #[serde(default, rename = "osVersion", alias = "os_version")]
    pub(crate) os_version: String,
    #[serde(rename = "workingFolder", alias = "working_folder")]
    pub(crate) working_folder: PathBuf,
    #[serde(default, rename = "ignoreErrors", alias = "ignore_errors")]
    pub(crate) ignore_errors: bool,
    #[serde(default)]
    pub(crate) updates: Vec<UpdatePackage>,
}

impl PatchConfig {
    pub fn build(&self) -> &BuildConfig {
        &self.build
    }

    pub fn os_type(&self) -> &str {
        &self.os_type
    }

    pub fn os_version(&self) -> &str {
        &self.os_version
    }

    pub fn working_folder(&self) -> &std::path::Path {
        &self.working_folder
    }

    pub fn ignore_errors(&self) -> bool {
        self.ignore_errors
    }

    pub fn updates(&self) -> &[UpdatePackage] {
        &self.updates
    }
}
