use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single fix request: the package and the minimum version that carries
/// the fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePackage {
    pub name: String,
    #[serde(rename = "fixedVersion", alias = "fixed_version")]
    pub fixed_version: String,
}

impl UpdatePackage {
    pub fn new(name: impl Into<String>, fixed_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fixed_version: fixed_version.into(),
        }
    }
}

/// All fix requests for one image. Names may repeat.
pub type UpdatePackages = Vec<UpdatePackage>;

/// Target version for one package plus the staged artifact that satisfies it.
///
/// An empty `filename` means no validated artifact was found yet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateInfo {
    pub version: String,
    pub filename: String,
}

impl UpdateInfo {
    pub fn has_artifact(&self) -> bool {
        !self.filename.is_empty()
    }
}

/// Package name → validated target.
pub type UpdateMap = HashMap<String, UpdateInfo>;

/// Ecosystem-specific version predicates.
///
/// `less_than` must be a strict weak ordering over versions accepted by
/// `is_valid`. Equal versions never replace one another, so the first-seen
/// candidate wins ties.
#[derive(Clone, Copy)]
pub struct VersionComparer {
    pub is_valid: fn(&str) -> bool,
    pub less_than: fn(&str, &str) -> bool,
}

impl VersionComparer {
    pub const fn new(is_valid: fn(&str) -> bool, less_than: fn(&str, &str) -> bool) -> Self {
        Self { is_valid, less_than }
    }

    pub fn is_valid(&self, version: &str) -> bool {
        (self.is_valid)(version)
    }

    pub fn less_than(&self, a: &str, b: &str) -> bool {
        (self.less_than)(a, b)
    }
}

impl fmt::Debug for VersionComparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionComparer").finish_non_exhaustive()
    }
}

/// Artifact format handled by a package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageType {
    Deb,
    Apk,
    Rpm,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Deb => "deb",
            PackageType::Apk => "apk",
            PackageType::Rpm => "rpm",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
