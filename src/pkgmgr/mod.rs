//! Package-manager dispatch plus the two ecosystem-agnostic algorithms that
//! turn fix requests into a trusted patch plan.

pub mod apk;
pub mod dpkg;
mod models;
pub mod rpm;

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub use models::{PackageType, UpdateInfo, UpdateMap, UpdatePackage, UpdatePackages, VersionComparer};

use crate::config::BuildConfig;
use crate::helpers::{HelperError, ensure_path, is_non_empty_file};

/// Mode used for per-job staging directories.
pub const STAGING_DIR_MODE: u32 = 0o744;

#[derive(thiserror::Error, Debug)]
pub enum PkgMgrError {
    #[error("no patchable vulnerabilities found")]
    NoPatchableVulnerabilities,
    #[error("invalid version {version} found for package {name}")]
    InvalidVersion { name: String, version: String },
    #[error("downloaded package {name} version {found} lower than required {required}")]
    VersionBelowRequired {
        name: String,
        found: String,
        required: String,
    },
    #[error("unsupported OS type: {0}")]
    UnsupportedOsType(String),
    #[error("failed to read package info from {filename}: {reason}")]
    PackageInfo { filename: String, reason: String },
    #[error("failed to read staging directory {}: {source}", path.display())]
    StagingDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare staging directory: {0}")]
    Staging(#[from] HelperError),
}

/// Extracts package identity from a downloaded artifact's file name.
pub trait PackageInfoReader {
    fn get_name(&self, filename: &str) -> Result<String, PkgMgrError>;
    fn get_version(&self, filename: &str) -> Result<String, PkgMgrError>;
}

/// Ecosystem-bound manager for one patch job.
pub trait PackageManager: fmt::Debug + Send + Sync {
    fn package_type(&self) -> PackageType;
    fn os_type(&self) -> &str;
    fn os_version(&self) -> &str;
    fn config(&self) -> &BuildConfig;
    fn working_folder(&self) -> &Path;
    fn comparer(&self) -> VersionComparer;
    fn reader(&self) -> &dyn PackageInfoReader;

    /// Where fetched artifacts are dropped before validation.
    fn staging_dir(&self) -> PathBuf {
        self.working_folder().join(format!("{}-staging", self.package_type()))
    }

    /// Create the staging directory if needed. Returns whether it was created.
    fn prepare_staging(&self) -> Result<bool, PkgMgrError> {
        Ok(ensure_path(&self.staging_dir(), STAGING_DIR_MODE)?)
    }

    /// Deduplicate fix requests with this ecosystem's version ordering.
    fn plan_updates(&self, updates: &[UpdatePackage], ignore_errors: bool) -> Result<UpdatePackages, PkgMgrError> {
        get_unique_latest_updates(updates, self.comparer(), ignore_errors)
    }

    /// Reconcile the staging directory against deduplicated requests.
    fn validate_staged(&self, updates: &[UpdatePackage]) -> Result<Option<UpdateMap>, PkgMgrError> {
        get_validated_updates_map(updates, self.comparer(), self.reader(), &self.staging_dir())
    }
}

/// Normalised OS type → artifact format. Extend here, not at call sites.
const OS_FAMILIES: &[(&str, PackageType)] = &[
    ("alpine", PackageType::Apk),
    ("debian", PackageType::Deb),
    ("ubuntu", PackageType::Deb),
    ("cbl-mariner", PackageType::Rpm),
    ("azurelinux", PackageType::Rpm),
    ("redhat", PackageType::Rpm),
    ("centos", PackageType::Rpm),
    ("rocky", PackageType::Rpm),
    ("almalinux", PackageType::Rpm),
    ("alma", PackageType::Rpm),
    ("oracle", PackageType::Rpm),
    ("amazon", PackageType::Rpm),
];

fn package_type_for(os_type: &str) -> Option<PackageType> {
    let normalized = os_type.trim().to_ascii_lowercase();
    OS_FAMILIES
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, kind)| *kind)
}

/// Pick the manager for `os_type`. Pure routing; no I/O.
pub fn get_package_manager(
    os_type: &str,
    os_version: &str,
    config: &BuildConfig,
    working_folder: impl AsRef<Path>,
) -> Result<Box<dyn PackageManager>, PkgMgrError> {
    let kind = package_type_for(os_type).ok_or_else(|| PkgMgrError::UnsupportedOsType(os_type.to_string()))?;
    let os_type = os_type.trim().to_ascii_lowercase();
    let working_folder = working_folder.as_ref().to_path_buf();
    let config = config.clone();

    let manager: Box<dyn PackageManager> = match kind {
        PackageType::Apk => Box::new(apk::ApkManager::new(os_type, os_version, config, working_folder)),
        PackageType::Deb => Box::new(dpkg::DpkgManager::new(os_type, os_version, config, working_folder)),
        PackageType::Rpm => Box::new(rpm::RpmManager::new(os_type, os_version, config, working_folder)),
    };
    debug!(os_type = manager.os_type(), package_type = %kind, "selected package manager");
    Ok(manager)
}

/// Collapse fix requests into one highest-valid target per package, sorted by
/// name.
///
/// Empty input is an error. Input that is filtered down to nothing because
/// every version was invalid (with `ignore_errors`) is an empty, successful
/// result.
pub fn get_unique_latest_updates(
    updates: &[UpdatePackage],
    cmp: VersionComparer,
    ignore_errors: bool,
) -> Result<UpdatePackages, PkgMgrError> {
    if updates.is_empty() {
        return Err(PkgMgrError::NoPatchableVulnerabilities);
    }

    let mut latest: BTreeMap<&str, &str> = BTreeMap::new();
    for update in updates {
        if !cmp.is_valid(&update.fixed_version) {
            if ignore_errors {
                debug!(package = %update.name, version = %update.fixed_version, "dropping invalid fix version");
                continue;
            }
            return Err(PkgMgrError::InvalidVersion {
                name: update.name.clone(),
                version: update.fixed_version.clone(),
            });
        }

        match latest.entry(update.name.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(update.fixed_version.as_str());
            }
            Entry::Occupied(mut slot) => {
                if cmp.less_than(slot.get(), &update.fixed_version) {
                    slot.insert(update.fixed_version.as_str());
                }
            }
        }
    }

    Ok(latest
        .into_iter()
        .map(|(name, version)| UpdatePackage::new(name, version))
        .collect())
}

/// Check the artifacts in `staging_dir` against the requested updates.
///
/// `Ok(None)` means the directory held no entries at all. Otherwise every
/// requested package has an entry; those without a satisfying artifact keep
/// an empty filename.
pub fn get_validated_updates_map(
    updates: &[UpdatePackage],
    cmp: VersionComparer,
    reader: &dyn PackageInfoReader,
    staging_dir: &Path,
) -> Result<Option<UpdateMap>, PkgMgrError> {
    let entries = list_staging_dir(staging_dir)?;
    if entries.is_empty() {
        debug!(dir = %staging_dir.display(), "staging directory is empty");
        return Ok(None);
    }

    let mut map: UpdateMap = updates
        .iter()
        .map(|u| {
            (
                u.name.clone(),
                UpdateInfo {
                    version: u.fixed_version.clone(),
                    filename: String::new(),
                },
            )
        })
        .collect();

    for (filename, is_file) in entries {
        if !is_file {
            debug!(entry = %filename, "skipping non-file staging entry");
            continue;
        }
        if !is_non_empty_file(staging_dir, &filename) {
            warn!(file = %filename, "staged artifact is empty");
        }

        let name = reader.get_name(&filename)?;
        let version = reader.get_version(&filename)?;
        if !cmp.is_valid(&version) {
            return Err(PkgMgrError::InvalidVersion { name, version });
        }

        let Some(info) = map.get_mut(&name) else {
            warn!(package = %name, file = %filename, "downloaded package not in requested updates, skipping");
            continue;
        };

        if cmp.less_than(&version, &info.version) {
            return Err(PkgMgrError::VersionBelowRequired {
                name,
                found: version,
                required: info.version.clone(),
            });
        }
        debug!(package = %name, version = %version, file = %filename, "validated staged artifact");
        info.filename = filename;
    }

    Ok(Some(map))
}

/// File names in the directory, sorted, each paired with whether it is a
/// regular file.
fn list_staging_dir(dir: &Path) -> Result<Vec<(String, bool)>, PkgMgrError> {
    let wrap = |source: io::Error| PkgMgrError::StagingDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(wrap)? {
        let entry = entry.map_err(wrap)?;
        let is_file = entry.file_type().map_err(wrap)?.is_file();
        entries.push((entry.file_name().to_string_lossy().into_owned(), is_file));
    }
    entries.sort();
    Ok(entries)
}
