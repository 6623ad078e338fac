use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::{
    PackageInfoReader, PackageManager, PackageType, PkgMgrError, UpdateMap, UpdatePackage, UpdatePackages,
    VersionComparer, get_validated_updates_map,
};
use crate::config::BuildConfig;

/// RPM-family version ordering (`[epoch:]version[-release]`).
pub const COMPARER: VersionComparer = VersionComparer::new(is_valid, less_than);

fn filename_regex() -> &'static Regex {
    static FILE_RE: OnceLock<Regex> = OnceLock::new();
    FILE_RE.get_or_init(|| {
        Regex::new(r"^(?P<name>.+)-(?P<version>[^-]+)-(?P<release>[^-]+)\.(?P<arch>[^.-]+)\.rpm$")
            .expect("invalid rpm artifact filename regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Evr<'a> {
    epoch: u64,
    version: &'a str,
    release: &'a str,
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'_' | b'+' | b'~' | b'^'))
}

fn parse_evr(evr: &str) -> Option<Evr<'_>> {
    let (epoch, rest) = match evr.split_once(':') {
        Some((epoch, rest)) => (epoch.parse::<u64>().ok()?, rest),
        None => (0, evr),
    };
    let (version, release) = match rest.rsplit_once('-') {
        Some((version, release)) => (version, release),
        None => (rest, ""),
    };

    if !valid_segment(version) || (!release.is_empty() && !valid_segment(release)) || rest.ends_with('-') {
        return None;
    }
    if !version.as_bytes().first().is_some_and(u8::is_ascii_alphanumeric) {
        return None;
    }

    Some(Evr {
        epoch,
        version,
        release,
    })
}

/// Segment-wise comparison as done by `rpmvercmp`.
fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0usize, 0usize);
    let separator = |c: u8| !c.is_ascii_alphanumeric() && c != b'~' && c != b'^';

    loop {
        while i < a.len() && separator(a[i]) {
            i += 1;
        }
        while j < b.len() && separator(b[j]) {
            j += 1;
        }

        let (a_tilde, b_tilde) = (a.get(i) == Some(&b'~'), b.get(j) == Some(&b'~'));
        if a_tilde || b_tilde {
            if !a_tilde {
                return Ordering::Greater;
            }
            if !b_tilde {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        let (a_caret, b_caret) = (a.get(i) == Some(&b'^'), b.get(j) == Some(&b'^'));
        if a_caret || b_caret {
            if i >= a.len() {
                return Ordering::Less;
            }
            if j >= b.len() {
                return Ordering::Greater;
            }
            if !a_caret {
                return Ordering::Greater;
            }
            if !b_caret {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        if i >= a.len() || j >= b.len() {
            break;
        }

        let numeric = a[i].is_ascii_digit();
        let class = |c: u8| if numeric { c.is_ascii_digit() } else { c.is_ascii_alphabetic() };
        let (start_a, start_b) = (i, j);
        while i < a.len() && class(a[i]) {
            i += 1;
        }
        while j < b.len() && class(b[j]) {
            j += 1;
        }

        let (mut seg_a, mut seg_b) = (&a[start_a..i], &b[start_b..j]);
        if seg_b.is_empty() {
            // numeric segments outrank alphabetic ones
            return if numeric { Ordering::Greater } else { Ordering::Less };
        }

        if numeric {
            while seg_a.first() == Some(&b'0') {
                seg_a = &seg_a[1..];
            }
            while seg_b.first() == Some(&b'0') {
                seg_b = &seg_b[1..];
            }
            match seg_a.len().cmp(&seg_b.len()) {
                Ordering::Equal => {}
                longer => return longer,
            }
        }

        match seg_a.cmp(seg_b) {
            Ordering::Equal => {}
            other => return other,
        }
    }

    match (i >= a.len(), j >= b.len()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

/// A missing release sorts below any release: `2.0 < 2.0-1 < 2.0-5`.
fn compare(a: &Evr<'_>, b: &Evr<'_>) -> Ordering {
    a.epoch
        .cmp(&b.epoch)
        .then_with(|| rpmvercmp(a.version, b.version))
        .then_with(|| match (a.release.is_empty(), b.release.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => rpmvercmp(a.release, b.release),
        })
}

pub fn is_valid(version: &str) -> bool {
    parse_evr(version).is_some()
}

pub fn less_than(a: &str, b: &str) -> bool {
    match (parse_evr(a), parse_evr(b)) {
        (Some(a), Some(b)) => compare(&a, &b) == Ordering::Less,
        _ => false,
    }
}

/// `1:2.0-1` -> `2.0-1`. Anything without a numeric epoch is returned as is.
pub fn strip_epoch(version: &str) -> &str {
    match version.split_once(':') {
        Some((epoch, rest)) if !epoch.is_empty() && epoch.bytes().all(|c| c.is_ascii_digit()) => rest,
        _ => version,
    }
}

/// Reads `<name>-<version>-<release>.<arch>.rpm` artifact names.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpmReader;

impl RpmReader {
    fn captures<'f>(&self, filename: &'f str) -> Result<regex::Captures<'f>, PkgMgrError> {
        filename_regex()
            .captures(filename)
            .ok_or_else(|| PkgMgrError::PackageInfo {
                filename: filename.to_string(),
                reason: "expected <name>-<version>-<release>.<arch>.rpm".to_string(),
            })
    }
}

impl PackageInfoReader for RpmReader {
    fn get_name(&self, filename: &str) -> Result<String, PkgMgrError> {
        Ok(self.captures(filename)?["name"].to_string())
    }

    fn get_version(&self, filename: &str) -> Result<String, PkgMgrError> {
        let caps = self.captures(filename)?;
        Ok(format!("{}-{}", &caps["version"], &caps["release"]))
    }
}

#[derive(Debug, Clone)]
pub struct RpmManager {
    os_type: String,
    os_version: String,
    config: BuildConfig,
    working_folder: PathBuf,
}

impl RpmManager {
    pub fn new(os_type: String, os_version: &str, config: BuildConfig, working_folder: PathBuf) -> Self {
        Self {
            os_type,
            os_version: os_version.to_string(),
            config,
            working_folder,
        }
    }
}

impl PackageManager for RpmManager {
    fn package_type(&self) -> PackageType {
        PackageType::Rpm
    }

    fn os_type(&self) -> &str {
        &self.os_type
    }

    fn os_version(&self) -> &str {
        &self.os_version
    }

    fn config(&self) -> &BuildConfig {
        &self.config
    }

    fn working_folder(&self) -> &Path {
        &self.working_folder
    }

    fn comparer(&self) -> VersionComparer {
        COMPARER
    }

    fn reader(&self) -> &dyn PackageInfoReader {
        &RpmReader
    }

    /// `.rpm` file names carry no epoch, so requested epochs are dropped
    /// before comparing. The returned map keeps the requested versions.
    fn validate_staged(&self, updates: &[UpdatePackage]) -> Result<Option<UpdateMap>, PkgMgrError> {
        let without_epoch: UpdatePackages = updates
            .iter()
            .map(|u| UpdatePackage::new(u.name.as_str(), strip_epoch(&u.fixed_version)))
            .collect();
        let mut map = get_validated_updates_map(&without_epoch, COMPARER, &RpmReader, &self.staging_dir())?;
        if let Some(map) = map.as_mut() {
            for update in updates {
                if let Some(info) = map.get_mut(&update.name) {
                    info.version.clone_from(&update.fixed_version);
                }
            }
        }
        Ok(map)
    }
}
