use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::{PackageInfoReader, PackageManager, PackageType, PkgMgrError, VersionComparer};
use crate::config::BuildConfig;

/// Debian-family version ordering.
pub const COMPARER: VersionComparer = VersionComparer::new(is_valid, less_than);

fn filename_regex() -> &'static Regex {
    static FILE_RE: OnceLock<Regex> = OnceLock::new();
    FILE_RE.get_or_init(|| {
        Regex::new(r"^(?P<name>[A-Za-z0-9][A-Za-z0-9+.-]*)_(?P<version>[^_/]+)(?:_(?P<arch>[A-Za-z0-9-]+))?\.deb$")
            .expect("invalid deb artifact filename regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DebVersion<'a> {
    epoch: u64,
    upstream: &'a str,
    revision: &'a str,
}

fn parse_version(version: &str) -> Option<DebVersion<'_>> {
    if version.is_empty() || version.chars().any(char::is_whitespace) {
        return None;
    }

    let (epoch, rest) = match version.split_once(':') {
        Some((epoch, rest)) => (epoch.parse::<u64>().ok()?, rest),
        None => (0, version),
    };
    let (upstream, revision) = match rest.rsplit_once('-') {
        Some((upstream, revision)) if !revision.is_empty() => (upstream, revision),
        Some(_) => return None,
        None => (rest, ""),
    };

    let upstream_ok = upstream.as_bytes().first().is_some_and(u8::is_ascii_digit)
        && upstream
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'+' | b'~' | b'-' | b':'));
    let revision_ok = revision
        .bytes()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'+' | b'~'));

    (upstream_ok && revision_ok).then_some(DebVersion {
        epoch,
        upstream,
        revision,
    })
}

/// dpkg's character weight: `~` sorts before everything, even the end of
/// the string; letters sort before other symbols.
fn order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => i32::from(c),
        Some(c) => i32::from(c) + 256,
    }
}

fn verrevcmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0usize, 0usize);
    let digit_at = |s: &[u8], k: usize| s.get(k).is_some_and(u8::is_ascii_digit);

    while i < a.len() || j < b.len() {
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let (ac, bc) = (order(a.get(i).copied()), order(b.get(j).copied()));
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }

        while a.get(i) == Some(&b'0') {
            i += 1;
        }
        while b.get(j) == Some(&b'0') {
            j += 1;
        }

        let mut first_diff = Ordering::Equal;
        while digit_at(a, i) && digit_at(b, j) {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if digit_at(a, i) {
            return Ordering::Greater;
        }
        if digit_at(b, j) {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}

fn compare(a: &DebVersion<'_>, b: &DebVersion<'_>) -> Ordering {
    a.epoch
        .cmp(&b.epoch)
        .then_with(|| verrevcmp(a.upstream, b.upstream))
        .then_with(|| verrevcmp(a.revision, b.revision))
}

pub fn is_valid(version: &str) -> bool {
    parse_version(version).is_some()
}

pub fn less_than(a: &str, b: &str) -> bool {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => compare(&a, &b) == Ordering::Less,
        _ => false,
    }
}

/// Reads `<name>_<version>[-revision]_<arch>.deb` artifact names.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebReader;

impl DebReader {
    fn captures<'f>(&self, filename: &'f str) -> Result<regex::Captures<'f>, PkgMgrError> {
        filename_regex()
            .captures(filename)
            .ok_or_else(|| PkgMgrError::PackageInfo {
                filename: filename.to_string(),
                reason: "expected <name>_<version>_<arch>.deb".to_string(),
            })
    }
}

impl PackageInfoReader for DebReader {
    fn get_name(&self, filename: &str) -> Result<String, PkgMgrError> {
        Ok(self.captures(filename)?["name"].to_string())
    }

    fn get_version(&self, filename: &str) -> Result<String, PkgMgrError> {
        // apt-get download escapes the epoch separator
        Ok(self.captures(filename)?["version"]
            .replace("%3a", ":")
            .replace("%3A", ":"))
    }
}

#[derive(Debug, Clone)]
pub struct DpkgManager {
    os_type: String,
    os_version: String,
    config: BuildConfig,
    working_folder: PathBuf,
}

impl DpkgManager {
    pub fn new(os_type: String, os_version: &str, config: BuildConfig, working_folder: PathBuf) -> Self {
        Self {
            os_type,
            os_version: os_version.to_string(),
            config,
            working_folder,
        }
    }
}

impl PackageManager for DpkgManager {
    fn package_type(&self) -> PackageType {
        PackageType::Deb
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
        &DebReader
    }
}
